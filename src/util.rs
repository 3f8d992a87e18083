//! Shared utility modules used across Strata components.

pub mod varint;
