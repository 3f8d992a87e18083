//! Error types for the Strata library.
//!
//! All errors are represented by the [`StrataError`] enum. Codec and registry
//! errors are data-integrity failures and are never retried internally;
//! [`StrataError::Cancelled`] is the one variant that describes a normal
//! outcome rather than a fault.
//!
//! # Examples
//!
//! ```
//! use strata::error::{Result, StrataError};
//!
//! fn example_operation() -> Result<()> {
//!     Err(StrataError::malformed_row("missing field id"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Strata operations.
#[derive(Error, Debug)]
pub enum StrataError {
    /// I/O errors (segment files, temp files, mmap).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Row bytes violate the structural contract of their row type.
    #[error("Malformed row: {0}")]
    MalformedRow(String),

    /// The leading key byte does not name any row type.
    #[error("Unknown row type: {0:#04x}")]
    UnknownRowType(u8),

    /// A variable-length integer ran out of bytes with its continuation bit set.
    #[error("Truncated varint")]
    Truncated,

    /// No segment format is registered under this type tag.
    #[error("Unsupported segment type: {0}")]
    UnsupportedSegmentType(String),

    /// The segment type is known but not at this version.
    #[error("Unsupported version {version} for segment type: {segment_type}, known: {known:?}")]
    UnsupportedSegmentVersion {
        segment_type: String,
        version: u32,
        known: Vec<u32>,
    },

    /// Segment construction received inconsistent input.
    #[error("Construction error: {0}")]
    Construction(String),

    /// Persisted segment bytes failed structural validation.
    #[error("Corrupt segment: {0}")]
    CorruptSegment(String),

    /// Document number outside the segment.
    #[error("Document not found: {0}")]
    DocumentNotFound(u64),

    /// A merge result disagrees with its inputs.
    #[error("Merge mismatch: {0}")]
    MergeMismatch(String),

    /// Operation cancelled through its cancellation token.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Key/value store errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration values.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;

impl StrataError {
    /// Create a new malformed row error.
    pub fn malformed_row<S: Into<String>>(msg: S) -> Self {
        StrataError::MalformedRow(msg.into())
    }

    /// Create a new construction error.
    pub fn construction<S: Into<String>>(msg: S) -> Self {
        StrataError::Construction(msg.into())
    }

    /// Create a new corrupt segment error.
    pub fn corrupt_segment<S: Into<String>>(msg: S) -> Self {
        StrataError::CorruptSegment(msg.into())
    }

    /// Create a new merge mismatch error.
    pub fn merge_mismatch<S: Into<String>>(msg: S) -> Self {
        StrataError::MergeMismatch(msg.into())
    }

    /// Create a new cancelled error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        StrataError::Cancelled(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        StrataError::Storage(msg.into())
    }

    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        StrataError::InvalidConfig(msg.into())
    }

    /// Create a new serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        StrataError::Serialization(msg.into())
    }

    /// Whether this error is the normal outcome of a cancelled merge.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StrataError::Cancelled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = StrataError::malformed_row("missing separator");
        assert_eq!(error.to_string(), "Malformed row: missing separator");

        let error = StrataError::UnknownRowType(b'q');
        assert_eq!(error.to_string(), "Unknown row type: 0x71");

        let error = StrataError::UnsupportedSegmentVersion {
            segment_type: "pack".to_string(),
            version: 9,
            known: vec![1, 2],
        };
        assert_eq!(
            error.to_string(),
            "Unsupported version 9 for segment type: pack, known: [1, 2]"
        );
    }

    #[test]
    fn test_cancelled_is_not_a_fault() {
        assert!(StrataError::cancelled("merge").is_cancelled());
        assert!(!StrataError::merge_mismatch("count").is_cancelled());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let strata_error = StrataError::from(io_error);

        match strata_error {
            StrataError::Io(_) => {}
            _ => panic!("Expected IO error variant"),
        }
    }
}
