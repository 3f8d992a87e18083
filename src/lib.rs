//! # Strata
//!
//! The storage core of a full-text index.
//!
//! - [`row`]: a byte-exact, type-tagged key/value encoding of every structural
//!   element of an inverted index, and [`row_index`], which keeps documents in
//!   that layout on top of an ordered [`kv`] store.
//! - [`segment`]: immutable, self-contained segments. Formats are looked up by
//!   the `(type, version)` pair persisted in each segment header, build
//!   segments from [`analysis`] output, and merge segments while honoring
//!   per-segment deletion bitmaps.
//!
//! The library logs through the [`log`] facade and installs no logger.

pub mod analysis;
pub mod config;
pub mod error;
pub mod kv;
pub mod row;
pub mod row_index;
pub mod segment;
pub mod util;

pub mod prelude {
    pub use crate::analysis::{AnalysisBatch, AnalysisResult, AnalyzedField, FieldCatalog};
    pub use crate::error::{Result, StrataError};
    pub use crate::row::{KeyValueRow, Row};
    pub use crate::segment::registry::SegmentRegistry;
    pub use crate::segment::{CancelToken, Segment, SegmentFormat};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
