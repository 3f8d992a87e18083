//! Immutable segments and the formats that build, open and merge them.
//!
//! A segment is a self-contained set of indexed documents, numbered densely
//! from zero. Once built it is never modified: deletions live in a bitmap
//! owned by the caller and are applied when postings are read or when
//! segments are merged.
//!
//! Each physical encoding implements [`SegmentFormat`] and is identified by a
//! `(type, version)` pair written at the start of every persisted segment
//! (see [`header`]). The [`registry`] maps those pairs back to formats.
//!
//! # Examples
//!
//! ```
//! use strata::analysis::{AnalysisBatch, AnalysisResult, AnalyzedField, FieldCatalog};
//! use strata::segment::registry::SegmentRegistry;
//!
//! let fields = FieldCatalog::from_names(["body"]).unwrap();
//! let batch = AnalysisBatch::new(
//!     fields,
//!     vec![AnalysisResult::new("a", 0).with_field(AnalyzedField::from_whitespace(0, "hello world"))],
//! );
//!
//! let format = SegmentRegistry::global().default_format();
//! let (segment, _size) = format.new_segment(&batch, 1024).unwrap();
//! assert_eq!(segment.doc_count(), 1);
//!
//! let mut postings = segment.postings(0, b"hello", None, true, false).unwrap();
//! assert_eq!(postings.next_posting().unwrap().unwrap().doc, 0);
//! ```

pub mod header;
pub mod merge;
pub mod pack;
pub mod registry;
pub mod stats;

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use roaring::RoaringBitmap;

use crate::analysis::{AnalysisBatch, FieldCatalog, StoredValue};
use crate::error::{Result, StrataError};
use crate::segment::stats::StatsReporter;

pub use header::SegmentHeader;

/// Remap table entry for a document that did not survive a merge.
pub const DOC_NUM_DROPPED: u64 = u64::MAX;

/// Where a term occurred inside a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub field: u16,
    pub position: u64,
    pub start: u64,
    pub end: u64,
    pub array_positions: Vec<u64>,
}

/// One document in a postings list.
///
/// `frequency` and `norm` are zero unless frequency and norm were requested;
/// `locations` is empty unless locations were requested and recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub doc: u64,
    pub frequency: u64,
    pub norm: f32,
    pub locations: Vec<Location>,
}

impl Posting {
    pub fn doc_only(doc: u64) -> Self {
        Posting {
            doc,
            frequency: 0,
            norm: 0.0,
            locations: Vec::new(),
        }
    }
}

/// Forward iteration over a postings list in ascending document order.
pub trait PostingsIterator: Send {
    /// The next posting, or `None` when exhausted.
    fn next_posting(&mut self) -> Result<Option<Posting>>;

    /// The first remaining posting with `doc >= target`.
    fn advance(&mut self, target: u64) -> Result<Option<Posting>> {
        loop {
            match self.next_posting()? {
                Some(posting) if posting.doc < target => continue,
                other => return Ok(other),
            }
        }
    }

    /// Upper bound on the number of postings left.
    fn size_hint(&self) -> usize;
}

/// An iterator with nothing in it.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyPostingsIterator;

impl PostingsIterator for EmptyPostingsIterator {
    fn next_posting(&mut self) -> Result<Option<Posting>> {
        Ok(None)
    }

    fn size_hint(&self) -> usize {
        0
    }
}

/// Read access to an open segment.
pub trait Segment: Send + Sync + Debug {
    /// Type tag of the format that wrote this segment.
    fn segment_type(&self) -> &str;

    /// Version of the format that wrote this segment.
    fn version(&self) -> u32;

    /// Number of documents, deleted or not.
    fn doc_count(&self) -> u64;

    /// Field catalog the segment's field ids refer to.
    fn fields(&self) -> &FieldCatalog;

    /// Every term of `field`, in byte order.
    fn terms(&self, field: u16) -> Result<Vec<Vec<u8>>>;

    /// Number of documents containing `term` in `field`, or `None` if the
    /// term does not occur.
    fn dictionary_entry(&self, field: u16, term: &[u8]) -> Result<Option<u64>>;

    /// Postings of `term` in `field`, skipping documents in `except`.
    fn postings<'a>(
        &'a self,
        field: u16,
        term: &[u8],
        except: Option<&RoaringBitmap>,
        include_freq_norm: bool,
        include_locations: bool,
    ) -> Result<Box<dyn PostingsIterator + 'a>>;

    /// External id of document `doc`.
    fn document_id(&self, doc: u64) -> Result<&str>;

    /// Stored values of document `doc` as `(field, value)` pairs.
    fn stored_fields(&self, doc: u64) -> Result<Vec<(u16, StoredValue)>>;

    /// Encoded size in bytes.
    fn size_in_bytes(&self) -> u64;

    /// Write the segment to `path`. The file appears only once complete.
    fn persist(&self, path: &Path) -> Result<()>;
}

/// Cooperative cancellation for long-running operations.
///
/// Clones share the same flag. Workers call [`checkpoint`](Self::checkpoint)
/// once per unit of work; the flag itself is read every `check_interval`
/// calls.
#[derive(Debug, Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    ticks: Arc<AtomicUsize>,
    check_interval: usize,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            cancelled: Arc::new(AtomicBool::new(false)),
            ticks: Arc::new(AtomicUsize::new(0)),
            check_interval: 1,
        }
    }

    /// A token sharing this flag that only reads it every `interval` checkpoints.
    pub fn with_check_interval(&self, interval: usize) -> Self {
        CancelToken {
            cancelled: Arc::clone(&self.cancelled),
            ticks: Arc::new(AtomicUsize::new(0)),
            check_interval: interval.max(1),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fail with [`StrataError::Cancelled`] if cancellation was requested.
    pub fn check(&self, what: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(StrataError::cancelled(what.to_string()))
        } else {
            Ok(())
        }
    }

    /// Count one unit of work, checking the flag on interval boundaries.
    pub fn checkpoint(&self, what: &str) -> Result<()> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed);
        if tick % self.check_interval == 0 {
            self.check(what)
        } else {
            Ok(())
        }
    }
}

/// A segment encoding: builds, opens and merges segments of one
/// `(type, version)`.
pub trait SegmentFormat: Send + Sync + Debug {
    /// Type tag written to the segment header.
    fn segment_type(&self) -> &str;

    /// Version written to the segment header.
    fn version(&self) -> u32;

    /// Build a segment from a batch of analyzed documents. Returns the segment
    /// and its encoded size in bytes.
    fn new_segment(
        &self,
        batch: &AnalysisBatch,
        chunk_factor: u32,
    ) -> Result<(Box<dyn Segment>, u64)>;

    /// Open a persisted segment.
    fn open(&self, path: &Path) -> Result<Box<dyn Segment>>;

    /// Merge `segments` into a new segment at `path`, dropping the documents
    /// in each segment's `drops` bitmap.
    ///
    /// Returns one remap table per input, indexed by old document number and
    /// holding the new number or [`DOC_NUM_DROPPED`], together with the
    /// merged document count. Nothing is visible at `path` unless the merge
    /// succeeds.
    fn merge(
        &self,
        segments: &[&dyn Segment],
        drops: &[Option<RoaringBitmap>],
        path: &Path,
        chunk_factor: u32,
        cancel: &CancelToken,
        stats: &dyn StatsReporter,
    ) -> Result<(Vec<Vec<u64>>, u64)>;

    /// Check a merged segment against the inputs it was merged from.
    fn validate_merge(
        &self,
        segments: &[&dyn Segment],
        drops: &[Option<RoaringBitmap>],
        merged: &dyn Segment,
    ) -> Result<()>;

    /// Whether `doc` marks an exhausted single-hit posting.
    fn is_single_hit_finished(&self, doc: u64) -> bool;

    /// Postings over the documents in `bitmap`.
    fn postings_from_bitmap(
        &self,
        bitmap: &RoaringBitmap,
        include_freq_norm: bool,
        include_locations: bool,
    ) -> Result<Box<dyn PostingsIterator>>;

    /// Postings holding the single document `doc`.
    fn postings_from_single_hit(
        &self,
        doc: u64,
        include_freq_norm: bool,
        include_locations: bool,
    ) -> Result<Box<dyn PostingsIterator>>;
}

/// Number of documents of a `doc_count`-document segment not in `drops`.
pub fn live_doc_count(doc_count: u64, drops: Option<&RoaringBitmap>) -> u64 {
    let dropped = drops.map_or(0, |drops| {
        drops
            .iter()
            .take_while(|&doc| (doc as u64) < doc_count)
            .count() as u64
    });
    doc_count - dropped
}
