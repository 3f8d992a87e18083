//! The built-in `pack` segment format.
//!
//! A pack segment is one file: the segment header followed by a checksummed
//! body holding the field catalog, document ids, stored values and, per field,
//! a term dictionary mapping each term to its postings.
//!
//! Version 1 stores every term as a chunked postings list. Version 2 adds the
//! single-hit encoding: a term found in exactly one document, once, with unit
//! norm and no locations, is stored as that document number alone and read
//! back through [`SegmentFormat::postings_from_single_hit`].

mod builder;
mod merge;
mod postings;
mod segment;

use std::path::Path;

use log::debug;
use roaring::RoaringBitmap;

use crate::analysis::AnalysisBatch;
use crate::error::{Result, StrataError};
use crate::segment::stats::StatsReporter;
use crate::segment::{CancelToken, PostingsIterator, Segment, SegmentFormat};

pub use postings::SINGLE_HIT_FINISHED;
pub use segment::PackSegment;

use postings::{BitmapPostingsIterator, SingleHitPostingsIterator};

/// Type tag of pack segments.
pub const PACK_SEGMENT_TYPE: &str = "pack";

/// Chunked postings only.
pub const PACK_VERSION_1: u32 = 1;

/// Chunked postings plus single-hit terms.
pub const PACK_VERSION_2: u32 = 2;

/// The pack format at one version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackFormat {
    version: u32,
}

impl PackFormat {
    pub const fn v1() -> Self {
        PackFormat {
            version: PACK_VERSION_1,
        }
    }

    pub const fn v2() -> Self {
        PackFormat {
            version: PACK_VERSION_2,
        }
    }

    pub fn with_version(version: u32) -> Result<Self> {
        match version {
            PACK_VERSION_1 => Ok(Self::v1()),
            PACK_VERSION_2 => Ok(Self::v2()),
            _ => Err(StrataError::UnsupportedSegmentVersion {
                segment_type: PACK_SEGMENT_TYPE.to_string(),
                version,
                known: vec![PACK_VERSION_1, PACK_VERSION_2],
            }),
        }
    }

    /// Whether this version writes single-hit terms.
    pub fn single_hit(&self) -> bool {
        self.version >= PACK_VERSION_2
    }
}

impl SegmentFormat for PackFormat {
    fn segment_type(&self) -> &str {
        PACK_SEGMENT_TYPE
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn new_segment(
        &self,
        batch: &AnalysisBatch,
        chunk_factor: u32,
    ) -> Result<(Box<dyn Segment>, u64)> {
        let data = builder::build_from_batch(batch, chunk_factor, self.single_hit())?;
        let segment = PackSegment::from_data(*self, data)?;
        let size = segment.size_in_bytes();
        debug!(
            "Built pack v{} segment with {} docs ({size} bytes)",
            self.version,
            segment.doc_count()
        );
        Ok((Box::new(segment), size))
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Segment>> {
        Ok(Box::new(PackSegment::open(*self, path)?))
    }

    fn merge(
        &self,
        segments: &[&dyn Segment],
        drops: &[Option<RoaringBitmap>],
        path: &Path,
        chunk_factor: u32,
        cancel: &CancelToken,
        stats: &dyn StatsReporter,
    ) -> Result<(Vec<Vec<u64>>, u64)> {
        merge::merge(*self, segments, drops, path, chunk_factor, cancel, stats)
    }

    fn validate_merge(
        &self,
        segments: &[&dyn Segment],
        drops: &[Option<RoaringBitmap>],
        merged: &dyn Segment,
    ) -> Result<()> {
        merge::validate_merge(segments, drops, merged)
    }

    fn is_single_hit_finished(&self, doc: u64) -> bool {
        doc == SINGLE_HIT_FINISHED
    }

    fn postings_from_bitmap(
        &self,
        bitmap: &RoaringBitmap,
        include_freq_norm: bool,
        _include_locations: bool,
    ) -> Result<Box<dyn PostingsIterator>> {
        Ok(Box::new(BitmapPostingsIterator::new(
            bitmap,
            include_freq_norm,
        )))
    }

    fn postings_from_single_hit(
        &self,
        doc: u64,
        include_freq_norm: bool,
        _include_locations: bool,
    ) -> Result<Box<dyn PostingsIterator>> {
        Ok(Box::new(SingleHitPostingsIterator::new(
            doc,
            include_freq_norm,
        )))
    }
}
