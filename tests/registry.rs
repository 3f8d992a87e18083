use std::path::Path;
use std::sync::Arc;

use roaring::RoaringBitmap;
use strata::analysis::{AnalysisBatch, AnalysisResult, AnalyzedField, FieldCatalog, StoredValue};
use strata::config::SegmentConfig;
use strata::error::{Result, StrataError};
use strata::segment::pack::PackFormat;
use strata::segment::registry::{SegmentRegistry, SharedRegistry};
use strata::segment::stats::StatsReporter;
use strata::segment::{CancelToken, PostingsIterator, Segment, SegmentFormat, SegmentHeader};

fn batch() -> AnalysisBatch {
    let fields = FieldCatalog::from_names(["name", "desc"]).unwrap();
    let documents = vec![
        AnalysisResult::new("budweiser", 0)
            .with_field(AnalyzedField::from_whitespace(0, "budweiser"))
            .with_field(
                AnalyzedField::from_whitespace(1, "an american beer beer")
                    .with_stored(StoredValue::text("an american beer beer")),
            ),
        AnalysisResult::new("guinness", 1)
            .with_field(AnalyzedField::from_whitespace(0, "guinness"))
            .with_field(AnalyzedField::from_whitespace(1, "an irish stout")),
    ];
    AnalysisBatch::new(fields, documents)
}

fn persist(format: &dyn SegmentFormat, path: &Path) -> Box<dyn Segment> {
    let (segment, size) = format.new_segment(&batch(), 1024).unwrap();
    assert_eq!(size, segment.size_in_bytes());
    segment.persist(path).unwrap();
    segment
}

#[test]
fn test_open_dispatches_on_header() {
    let dir = tempfile::tempdir().unwrap();
    let registry = SegmentRegistry::global();

    for version in registry.known_versions("pack") {
        let format = registry.resolve("pack", version).unwrap();
        let path = dir.path().join(format!("v{version}.pack"));
        let built = persist(format.as_ref(), &path);

        let bytes = std::fs::read(&path).unwrap();
        let (header, _) = SegmentHeader::read(&bytes).unwrap();
        assert_eq!(header, SegmentHeader::new("pack", version));
        assert_eq!(bytes.len() as u64, built.size_in_bytes());

        let opened = registry.open(&path).unwrap();
        assert_eq!(opened.version(), version);
        assert_eq!(opened.doc_count(), 2);
        assert_eq!(opened.document_id(1).unwrap(), "guinness");
        assert_eq!(opened.fields(), built.fields());
        assert_eq!(opened.terms(1).unwrap(), built.terms(1).unwrap());
        assert_eq!(opened.dictionary_entry(1, b"an").unwrap(), Some(2));
        assert_eq!(opened.dictionary_entry(1, b"lager").unwrap(), None);
        assert_eq!(
            opened.stored_fields(0).unwrap(),
            vec![(1, StoredValue::text("an american beer beer"))]
        );

        let mut postings = opened.postings(1, b"beer", None, true, true).unwrap();
        let posting = postings.next_posting().unwrap().unwrap();
        assert_eq!(posting.doc, 0);
        assert_eq!(posting.frequency, 2);
        assert_eq!(posting.norm, 0.5);
        let positions: Vec<u64> = posting.locations.iter().map(|l| l.position).collect();
        assert_eq!(positions, vec![3, 4]);
        assert!(postings.next_posting().unwrap().is_none());

        assert!(matches!(
            opened.document_id(2),
            Err(StrataError::DocumentNotFound(2))
        ));
    }
}

#[test]
fn test_open_rejects_unknown_formats() {
    let dir = tempfile::tempdir().unwrap();
    let registry = SegmentRegistry::global();

    let path = dir.path().join("zap.seg");
    let mut bytes = SegmentHeader::new("zap", 11).to_bytes().unwrap();
    bytes.extend_from_slice(&[0; 16]);
    std::fs::write(&path, &bytes).unwrap();
    assert!(matches!(
        registry.open(&path),
        Err(StrataError::UnsupportedSegmentType(segment_type)) if segment_type == "zap"
    ));

    let path = dir.path().join("future.pack");
    std::fs::write(&path, SegmentHeader::new("pack", 99).to_bytes().unwrap()).unwrap();
    assert!(matches!(
        registry.open(&path),
        Err(StrataError::UnsupportedSegmentVersion { version: 99, .. })
    ));

    let path = dir.path().join("empty.pack");
    std::fs::write(&path, b"").unwrap();
    assert!(matches!(registry.open(&path), Err(StrataError::CorruptSegment(_))));

    assert!(matches!(
        registry.open(&dir.path().join("missing.pack")),
        Err(StrataError::Io(_))
    ));
}

#[test]
fn test_open_detects_damage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seg.pack");
    persist(&PackFormat::v2(), &path);
    let pristine = std::fs::read(&path).unwrap();

    let mut flipped = pristine.clone();
    let middle = flipped.len() / 2;
    flipped[middle] ^= 0x5A;
    std::fs::write(&path, &flipped).unwrap();
    assert!(matches!(
        SegmentRegistry::global().open(&path),
        Err(StrataError::CorruptSegment(_))
    ));

    std::fs::write(&path, &pristine[..pristine.len() - 3]).unwrap();
    assert!(matches!(
        SegmentRegistry::global().open(&path),
        Err(StrataError::CorruptSegment(_))
    ));

    // A v2 file cannot be opened as v1.
    std::fs::write(&path, &pristine).unwrap();
    assert!(PackFormat::v1().open(&path).is_err());
    assert!(PackFormat::v2().open(&path).is_ok());
}

#[test]
fn test_segment_config_selects_format() {
    let registry = SegmentRegistry::global();

    let config = SegmentConfig::from_json(r#"{"segment_type": "pack", "segment_version": 1}"#).unwrap();
    let format = registry.resolve_config(&config).unwrap();
    assert_eq!((format.segment_type(), format.version()), ("pack", 1));

    let config = SegmentConfig::default();
    assert_eq!(registry.resolve_config(&config).unwrap().version(), 2);

    assert!(matches!(
        SegmentConfig::from_json(r#"{"segment_version": 1}"#),
        Err(StrataError::InvalidConfig(_))
    ));
}

/// A third-party format that stores its segments the way `pack` v2 does.
#[derive(Debug)]
struct MirrorFormat {
    inner: PackFormat,
}

impl SegmentFormat for MirrorFormat {
    fn segment_type(&self) -> &str {
        "mirror"
    }

    fn version(&self) -> u32 {
        1
    }

    fn new_segment(&self, batch: &AnalysisBatch, chunk_factor: u32) -> Result<(Box<dyn Segment>, u64)> {
        self.inner.new_segment(batch, chunk_factor)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Segment>> {
        self.inner.open(path)
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
        self.inner.merge(segments, drops, path, chunk_factor, cancel, stats)
    }

    fn validate_merge(
        &self,
        segments: &[&dyn Segment],
        drops: &[Option<RoaringBitmap>],
        merged: &dyn Segment,
    ) -> Result<()> {
        self.inner.validate_merge(segments, drops, merged)
    }

    fn is_single_hit_finished(&self, doc: u64) -> bool {
        self.inner.is_single_hit_finished(doc)
    }

    fn postings_from_bitmap(
        &self,
        bitmap: &RoaringBitmap,
        include_freq_norm: bool,
        include_locations: bool,
    ) -> Result<Box<dyn PostingsIterator>> {
        self.inner
            .postings_from_bitmap(bitmap, include_freq_norm, include_locations)
    }

    fn postings_from_single_hit(
        &self,
        doc: u64,
        include_freq_norm: bool,
        include_locations: bool,
    ) -> Result<Box<dyn PostingsIterator>> {
        self.inner
            .postings_from_single_hit(doc, include_freq_norm, include_locations)
    }
}

#[test]
fn test_runtime_registration() {
    let shared = SharedRegistry::with_builtin().unwrap();
    let before = shared.snapshot();
    assert_eq!(before.default_format().version(), 2);

    shared
        .register(Arc::new(MirrorFormat {
            inner: PackFormat::v2(),
        }))
        .unwrap();
    let after = shared.snapshot();

    assert!(before.resolve("mirror", 1).is_err());
    assert_eq!(after.resolve("mirror", 1).unwrap().segment_type(), "mirror");
    assert_eq!(after.default_format().segment_type(), "mirror");
    assert_eq!(after.segment_types(), vec!["mirror", "pack"]);

    shared.set_default("pack", 2).unwrap();
    assert_eq!(shared.snapshot().default_format().segment_type(), "pack");
    assert!(shared.snapshot().resolve("mirror", 1).is_ok());

    // The process-wide table never sees runtime registrations.
    assert!(SegmentRegistry::global().resolve("mirror", 1).is_err());
}
