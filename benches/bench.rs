//! Criterion benchmarks for Strata.
//!
//! - Row encoding and decoding
//! - Building pack segments from analyzed batches
//! - Merging segments with deletions

use std::hint::black_box;

use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use roaring::RoaringBitmap;
use strata::analysis::{AnalysisBatch, AnalysisResult, AnalyzedField, FieldCatalog, StoredValue};
use strata::row::{KeyValueRow, Row, StoredRow, TermFrequencyRow, TermVector};
use strata::segment::pack::PackFormat;
use strata::segment::stats::NoopStatsReporter;
use strata::segment::{CancelToken, Segment, SegmentFormat};

/// Generate analyzed documents for benchmarking.
fn generate_batch(prefix: &str, count: usize) -> AnalysisBatch {
    let words = [
        "search", "engine", "full", "text", "index", "query", "document", "field", "term",
        "phrase", "segment", "merge", "posting", "dictionary", "norm", "frequency",
    ];

    let fields = FieldCatalog::from_names(["id", "body"]).unwrap();
    let documents = (0..count)
        .map(|i| {
            let id = format!("{prefix}{i}");
            let body = (0..20)
                .map(|j| words[(i * 7 + j * 3) % words.len()])
                .collect::<Vec<_>>()
                .join(" ");
            AnalysisResult::new(id.clone(), i as u64)
                .with_field(AnalyzedField::from_whitespace(0, &id).with_term_vectors(false))
                .with_field(AnalyzedField::from_whitespace(1, &body).with_stored(StoredValue::text(&body)))
        })
        .collect();
    AnalysisBatch::new(fields, documents)
}

fn bench_row_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("row_codec");

    let tf = TermFrequencyRow::with_term_vectors(
        b"beer".to_vec(),
        0,
        "budweiser",
        3,
        3.14,
        vec![
            TermVector::new(0, 1, 3, 11),
            TermVector::new(0, 2, 23, 31),
            TermVector::new(0, 3, 43, 51),
        ],
    );
    let stored = StoredRow::new("budweiser", 0, vec![2, 294, 3078], b't', b"an american beer".to_vec());

    group.throughput(Throughput::Elements(1));
    group.bench_function("term_frequency_encode", |b| {
        b.iter(|| {
            let row = black_box(&tf);
            black_box((row.key(), row.value()))
        })
    });

    let (key, value) = (tf.key(), tf.value());
    group.bench_function("term_frequency_decode", |b| {
        b.iter(|| black_box(Row::parse(black_box(&key), black_box(&value)).unwrap()))
    });

    let (key, value) = (stored.key(), stored.value());
    group.bench_function("stored_decode", |b| {
        b.iter(|| black_box(Row::parse(black_box(&key), black_box(&value)).unwrap()))
    });

    group.finish();
}

fn bench_segment_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_build");
    let batch = generate_batch("doc", 1000);
    group.throughput(Throughput::Elements(1000));

    for format in [PackFormat::v1(), PackFormat::v2()] {
        group.bench_function(format!("pack_v{}", format.version()), |b| {
            b.iter(|| black_box(format.new_segment(black_box(&batch), 128).unwrap()))
        });
    }

    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    group.sample_size(10);

    let format = PackFormat::v2();
    let segments: Vec<Box<dyn Segment>> = (0..4)
        .map(|i| format.new_segment(&generate_batch(&format!("s{i}-"), 500), 128).unwrap().0)
        .collect();
    let inputs: Vec<&dyn Segment> = segments.iter().map(|s| s.as_ref()).collect();
    let drops: Vec<Option<RoaringBitmap>> = (0..4u32)
        .map(|i| Some((0..500).filter(|d| d % (i + 3) == 0).collect()))
        .collect();

    group.throughput(Throughput::Elements(2000));
    group.bench_function("four_inputs_with_deletions", |b| {
        b.iter_batched(
            || tempfile::tempdir().unwrap(),
            |dir| {
                let path = dir.path().join("merged.pack");
                black_box(
                    format
                        .merge(&inputs, &drops, &path, 128, &CancelToken::new(), &NoopStatsReporter)
                        .unwrap(),
                );
                dir
            },
            BatchSize::PerIteration,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_row_codec, bench_segment_build, bench_merge);
criterion_main!(benches);
