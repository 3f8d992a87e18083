use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use strata::analysis::{AnalysisResult, AnalyzedField, FieldCatalog, StoredValue};
use strata::error::StrataError;
use strata::kv::{KvBatch, KvStore, MemoryKvStore};
use strata::row::{KeyValueRow, Row, TermFrequencyRow};
use strata::row_index::RowIndex;

const WORDS: [&str; 5] = ["lager", "stout", "porter", "ale", "pilsner"];

fn beer(id: &str, n: usize) -> AnalysisResult {
    let desc = (0..=n % 3)
        .map(|i| WORDS[(n + i) % WORDS.len()])
        .collect::<Vec<_>>()
        .join(" ");
    AnalysisResult::new(id, 0)
        .with_field(AnalyzedField::from_whitespace(0, id).with_term_vectors(false))
        .with_field(AnalyzedField::from_whitespace(1, &desc).with_stored(StoredValue::text(&desc)))
}

/// Dictionary counts must equal the number of term-frequency rows, and every
/// term-frequency row must be listed in its document's back-index row.
fn assert_consistent(index: &RowIndex) {
    let rows = index.rows().unwrap();

    let mut postings: BTreeMap<(u16, Vec<u8>), u64> = BTreeMap::new();
    let mut back_index: BTreeMap<String, Vec<(u16, Vec<u8>)>> = BTreeMap::new();
    let mut dictionary: BTreeMap<(u16, Vec<u8>), u64> = BTreeMap::new();
    let mut tf_by_doc: BTreeMap<String, Vec<(u16, Vec<u8>)>> = BTreeMap::new();

    for row in rows {
        match row {
            Row::TermFrequency(tf) => {
                *postings.entry((tf.field, tf.term.clone())).or_default() += 1;
                tf_by_doc.entry(tf.doc_id).or_default().push((tf.field, tf.term));
            }
            Row::Dictionary(d) => {
                dictionary.insert((d.field, d.term), d.count);
            }
            Row::BackIndex(b) => {
                let mut entries: Vec<(u16, Vec<u8>)> = b
                    .term_fields()
                    .unwrap()
                    .into_iter()
                    .map(|(term, field)| (field, term.to_vec()))
                    .collect();
                entries.sort();
                back_index.insert(b.doc_id, entries);
            }
            _ => {}
        }
    }

    assert_eq!(postings, dictionary);
    for entries in tf_by_doc.values_mut() {
        entries.sort();
    }
    assert_eq!(tf_by_doc, back_index);
}

#[test]
fn test_concurrent_writers_keep_counts_exact() {
    let _ = env_logger::builder().is_test(true).try_init();
    let catalog = FieldCatalog::from_names(["name", "desc"]).unwrap();
    let index = Arc::new(RowIndex::open(Arc::new(MemoryKvStore::new())).unwrap());

    thread::scope(|scope| {
        for writer in 0..4 {
            let index = Arc::clone(&index);
            let catalog = &catalog;
            scope.spawn(move || {
                for n in 0..25 {
                    let id = format!("beer-{}", n % 10 + writer * 5);
                    index.index_document(&beer(&id, n + writer), catalog).unwrap();
                    if n % 7 == 6 {
                        index.delete_document(&id).unwrap();
                    }
                }
            });
        }
    });

    assert_consistent(&index);
    assert!(index.document_count().unwrap() > 0);
}

#[test]
fn test_reopen_sees_the_same_index() {
    let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let catalog = FieldCatalog::from_names(["name", "desc"]).unwrap();

    let index = RowIndex::open(store.clone()).unwrap();
    for n in 0..6 {
        index.index_document(&beer(&format!("b{n}"), n), &catalog).unwrap();
    }
    index.set_internal(b"mapping", b"{\"desc\":\"text\"}").unwrap();
    let before = index.rows().unwrap();
    drop(index);

    let reopened = RowIndex::open(store).unwrap();
    assert_eq!(reopened.fields(), catalog);
    assert_eq!(reopened.rows().unwrap(), before);
    assert_eq!(reopened.document_count().unwrap(), 6);
    assert_eq!(
        reopened.get_internal(b"mapping").unwrap(),
        Some(b"{\"desc\":\"text\"}".to_vec())
    );
    assert_consistent(&reopened);
}

#[test]
fn test_postings_come_back_in_document_order() {
    let catalog = FieldCatalog::from_names(["name", "desc"]).unwrap();
    let index = RowIndex::open(Arc::new(MemoryKvStore::new())).unwrap();
    for id in ["delta", "alpha", "charlie", "bravo"] {
        let doc = AnalysisResult::new(id, 0).with_field(AnalyzedField::from_whitespace(1, "ale ale"));
        index.index_document(&doc, &catalog).unwrap();
    }

    let desc = index.fields().id("desc").unwrap();
    let docs: Vec<String> = index
        .term_frequencies(desc, b"ale")
        .unwrap()
        .into_iter()
        .map(|row| row.doc_id)
        .collect();
    assert_eq!(docs, vec!["alpha", "bravo", "charlie", "delta"]);

    let row = &index.term_frequencies(desc, b"ale").unwrap()[0];
    assert_eq!(row.freq, 2);
    assert_eq!(row.norm, 1.0 / 2f32.sqrt());
    assert_eq!(row.key(), TermFrequencyRow::key_for(desc, b"ale", "alpha"));
}

#[test]
fn test_malformed_rows_abort_reads() {
    let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let catalog = FieldCatalog::from_names(["name", "desc"]).unwrap();
    let index = RowIndex::open(store.clone()).unwrap();
    index.index_document(&beer("b0", 0), &catalog).unwrap();

    let desc = index.fields().id("desc").unwrap();
    let mut batch = KvBatch::new();
    batch.set(TermFrequencyRow::key_for(desc, b"lager", "broken"), vec![0x80]);
    store.apply(batch).unwrap();

    assert!(matches!(
        index.term_frequencies(desc, b"lager"),
        Err(StrataError::MalformedRow(_))
    ));
    assert!(matches!(index.rows(), Err(StrataError::MalformedRow(_))));
    // Other terms are unaffected.
    assert!(index.term_frequencies(desc, b"stout").is_ok());
}

#[test]
fn test_closed_store_surfaces_storage_errors() {
    let store = Arc::new(MemoryKvStore::new());
    let catalog = FieldCatalog::from_names(["name", "desc"]).unwrap();
    let index = RowIndex::open(store.clone()).unwrap();
    store.close();

    assert!(matches!(
        index.index_document(&beer("b0", 0), &catalog),
        Err(StrataError::Storage(_))
    ));
    // The failed write registered no fields.
    assert!(index.fields().is_empty());
    assert!(
        index
            .rows()
            .is_err_and(|e| matches!(e, StrataError::Storage(_)))
    );
}
