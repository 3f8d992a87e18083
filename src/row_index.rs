//! A document index laid out as rows in an ordered key/value store.
//!
//! Each indexed document produces one term-frequency row per `(field, term)`,
//! one stored row per stored value, and a back-index row listing both. The
//! dictionary rows keep per-term document counts. Deleting or reindexing a
//! document reads its back-index row to find what to remove.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::RwLock;

use crate::analysis::{AnalysisResult, FieldCatalog};
use crate::error::{Result, StrataError};
use crate::kv::{KvBatch, KvStore};
use crate::row::{
    BackIndexRow, BackIndexStoreEntry, BackIndexTermEntry, DictionaryRow, FieldRow, InternalRow,
    KeyValueRow, Row, RowType, StoredRow, TermFrequencyRow, TermVector, VersionRow,
};

/// Layout version written to the version row.
pub const ROW_INDEX_VERSION: u8 = 7;

/// Row-oriented index over a [`KvStore`].
#[derive(Debug)]
pub struct RowIndex {
    store: Arc<dyn KvStore>,
    fields: RwLock<FieldCatalog>,
}

impl RowIndex {
    /// Open an index, initializing an empty store.
    ///
    /// Fails with [`StrataError::Storage`] if the store holds a different
    /// layout version.
    pub fn open(store: Arc<dyn KvStore>) -> Result<Self> {
        match store.get(&VersionRow::new(ROW_INDEX_VERSION).key())? {
            Some(value) => {
                let row = VersionRow::parse_kv(&[RowType::Version.tag()], &value)?;
                if row.version != ROW_INDEX_VERSION {
                    return Err(StrataError::storage(format!(
                        "incompatible row index version {}, expected {ROW_INDEX_VERSION}",
                        row.version
                    )));
                }
                debug!("Opened row index version {}", row.version);
            }
            None => {
                let row = VersionRow::new(ROW_INDEX_VERSION);
                let mut batch = KvBatch::new();
                batch.set(row.key(), row.value());
                store.apply(batch)?;
                info!("Initialized row index version {ROW_INDEX_VERSION}");
            }
        }

        let mut field_rows = Vec::new();
        for (key, value) in store.scan_prefix(&RowType::Field.prefix())? {
            field_rows.push(FieldRow::parse_kv(&key, &value)?);
        }
        // Keys sort by little-endian id bytes, not by id.
        field_rows.sort_by_key(|row| row.index);

        let mut fields = FieldCatalog::new();
        for row in field_rows {
            fields.insert_at(row.index, row.name)?;
        }

        Ok(RowIndex {
            store,
            fields: RwLock::new(fields),
        })
    }

    /// Snapshot of the index's own field catalog.
    pub fn fields(&self) -> FieldCatalog {
        self.fields.read().clone()
    }

    /// Index `doc`, replacing any earlier version with the same id.
    ///
    /// Field ids in `doc` refer to `catalog`; they are translated to this
    /// index's ids, registering fields it has not seen.
    pub fn index_document(&self, doc: &AnalysisResult, catalog: &FieldCatalog) -> Result<()> {
        if doc.id.is_empty() {
            return Err(StrataError::construction("document id must not be empty"));
        }

        // Writers serialize on the catalog lock; dictionary counts are
        // read-modify-write.
        let mut catalog_guard = self.fields.write();
        let mut fields = catalog_guard.clone();

        let mut batch = KvBatch::new();
        let mut dictionary_deltas: BTreeMap<(u16, Vec<u8>), i64> = BTreeMap::new();

        if let Some(old) = self.back_index(&doc.id)? {
            self.remove_rows(&old, &mut batch, &mut dictionary_deltas)?;
        }

        let mut term_entries = Vec::new();
        let mut stored_fields = BTreeSet::new();
        let mut seen_fields = BTreeSet::new();

        for analyzed in &doc.fields {
            let name = catalog.name(analyzed.field).ok_or_else(|| {
                StrataError::construction(format!(
                    "document {}: field id {} is not in the catalog",
                    doc.id, analyzed.field
                ))
            })?;
            let field = match fields.id(name) {
                Some(id) => id,
                None => {
                    let id = fields.add(name)?;
                    let row = FieldRow::new(id, name);
                    batch.set(row.key(), row.value());
                    debug!("Registered field {name} as {id}");
                    id
                }
            };
            if !seen_fields.insert(field) {
                return Err(StrataError::construction(format!(
                    "document {}: field {name} appears more than once",
                    doc.id
                )));
            }

            let norm = analyzed.norm();
            for (term, occurrences) in analyzed.term_frequencies() {
                TermFrequencyRow::check_term(term)?;
                let vectors = if analyzed.term_vectors {
                    occurrences
                        .iter()
                        .map(|t| TermVector::new(field, t.position, t.start, t.end))
                        .collect()
                } else {
                    Vec::new()
                };
                let row = TermFrequencyRow::with_term_vectors(
                    term.to_vec(),
                    field,
                    doc.id.as_str(),
                    occurrences.len() as u64,
                    norm,
                    vectors,
                );
                batch.set(row.key(), row.value());
                *dictionary_deltas
                    .entry((field, term.to_vec()))
                    .or_default() += 1;
                term_entries.push(BackIndexTermEntry::new(term, field));
            }

            for stored in &analyzed.stored {
                let row = StoredRow::new(
                    doc.id.as_str(),
                    field,
                    stored.array_positions.clone(),
                    stored.kind,
                    stored.value.clone(),
                );
                batch.set(row.key(), row.value());
                stored_fields.insert(field);
            }
        }

        let back_index = BackIndexRow::new(
            doc.id.as_str(),
            term_entries,
            stored_fields.into_iter().map(BackIndexStoreEntry::new).collect(),
        );
        batch.set(back_index.key(), back_index.value());

        self.apply_dictionary_deltas(dictionary_deltas, &mut batch)?;
        debug!("Indexing document {} ({} writes)", doc.id, batch.len());
        self.store.apply(batch)?;
        *catalog_guard = fields;
        Ok(())
    }

    /// Remove every row of `doc_id`. Returns `false` if it was not indexed.
    pub fn delete_document(&self, doc_id: &str) -> Result<bool> {
        let _writer = self.fields.write();
        let Some(old) = self.back_index(doc_id)? else {
            return Ok(false);
        };

        let mut batch = KvBatch::new();
        let mut dictionary_deltas = BTreeMap::new();
        self.remove_rows(&old, &mut batch, &mut dictionary_deltas)?;
        batch.delete(old.key());
        self.apply_dictionary_deltas(dictionary_deltas, &mut batch)?;

        debug!("Deleting document {doc_id} ({} writes)", batch.len());
        self.store.apply(batch)?;
        Ok(true)
    }

    /// The back-index row of `doc_id`, if indexed.
    pub fn back_index(&self, doc_id: &str) -> Result<Option<BackIndexRow>> {
        let key = BackIndexRow::key_for(doc_id);
        self.store
            .get(&key)?
            .map(|value| BackIndexRow::parse_kv(&key, &value))
            .transpose()
    }

    /// Every posting of `(field, term)`, in document id order.
    pub fn term_frequencies(&self, field: u16, term: &[u8]) -> Result<Vec<TermFrequencyRow>> {
        self.store
            .scan_prefix(&TermFrequencyRow::term_prefix(field, term))?
            .into_iter()
            .map(|(key, value)| TermFrequencyRow::parse_kv(&key, &value))
            .collect()
    }

    /// Number of documents containing `term` in `field`.
    pub fn document_frequency(&self, field: u16, term: &[u8]) -> Result<u64> {
        let key = DictionaryRow::key_for(field, term);
        match self.store.get(&key)? {
            Some(value) => Ok(DictionaryRow::parse_kv(&key, &value)?.count),
            None => Ok(0),
        }
    }

    /// Every term of `field` with its document count, in term order.
    pub fn dictionary(&self, field: u16) -> Result<Vec<DictionaryRow>> {
        self.store
            .scan_prefix(&DictionaryRow::field_prefix(field))?
            .into_iter()
            .map(|(key, value)| DictionaryRow::parse_kv(&key, &value))
            .collect()
    }

    /// Stored values of `doc_id`.
    pub fn stored_fields(&self, doc_id: &str) -> Result<Vec<StoredRow>> {
        self.store
            .scan_prefix(&StoredRow::doc_prefix(doc_id))?
            .into_iter()
            .map(|(key, value)| StoredRow::parse_kv(&key, &value))
            .collect()
    }

    /// Number of indexed documents.
    pub fn document_count(&self) -> Result<usize> {
        Ok(self.store.scan_prefix(&RowType::BackIndex.prefix())?.len())
    }

    pub fn set_internal(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let row = InternalRow::new(key.to_vec(), value.to_vec());
        let mut batch = KvBatch::new();
        batch.set(row.key(), row.value());
        self.store.apply(batch)
    }

    pub fn get_internal(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.store.get(&InternalRow::key_for(key))
    }

    pub fn delete_internal(&self, key: &[u8]) -> Result<()> {
        let mut batch = KvBatch::new();
        batch.delete(InternalRow::key_for(key));
        self.store.apply(batch)
    }

    /// Decode every row in the store, in key order.
    pub fn rows(&self) -> Result<Vec<Row>> {
        self.store
            .scan_prefix(&[])?
            .into_iter()
            .map(|(key, value)| Row::parse(&key, &value))
            .collect()
    }

    fn remove_rows(
        &self,
        old: &BackIndexRow,
        batch: &mut KvBatch,
        dictionary_deltas: &mut BTreeMap<(u16, Vec<u8>), i64>,
    ) -> Result<()> {
        for (term, field) in old.term_fields()? {
            batch.delete(TermFrequencyRow::key_for(field, term, &old.doc_id));
            *dictionary_deltas.entry((field, term.to_vec())).or_default() -= 1;
        }
        for field in old.stored_fields()? {
            for (key, _) in self
                .store
                .scan_prefix(&StoredRow::field_prefix(&old.doc_id, field))?
            {
                batch.delete(key);
            }
        }
        Ok(())
    }

    fn apply_dictionary_deltas(
        &self,
        deltas: BTreeMap<(u16, Vec<u8>), i64>,
        batch: &mut KvBatch,
    ) -> Result<()> {
        for ((field, term), delta) in deltas {
            if delta == 0 {
                continue;
            }
            let current = self.document_frequency(field, &term)? as i64;
            let count = current + delta;
            if count < 0 {
                return Err(StrataError::storage(format!(
                    "dictionary count for field {field} would drop below zero"
                )));
            }
            let row = DictionaryRow::new(term, field, count as u64);
            if count == 0 {
                batch.delete(row.key());
            } else {
                batch.set(row.key(), row.value());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalyzedField, StoredValue, TokenOccurrence};
    use crate::kv::MemoryKvStore;
    use crate::row::BYTE_SEPARATOR;

    fn catalog() -> FieldCatalog {
        FieldCatalog::from_names(["title", "body"]).unwrap()
    }

    fn doc(id: &str, body: &str) -> AnalysisResult {
        AnalysisResult::new(id, 0).with_field(
            AnalyzedField::from_whitespace(1, body).with_stored(StoredValue::text(body)),
        )
    }

    #[test]
    fn test_open_writes_version() {
        let store = Arc::new(MemoryKvStore::new());
        RowIndex::open(store.clone()).unwrap();
        assert_eq!(store.get(b"v").unwrap(), Some(vec![ROW_INDEX_VERSION]));
    }

    #[test]
    fn test_open_rejects_other_version() {
        let store = Arc::new(MemoryKvStore::new());
        let mut batch = KvBatch::new();
        batch.set(b"v".to_vec(), vec![5]);
        store.apply(batch).unwrap();
        assert!(matches!(
            RowIndex::open(store),
            Err(StrataError::Storage(_))
        ));
    }

    #[test]
    fn test_index_and_lookup() {
        let index = RowIndex::open(Arc::new(MemoryKvStore::new())).unwrap();
        index.index_document(&doc("a", "rust search rust"), &catalog()).unwrap();
        index.index_document(&doc("b", "rust"), &catalog()).unwrap();

        // "body" is the first field this index has seen
        let body = index.fields().id("body").unwrap();
        assert_eq!(body, 0);
        assert_eq!(index.document_frequency(body, b"rust").unwrap(), 2);
        assert_eq!(index.document_frequency(body, b"search").unwrap(), 1);

        let postings = index.term_frequencies(body, b"rust").unwrap();
        assert_eq!(postings.len(), 2);
        assert_eq!(postings[0].doc_id, "a");
        assert_eq!(postings[0].freq, 2);
        assert_eq!(postings[0].vectors.len(), 2);
        assert_eq!(postings[0].vectors[1].start, 12);

        let stored = index.stored_fields("a").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].value, b"rust search rust".to_vec());
        assert_eq!(index.document_count().unwrap(), 2);
    }

    #[test]
    fn test_reindex_replaces_rows() {
        let index = RowIndex::open(Arc::new(MemoryKvStore::new())).unwrap();
        index.index_document(&doc("a", "old words"), &catalog()).unwrap();
        index.index_document(&doc("a", "new words"), &catalog()).unwrap();

        let body = index.fields().id("body").unwrap();
        assert_eq!(index.document_frequency(body, b"old").unwrap(), 0);
        assert_eq!(index.document_frequency(body, b"new").unwrap(), 1);
        assert_eq!(index.document_frequency(body, b"words").unwrap(), 1);
        assert!(index.dictionary(body).unwrap().iter().all(|d| d.term != b"old"));
        assert_eq!(index.stored_fields("a").unwrap()[0].value, b"new words".to_vec());
    }

    #[test]
    fn test_delete_document() {
        let index = RowIndex::open(Arc::new(MemoryKvStore::new())).unwrap();
        index.index_document(&doc("a", "beer"), &catalog()).unwrap();
        index.index_document(&doc("b", "beer"), &catalog()).unwrap();

        assert!(index.delete_document("a").unwrap());
        assert!(!index.delete_document("a").unwrap());

        let body = index.fields().id("body").unwrap();
        assert_eq!(index.document_frequency(body, b"beer").unwrap(), 1);
        assert!(index.stored_fields("a").unwrap().is_empty());
        assert!(index.back_index("a").unwrap().is_none());
        assert_eq!(index.document_count().unwrap(), 1);
    }

    #[test]
    fn test_term_vectors_disabled() {
        let index = RowIndex::open(Arc::new(MemoryKvStore::new())).unwrap();
        let doc = AnalysisResult::new("a", 0)
            .with_field(AnalyzedField::from_whitespace(0, "quiet").with_term_vectors(false));
        index.index_document(&doc, &catalog()).unwrap();
        let title = index.fields().id("title").unwrap();
        let postings = index.term_frequencies(title, b"quiet").unwrap();
        assert!(postings[0].vectors.is_empty());
    }

    #[test]
    fn test_unknown_field_id() {
        let index = RowIndex::open(Arc::new(MemoryKvStore::new())).unwrap();
        let doc = AnalysisResult::new("a", 0).with_field(AnalyzedField::from_whitespace(9, "x"));
        assert!(matches!(
            index.index_document(&doc, &catalog()),
            Err(StrataError::Construction(_))
        ));
    }

    #[test]
    fn test_terms_with_separator_are_rejected() {
        let index = RowIndex::open(Arc::new(MemoryKvStore::new())).unwrap();
        index.index_document(&doc("a", "beer"), &catalog()).unwrap();
        let before = index.rows().unwrap();

        let bad = AnalysisResult::new("b", 0).with_field(
            AnalyzedField::new(1)
                .with_token(TokenOccurrence::new(b"ale".to_vec(), 1, 0, 3))
                .with_token(TokenOccurrence::new(vec![b'a', BYTE_SEPARATOR, b'b'], 2, 4, 7)),
        );
        assert!(matches!(
            index.index_document(&bad, &catalog()),
            Err(StrataError::Construction(_))
        ));
        let empty = AnalysisResult::new("c", 0)
            .with_field(AnalyzedField::new(1).with_token(TokenOccurrence::new(Vec::new(), 1, 0, 0)));
        assert!(index.index_document(&empty, &catalog()).is_err());

        // Nothing was written and every row still parses.
        assert_eq!(index.rows().unwrap(), before);
        assert!(index.back_index("b").unwrap().is_none());
    }

    #[test]
    fn test_fields_reload_in_id_order() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let names: Vec<String> = (0..300).map(|i| format!("f{i}")).collect();
        let catalog = FieldCatalog::from_names(names.clone()).unwrap();
        let index = RowIndex::open(store.clone()).unwrap();
        let mut doc = AnalysisResult::new("a", 0);
        for id in 0..300u16 {
            doc = doc.with_field(AnalyzedField::from_whitespace(id, "x"));
        }
        index.index_document(&doc, &catalog).unwrap();

        let reopened = RowIndex::open(store).unwrap();
        assert_eq!(reopened.fields().names(), names.as_slice());
    }

    #[test]
    fn test_internal_rows() {
        let index = RowIndex::open(Arc::new(MemoryKvStore::new())).unwrap();
        index.set_internal(b"mapping", b"{}").unwrap();
        assert_eq!(index.get_internal(b"mapping").unwrap(), Some(b"{}".to_vec()));
        index.delete_internal(b"mapping").unwrap();
        assert_eq!(index.get_internal(b"mapping").unwrap(), None);
    }

    #[test]
    fn test_rows_dump_parses_everything() {
        let index = RowIndex::open(Arc::new(MemoryKvStore::new())).unwrap();
        index.index_document(&doc("a", "one two"), &catalog()).unwrap();
        let rows = index.rows().unwrap();
        assert!(rows.iter().any(|r| r.row_type() == RowType::BackIndex));
        assert!(rows.iter().any(|r| r.row_type() == RowType::Version));
        assert_eq!(
            rows.iter().filter(|r| r.row_type() == RowType::TermFrequency).count(),
            2
        );
    }
}
