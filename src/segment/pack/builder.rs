//! Accumulates documents and postings into [`PackData`].

use std::collections::BTreeMap;

use ahash::AHashSet;

use crate::analysis::{AnalysisBatch, FieldCatalog, StoredValue};
use crate::error::{Result, StrataError};
use crate::segment::pack::postings::TermPostings;
use crate::segment::pack::segment::PackData;
use crate::segment::{Location, Posting};

pub(crate) struct PackBuilder {
    chunk_factor: u32,
    single_hit: bool,
    fields: FieldCatalog,
    doc_ids: Vec<String>,
    stored: Vec<Vec<(u16, StoredValue)>>,
    postings: Vec<BTreeMap<Vec<u8>, Vec<Posting>>>,
}

impl PackBuilder {
    pub(crate) fn new(fields: FieldCatalog, chunk_factor: u32, single_hit: bool) -> Result<Self> {
        if chunk_factor == 0 {
            return Err(StrataError::construction("chunk factor must be positive"));
        }
        let postings = vec![BTreeMap::new(); fields.len()];
        Ok(PackBuilder {
            chunk_factor,
            single_hit,
            fields,
            doc_ids: Vec::new(),
            stored: Vec::new(),
            postings,
        })
    }

    pub(crate) fn doc_count(&self) -> u64 {
        self.doc_ids.len() as u64
    }

    /// Append a document, returning its number.
    pub(crate) fn add_document(
        &mut self,
        id: String,
        stored: Vec<(u16, StoredValue)>,
    ) -> Result<u64> {
        if self.doc_ids.len() > u32::MAX as usize {
            return Err(StrataError::construction("segment is full"));
        }
        if let Some((field, _)) = stored.iter().find(|(field, _)| !self.fields.contains(*field)) {
            return Err(StrataError::construction(format!(
                "stored value for unknown field id {field}"
            )));
        }
        self.doc_ids.push(id);
        self.stored.push(stored);
        Ok(self.doc_ids.len() as u64 - 1)
    }

    /// Append a posting. Postings of one term must arrive in ascending
    /// document order.
    pub(crate) fn add_posting(&mut self, field: u16, term: &[u8], posting: Posting) -> Result<()> {
        let terms = self.terms_mut(field)?;
        match terms.get_mut(term) {
            Some(postings) => postings.push(posting),
            None => {
                terms.insert(term.to_vec(), vec![posting]);
            }
        }
        Ok(())
    }

    /// Set every posting of a term at once.
    pub(crate) fn insert_term(
        &mut self,
        field: u16,
        term: Vec<u8>,
        postings: Vec<Posting>,
    ) -> Result<()> {
        self.terms_mut(field)?.insert(term, postings);
        Ok(())
    }

    fn terms_mut(&mut self, field: u16) -> Result<&mut BTreeMap<Vec<u8>, Vec<Posting>>> {
        self.postings
            .get_mut(field as usize)
            .ok_or_else(|| StrataError::construction(format!("unknown field id {field}")))
    }

    pub(crate) fn finish(self) -> Result<PackData> {
        let chunk_factor = self.chunk_factor;
        let single_hit = self.single_hit;
        let terms = self
            .postings
            .into_iter()
            .map(|terms| {
                terms
                    .into_iter()
                    .map(|(term, postings)| {
                        Ok((term, TermPostings::encode(&postings, chunk_factor, single_hit)?))
                    })
                    .collect::<Result<BTreeMap<_, _>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PackData {
            chunk_factor,
            fields: self.fields,
            doc_ids: self.doc_ids,
            stored: self.stored,
            terms,
        })
    }
}

/// Build segment data from analyzed documents.
///
/// Document numbers follow the documents' ordinals, which must be exactly
/// `0..n`.
pub(crate) fn build_from_batch(
    batch: &AnalysisBatch,
    chunk_factor: u32,
    single_hit: bool,
) -> Result<PackData> {
    let mut documents: Vec<_> = batch.documents.iter().collect();
    documents.sort_by_key(|doc| doc.ordinal);

    let mut builder = PackBuilder::new(batch.fields.clone(), chunk_factor, single_hit)?;
    let mut seen_ids = AHashSet::with_capacity(documents.len());

    for (expected, doc) in documents.into_iter().enumerate() {
        if doc.ordinal != expected as u64 {
            return Err(StrataError::construction(format!(
                "document {} has ordinal {}, expected {expected}",
                doc.id, doc.ordinal
            )));
        }
        if doc.id.is_empty() {
            return Err(StrataError::construction(format!(
                "document {expected} has an empty id"
            )));
        }
        if !seen_ids.insert(doc.id.as_str()) {
            return Err(StrataError::construction(format!(
                "duplicate document id {}",
                doc.id
            )));
        }

        let mut seen_fields = AHashSet::new();
        let mut stored = Vec::new();
        for analyzed in &doc.fields {
            if !batch.fields.contains(analyzed.field) {
                return Err(StrataError::construction(format!(
                    "document {}: field id {} is not in the catalog",
                    doc.id, analyzed.field
                )));
            }
            if !seen_fields.insert(analyzed.field) {
                return Err(StrataError::construction(format!(
                    "document {}: field id {} appears more than once",
                    doc.id, analyzed.field
                )));
            }
            stored.extend(
                analyzed
                    .stored
                    .iter()
                    .map(|value| (analyzed.field, value.clone())),
            );
        }
        let doc_num = builder.add_document(doc.id.clone(), stored)?;

        for analyzed in &doc.fields {
            let norm = analyzed.norm();
            for (term, occurrences) in analyzed.term_frequencies() {
                let locations = if analyzed.term_vectors {
                    occurrences
                        .iter()
                        .map(|token| Location {
                            field: analyzed.field,
                            position: token.position,
                            start: token.start,
                            end: token.end,
                            array_positions: token.array_positions.clone(),
                        })
                        .collect()
                } else {
                    Vec::new()
                };
                builder.add_posting(
                    analyzed.field,
                    term,
                    Posting {
                        doc: doc_num,
                        frequency: occurrences.len() as u64,
                        norm,
                        locations,
                    },
                )?;
            }
        }
    }

    builder.finish()
}
