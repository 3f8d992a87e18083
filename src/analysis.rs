//! Analyzed document structures consumed by segment construction and the row index.
//!
//! Text analysis itself happens outside this crate. What arrives here is the
//! result: per-document, per-field token occurrences with positions and byte
//! offsets, plus the field values to keep verbatim.
//!
//! ```text
//! Document → (external analyzer) → AnalysisResult → Segment / RowIndex
//! ```
//!
//! # Examples
//!
//! ```
//! use strata::analysis::{AnalysisResult, AnalyzedField, FieldCatalog, StoredValue};
//!
//! let mut fields = FieldCatalog::new();
//! let body = fields.add("body").unwrap();
//!
//! let doc = AnalysisResult::new("doc-1", 0).with_field(
//!     AnalyzedField::from_whitespace(body, "rust search rust")
//!         .with_stored(StoredValue::text("rust search rust")),
//! );
//!
//! let freqs = doc.fields[0].term_frequencies();
//! assert_eq!(freqs[b"rust".as_slice()].len(), 2);
//! ```

use std::collections::BTreeMap;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// Ordered catalog of field names, indexed by 16-bit field id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(into = "Vec<String>", try_from = "Vec<String>")]
pub struct FieldCatalog {
    names: Vec<String>,
    ids: AHashMap<String, u16>,
}

impl PartialEq for FieldCatalog {
    fn eq(&self, other: &Self) -> bool {
        self.names == other.names
    }
}

impl TryFrom<Vec<String>> for FieldCatalog {
    type Error = StrataError;

    fn try_from(names: Vec<String>) -> Result<Self> {
        FieldCatalog::from_names(names)
    }
}

impl From<FieldCatalog> for Vec<String> {
    fn from(catalog: FieldCatalog) -> Self {
        catalog.names
    }
}

impl FieldCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from names in field id order.
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut catalog = FieldCatalog::new();
        for name in names {
            let name = name.into();
            if catalog.id(&name).is_some() {
                return Err(StrataError::construction(format!(
                    "duplicate field name in catalog: {name}"
                )));
            }
            catalog.add(name)?;
        }
        Ok(catalog)
    }

    /// Return the id of `name`, registering it if it is new.
    pub fn add<S: Into<String>>(&mut self, name: S) -> Result<u16> {
        let name = name.into();
        if let Some(id) = self.id(&name) {
            return Ok(id);
        }
        if name.is_empty() {
            return Err(StrataError::construction("field name must not be empty"));
        }
        let id = u16::try_from(self.names.len())
            .map_err(|_| StrataError::construction("field catalog is full"))?;
        self.ids.insert(name.clone(), id);
        self.names.push(name);
        Ok(id)
    }

    /// Insert `name` at a specific id, as read back from a field row.
    pub fn insert_at(&mut self, id: u16, name: String) -> Result<()> {
        let index = id as usize;
        if index < self.names.len() {
            if self.names[index] == name {
                return Ok(());
            }
            return Err(StrataError::construction(format!(
                "field id {id} already names {}",
                self.names[index]
            )));
        }
        if index > self.names.len() {
            return Err(StrataError::construction(format!(
                "field id {id} leaves a gap after {}",
                self.names.len()
            )));
        }
        self.ids.insert(name.clone(), id);
        self.names.push(name);
        Ok(())
    }

    /// Look up a field id by name.
    pub fn id(&self, name: &str) -> Option<u16> {
        self.ids.get(name).copied()
    }

    /// Look up a field name by id.
    pub fn name(&self, id: u16) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    /// Whether `id` names a field.
    pub fn contains(&self, id: u16) -> bool {
        (id as usize) < self.names.len()
    }

    /// Field names in id order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the catalog has no fields.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterate `(id, name)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(id, name)| (id as u16, name.as_str()))
    }
}

/// A single token occurrence within a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenOccurrence {
    /// The analyzed term bytes.
    pub term: Vec<u8>,
    /// Token position within the field (1-based by convention).
    pub position: u64,
    /// Byte offset where the token starts in the original value.
    pub start: u64,
    /// Byte offset just past the token.
    pub end: u64,
    /// Positions within repeated (array) values, outermost first.
    pub array_positions: Vec<u64>,
}

impl TokenOccurrence {
    /// Create an occurrence outside of any array value.
    pub fn new<T: Into<Vec<u8>>>(term: T, position: u64, start: u64, end: u64) -> Self {
        TokenOccurrence {
            term: term.into(),
            position,
            start,
            end,
            array_positions: Vec::new(),
        }
    }
}

/// Stored value kind tags. These are the leading byte of a stored row value.
pub mod kind {
    pub const TEXT: u8 = b't';
    pub const NUMERIC: u8 = b'n';
    pub const DATETIME: u8 = b'd';
    pub const BOOLEAN: u8 = b'b';
    pub const GEO: u8 = b'g';
    pub const BINARY: u8 = b'x';
}

/// A field value kept verbatim for retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredValue {
    /// Kind tag, see [`kind`].
    pub kind: u8,
    /// Raw value bytes.
    pub value: Vec<u8>,
    /// Positions within repeated (array) values.
    pub array_positions: Vec<u64>,
}

impl StoredValue {
    /// A UTF-8 text value.
    pub fn text<S: AsRef<str>>(text: S) -> Self {
        StoredValue {
            kind: kind::TEXT,
            value: text.as_ref().as_bytes().to_vec(),
            array_positions: Vec::new(),
        }
    }

    /// A value of an explicit kind.
    pub fn raw(kind: u8, value: Vec<u8>) -> Self {
        StoredValue {
            kind,
            value,
            array_positions: Vec::new(),
        }
    }

    /// Attach array positions.
    pub fn at(mut self, array_positions: Vec<u64>) -> Self {
        self.array_positions = array_positions;
        self
    }
}

/// Analysis output for one field of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedField {
    /// Field id in the batch's catalog.
    pub field: u16,
    /// Number of tokens the field produced, used for the norm.
    pub length: u32,
    /// Token occurrences in position order.
    pub tokens: Vec<TokenOccurrence>,
    /// Values to store for this field.
    pub stored: Vec<StoredValue>,
    /// Whether positions and offsets are kept for this field.
    pub term_vectors: bool,
}

impl AnalyzedField {
    /// Create an empty field entry.
    pub fn new(field: u16) -> Self {
        AnalyzedField {
            field,
            length: 0,
            tokens: Vec::new(),
            stored: Vec::new(),
            term_vectors: true,
        }
    }

    /// Tokenize pre-normalized text on ASCII whitespace, recording byte offsets.
    pub fn from_whitespace(field: u16, text: &str) -> Self {
        let mut analyzed = AnalyzedField::new(field);
        let mut position = 0u64;
        let mut offset = 0usize;
        for token in text.split_ascii_whitespace() {
            let start = offset + text[offset..].find(token).unwrap_or(0);
            let end = start + token.len();
            offset = end;
            position += 1;
            analyzed.push(TokenOccurrence::new(
                token.as_bytes(),
                position,
                start as u64,
                end as u64,
            ));
        }
        analyzed
    }

    /// Append a token and bump the field length.
    pub fn push(&mut self, token: TokenOccurrence) {
        self.tokens.push(token);
        self.length += 1;
    }

    /// Builder-style [`push`](Self::push).
    pub fn with_token(mut self, token: TokenOccurrence) -> Self {
        self.push(token);
        self
    }

    /// Attach a stored value.
    pub fn with_stored(mut self, value: StoredValue) -> Self {
        self.stored.push(value);
        self
    }

    /// Enable or disable term vectors.
    pub fn with_term_vectors(mut self, enabled: bool) -> Self {
        self.term_vectors = enabled;
        self
    }

    /// Length normalization factor, `1 / sqrt(length)`.
    pub fn norm(&self) -> f32 {
        1.0 / (self.length.max(1) as f32).sqrt()
    }

    /// Group token occurrences by term, in term byte order.
    pub fn term_frequencies(&self) -> BTreeMap<&[u8], Vec<&TokenOccurrence>> {
        let mut by_term: BTreeMap<&[u8], Vec<&TokenOccurrence>> = BTreeMap::new();
        for token in &self.tokens {
            by_term.entry(token.term.as_slice()).or_default().push(token);
        }
        by_term
    }
}

/// Analysis output for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// External document id.
    pub id: String,
    /// Position of the document within its batch.
    pub ordinal: u64,
    /// Analyzed fields.
    pub fields: Vec<AnalyzedField>,
}

impl AnalysisResult {
    /// Create a result with no fields.
    pub fn new<S: Into<String>>(id: S, ordinal: u64) -> Self {
        AnalysisResult {
            id: id.into(),
            ordinal,
            fields: Vec::new(),
        }
    }

    /// Attach a field.
    pub fn with_field(mut self, field: AnalyzedField) -> Self {
        self.fields.push(field);
        self
    }
}

/// A batch of analyzed documents sharing one field catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisBatch {
    /// Catalog the documents' field ids refer to.
    pub fields: FieldCatalog,
    /// Documents in ordinal order.
    pub documents: Vec<AnalysisResult>,
}

impl AnalysisBatch {
    /// Create a batch.
    pub fn new(fields: FieldCatalog, documents: Vec<AnalysisResult>) -> Self {
        AnalysisBatch { fields, documents }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_ids_are_stable() {
        let mut catalog = FieldCatalog::new();
        assert_eq!(catalog.add("title").unwrap(), 0);
        assert_eq!(catalog.add("body").unwrap(), 1);
        assert_eq!(catalog.add("title").unwrap(), 0);
        assert_eq!(catalog.name(1), Some("body"));
        assert_eq!(catalog.id("body"), Some(1));
        assert!(!catalog.contains(2));
        assert!(catalog.add("").is_err());
    }

    #[test]
    fn test_catalog_insert_at() {
        let mut catalog = FieldCatalog::new();
        catalog.insert_at(0, "a".to_string()).unwrap();
        catalog.insert_at(0, "a".to_string()).unwrap();
        assert!(catalog.insert_at(0, "b".to_string()).is_err());
        assert!(catalog.insert_at(5, "c".to_string()).is_err());
        assert!(FieldCatalog::from_names(["x", "x"]).is_err());
    }

    #[test]
    fn test_catalog_lookup_after_deserialize() {
        let catalog = FieldCatalog::from_names(["a", "b"]).unwrap();
        let json = serde_json::to_string(&catalog).unwrap();
        let back: FieldCatalog = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id("b"), Some(1));
    }

    #[test]
    fn test_whitespace_offsets() {
        let field = AnalyzedField::from_whitespace(0, "an  american beer");
        assert_eq!(field.length, 3);
        assert_eq!(field.tokens[1].term, b"american");
        assert_eq!((field.tokens[1].start, field.tokens[1].end), (4, 12));
        assert_eq!(field.tokens[2].position, 3);
    }

    #[test]
    fn test_norm() {
        let mut field = AnalyzedField::new(0);
        assert_eq!(field.norm(), 1.0);
        for i in 0..4 {
            field.push(TokenOccurrence::new("x", i, 0, 1));
        }
        assert_eq!(field.norm(), 0.5);
    }
}
