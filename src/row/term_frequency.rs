//! Posting rows: occurrences of one term in one field of one document.

use crate::error::{Result, StrataError};
use crate::row::{
    BYTE_SEPARATOR, KeyValueRow, RowType, key_body, malformed, put_field_id, read_field_id,
    read_utf8,
};
use crate::util::varint::{VarintCursor, encoded_len, put_f32, put_u64};

/// Position and byte offsets of one occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermVector {
    pub field: u16,
    pub position: u64,
    pub start: u64,
    pub end: u64,
}

impl TermVector {
    pub fn new(field: u16, position: u64, start: u64, end: u64) -> Self {
        TermVector {
            field,
            position,
            start,
            end,
        }
    }

    fn encoded_len(&self) -> usize {
        encoded_len(self.field as u64)
            + encoded_len(self.position)
            + encoded_len(self.start)
            + encoded_len(self.end)
    }
}

/// One posting. Term vectors are optional per field; a value without any is valid.
#[derive(Debug, Clone, PartialEq)]
pub struct TermFrequencyRow {
    pub term: Vec<u8>,
    pub field: u16,
    pub doc_id: String,
    pub freq: u64,
    pub norm: f32,
    pub vectors: Vec<TermVector>,
}

impl TermFrequencyRow {
    /// `term` must pass [`check_term`](Self::check_term).
    pub fn new<S: Into<String>>(term: Vec<u8>, field: u16, doc_id: S, freq: u64, norm: f32) -> Self {
        TermFrequencyRow {
            term,
            field,
            doc_id: doc_id.into(),
            freq,
            norm,
            vectors: Vec::new(),
        }
    }

    /// Reject terms whose key could not be parsed back: empty terms and
    /// terms containing [`BYTE_SEPARATOR`].
    pub fn check_term(term: &[u8]) -> Result<()> {
        if term.is_empty() {
            return Err(StrataError::construction("term must not be empty"));
        }
        if term.contains(&BYTE_SEPARATOR) {
            return Err(StrataError::construction(format!(
                "term {:?} contains the key separator 0xFF",
                String::from_utf8_lossy(term)
            )));
        }
        Ok(())
    }

    pub fn with_term_vectors<S: Into<String>>(
        term: Vec<u8>,
        field: u16,
        doc_id: S,
        freq: u64,
        norm: f32,
        vectors: Vec<TermVector>,
    ) -> Self {
        TermFrequencyRow {
            vectors,
            ..TermFrequencyRow::new(term, field, doc_id, freq, norm)
        }
    }

    /// Key prefix shared by every posting of `(field, term)`.
    pub fn term_prefix(field: u16, term: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + term.len());
        buf.push(Self::ROW_TYPE.tag());
        put_field_id(&mut buf, field);
        buf.extend_from_slice(term);
        buf.push(BYTE_SEPARATOR);
        buf
    }

    /// Key of the posting for `(field, term, doc_id)`.
    pub fn key_for(field: u16, term: &[u8], doc_id: &str) -> Vec<u8> {
        let mut buf = Self::term_prefix(field, term);
        buf.extend_from_slice(doc_id.as_bytes());
        buf
    }
}

impl KeyValueRow for TermFrequencyRow {
    const ROW_TYPE: RowType = RowType::TermFrequency;

    fn key_size(&self) -> usize {
        4 + self.term.len() + self.doc_id.len()
    }

    fn write_key(&self, buf: &mut Vec<u8>) {
        buf.push(Self::ROW_TYPE.tag());
        put_field_id(buf, self.field);
        buf.extend_from_slice(&self.term);
        buf.push(BYTE_SEPARATOR);
        buf.extend_from_slice(self.doc_id.as_bytes());
    }

    fn value(&self) -> Vec<u8> {
        let size = encoded_len(self.freq)
            + encoded_len(self.norm.to_bits() as u64)
            + self.vectors.iter().map(TermVector::encoded_len).sum::<usize>();
        let mut buf = Vec::with_capacity(size);
        put_u64(&mut buf, self.freq);
        put_f32(&mut buf, self.norm);
        for tv in &self.vectors {
            put_u64(&mut buf, tv.field as u64);
            put_u64(&mut buf, tv.position);
            put_u64(&mut buf, tv.start);
            put_u64(&mut buf, tv.end);
        }
        buf
    }

    fn parse_kv(key: &[u8], value: &[u8]) -> Result<Self> {
        let body = key_body(key, Self::ROW_TYPE, "term frequency")?;
        let field = read_field_id(body, 0, "term frequency")?;
        let rest = &body[2..];
        let sep = rest
            .iter()
            .position(|&b| b == BYTE_SEPARATOR)
            .ok_or_else(|| StrataError::malformed_row("term frequency row: missing separator"))?;
        if sep == 0 {
            return Err(StrataError::malformed_row("term frequency row: missing term"));
        }
        let term = rest[..sep].to_vec();
        let doc_bytes = &rest[sep + 1..];
        if doc_bytes.is_empty() {
            return Err(StrataError::malformed_row(
                "term frequency row: missing document id",
            ));
        }
        let doc_id = read_utf8(doc_bytes, "term frequency", "document id")?;

        let mut cursor = VarintCursor::new(value);
        let freq = cursor
            .read_u64()
            .map_err(malformed("term frequency", "missing freq"))?;
        let norm = cursor
            .read_f32()
            .map_err(malformed("term frequency", "missing norm"))?;

        let mut vectors = Vec::new();
        while !cursor.is_empty() {
            let tv_field = cursor
                .read_u64()
                .map_err(malformed("term frequency", "truncated term vector field"))?;
            let tv_field = u16::try_from(tv_field).map_err(|_| {
                StrataError::malformed_row(format!(
                    "term frequency row: term vector field {tv_field} out of range"
                ))
            })?;
            let position = cursor
                .read_u64()
                .map_err(malformed("term frequency", "missing term vector position"))?;
            let start = cursor
                .read_u64()
                .map_err(malformed("term frequency", "missing term vector start"))?;
            let end = cursor
                .read_u64()
                .map_err(malformed("term frequency", "missing term vector end"))?;
            vectors.push(TermVector::new(tv_field, position, start, end));
        }

        Ok(TermFrequencyRow {
            term,
            field,
            doc_id,
            freq,
            norm,
            vectors,
        })
    }
}
