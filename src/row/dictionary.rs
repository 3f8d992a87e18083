//! Term dictionary rows: per-field term to document count.

use crate::error::{Result, StrataError};
use crate::row::{KeyValueRow, RowType, key_body, malformed, put_field_id, read_field_id};
use crate::util::varint::{VarintCursor, encoded_len, put_u64};

/// Number of documents containing `term` in `field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryRow {
    pub term: Vec<u8>,
    pub field: u16,
    pub count: u64,
}

impl DictionaryRow {
    /// The term also keys term-frequency rows, so it must pass
    /// [`TermFrequencyRow::check_term`](crate::row::TermFrequencyRow::check_term).
    pub fn new(term: Vec<u8>, field: u16, count: u64) -> Self {
        DictionaryRow { term, field, count }
    }

    /// Key prefix shared by every dictionary row of `field`.
    pub fn field_prefix(field: u16) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3);
        buf.push(Self::ROW_TYPE.tag());
        put_field_id(&mut buf, field);
        buf
    }

    /// Key of the dictionary row for `(field, term)`.
    pub fn key_for(field: u16, term: &[u8]) -> Vec<u8> {
        let mut buf = Self::field_prefix(field);
        buf.extend_from_slice(term);
        buf
    }
}

impl KeyValueRow for DictionaryRow {
    const ROW_TYPE: RowType = RowType::Dictionary;

    fn key_size(&self) -> usize {
        3 + self.term.len()
    }

    fn write_key(&self, buf: &mut Vec<u8>) {
        buf.push(Self::ROW_TYPE.tag());
        put_field_id(buf, self.field);
        buf.extend_from_slice(&self.term);
    }

    fn value(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(encoded_len(self.count));
        put_u64(&mut buf, self.count);
        buf
    }

    fn parse_kv(key: &[u8], value: &[u8]) -> Result<Self> {
        let body = key_body(key, Self::ROW_TYPE, "dictionary")?;
        let field = read_field_id(body, 0, "dictionary")?;
        let term = body[2..].to_vec();

        let mut cursor = VarintCursor::new(value);
        let count = cursor
            .read_u64()
            .map_err(malformed("dictionary", "missing count"))?;
        if !cursor.is_empty() {
            return Err(StrataError::malformed_row(
                "dictionary row: trailing bytes after count",
            ));
        }

        Ok(DictionaryRow { term, field, count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dictionary_row() {
        let row = DictionaryRow::new(b"beer".to_vec(), 0, 27);
        assert_eq!(row.key(), vec![b'd', 0, 0, b'b', b'e', b'e', b'r']);
        assert_eq!(row.value(), vec![27]);
        assert_eq!(DictionaryRow::parse_kv(&row.key(), &row.value()).unwrap(), row);
        assert_eq!(DictionaryRow::key_for(0, b"beer"), row.key());
    }

    #[test]
    fn test_large_count() {
        let row = DictionaryRow::new(b"a".to_vec(), 7, 1 << 40);
        assert_eq!(DictionaryRow::parse_kv(&row.key(), &row.value()).unwrap(), row);
    }

    #[test]
    fn test_invalid_dictionary_rows() {
        assert!(DictionaryRow::parse_kv(b"d", &[1]).is_err());
        assert!(DictionaryRow::parse_kv(&[b'd', 0, 0, b'a'], &[]).is_err());
        assert!(DictionaryRow::parse_kv(&[b'd', 0, 0, b'a'], &[0x80]).is_err());
        assert!(DictionaryRow::parse_kv(&[b'd', 0, 0, b'a'], &[1, 2]).is_err());
    }
}
