//! Stored field rows: the original value of a field, keyed by document.

use crate::error::{Result, StrataError};
use crate::row::{
    BYTE_SEPARATOR, KeyValueRow, RowType, key_body, malformed, put_field_id, read_field_id,
    read_utf8,
};
use crate::util::varint::{VarintCursor, encoded_len, put_u64};

/// A stored field value.
///
/// `array_positions` locates the value inside repeated or nested fields; it is
/// empty for scalar fields. `kind` is an opaque type tag (see
/// [`crate::analysis::kind`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub doc_id: String,
    pub field: u16,
    pub array_positions: Vec<u64>,
    pub kind: u8,
    pub value: Vec<u8>,
}

impl StoredRow {
    pub fn new<S: Into<String>>(
        doc_id: S,
        field: u16,
        array_positions: Vec<u64>,
        kind: u8,
        value: Vec<u8>,
    ) -> Self {
        StoredRow {
            doc_id: doc_id.into(),
            field,
            array_positions,
            kind,
            value,
        }
    }

    /// Key prefix shared by every stored row of `doc_id`.
    pub fn doc_prefix(doc_id: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(doc_id.len() + 2);
        buf.push(Self::ROW_TYPE.tag());
        buf.extend_from_slice(doc_id.as_bytes());
        buf.push(BYTE_SEPARATOR);
        buf
    }

    /// Key prefix shared by every stored row of `(doc_id, field)`.
    pub fn field_prefix(doc_id: &str, field: u16) -> Vec<u8> {
        let mut buf = Self::doc_prefix(doc_id);
        put_field_id(&mut buf, field);
        buf
    }
}

impl KeyValueRow for StoredRow {
    const ROW_TYPE: RowType = RowType::Stored;

    fn key_size(&self) -> usize {
        let positions: usize = self.array_positions.iter().map(|&p| encoded_len(p)).sum();
        1 + self.doc_id.len() + 1 + 2 + positions
    }

    fn write_key(&self, buf: &mut Vec<u8>) {
        buf.push(Self::ROW_TYPE.tag());
        buf.extend_from_slice(self.doc_id.as_bytes());
        buf.push(BYTE_SEPARATOR);
        put_field_id(buf, self.field);
        for &position in &self.array_positions {
            put_u64(buf, position);
        }
    }

    fn value(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.value.len());
        buf.push(self.kind);
        buf.extend_from_slice(&self.value);
        buf
    }

    fn parse_kv(key: &[u8], value: &[u8]) -> Result<Self> {
        let body = key_body(key, Self::ROW_TYPE, "stored")?;
        let sep = body
            .iter()
            .position(|&b| b == BYTE_SEPARATOR)
            .ok_or_else(|| StrataError::malformed_row("stored row: missing separator"))?;
        if sep == 0 {
            return Err(StrataError::malformed_row("stored row: empty document id"));
        }
        let doc_id = read_utf8(&body[..sep], "stored", "document id")?;

        let rest = &body[sep + 1..];
        let field = read_field_id(rest, 0, "stored")?;

        let mut cursor = VarintCursor::new(&rest[2..]);
        let mut array_positions = Vec::new();
        while !cursor.is_empty() {
            array_positions.push(
                cursor
                    .read_u64()
                    .map_err(malformed("stored", "truncated array position"))?,
            );
        }

        let (&kind, raw) = value
            .split_first()
            .ok_or_else(|| StrataError::malformed_row("stored row: missing value type"))?;

        Ok(StoredRow {
            doc_id,
            field,
            array_positions,
            kind,
            value: raw.to_vec(),
        })
    }
}
