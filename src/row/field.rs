//! Field catalog rows: field id to field name.

use crate::error::{Result, StrataError};
use crate::row::{
    BYTE_SEPARATOR, KeyValueRow, RowType, key_body, put_field_id, read_field_id, read_utf8,
};

/// One entry of the field catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRow {
    pub index: u16,
    pub name: String,
}

impl FieldRow {
    pub fn new<S: Into<String>>(index: u16, name: S) -> Self {
        FieldRow {
            index,
            name: name.into(),
        }
    }
}

impl KeyValueRow for FieldRow {
    const ROW_TYPE: RowType = RowType::Field;

    fn key_size(&self) -> usize {
        3
    }

    fn write_key(&self, buf: &mut Vec<u8>) {
        buf.push(Self::ROW_TYPE.tag());
        put_field_id(buf, self.index);
    }

    fn value(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.name.len() + 1);
        buf.extend_from_slice(self.name.as_bytes());
        buf.push(BYTE_SEPARATOR);
        buf
    }

    fn parse_kv(key: &[u8], value: &[u8]) -> Result<Self> {
        let body = key_body(key, Self::ROW_TYPE, "field")?;
        let index = read_field_id(body, 0, "field")?;
        if body.len() > 2 {
            return Err(StrataError::malformed_row(
                "field row: unexpected key bytes after field id",
            ));
        }
        let end = value
            .iter()
            .position(|&b| b == BYTE_SEPARATOR)
            .ok_or_else(|| StrataError::malformed_row("field row: missing name separator"))?;
        if end + 1 != value.len() {
            return Err(StrataError::malformed_row(
                "field row: trailing bytes after name separator",
            ));
        }
        let name = read_utf8(&value[..end], "field", "name")?;
        Ok(FieldRow { index, name })
    }
}
