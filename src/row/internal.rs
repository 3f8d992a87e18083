//! Internal rows: opaque metadata stored alongside the index.

use crate::error::Result;
use crate::row::{KeyValueRow, RowType, key_body};

/// Caller-owned metadata, e.g. a serialized mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalRow {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl InternalRow {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        InternalRow { key, value }
    }

    /// Full store key for an internal key.
    pub fn key_for(key: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + key.len());
        buf.push(Self::ROW_TYPE.tag());
        buf.extend_from_slice(key);
        buf
    }
}

impl KeyValueRow for InternalRow {
    const ROW_TYPE: RowType = RowType::Internal;

    fn key_size(&self) -> usize {
        1 + self.key.len()
    }

    fn write_key(&self, buf: &mut Vec<u8>) {
        buf.push(Self::ROW_TYPE.tag());
        buf.extend_from_slice(&self.key);
    }

    fn value(&self) -> Vec<u8> {
        self.value.clone()
    }

    fn parse_kv(key: &[u8], value: &[u8]) -> Result<Self> {
        Ok(InternalRow {
            key: key_body(key, Self::ROW_TYPE, "internal")?.to_vec(),
            value: value.to_vec(),
        })
    }
}
