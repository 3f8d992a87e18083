//! Ordered key/value store boundary.
//!
//! Rows are persisted through [`KvStore`]: point lookups, ascending prefix
//! scans and atomic batches. Keys must come back in exactly the lexicographic
//! order they sort in, since row prefixes rely on it.

pub mod memory;

pub use memory::MemoryKvStore;

use crate::error::Result;

/// A single write in a [`KvBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    Set(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// A group of writes applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvBatch {
    ops: Vec<KvOp>,
}

impl KvBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(KvOp::Set(key, value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(KvOp::Delete(key));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[KvOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<KvOp> {
        self.ops
    }
}

/// An ordered byte-key/byte-value store.
pub trait KvStore: Send + Sync + std::fmt::Debug {
    /// Point lookup.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Every pair whose key starts with `prefix`, in ascending key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply every operation of `batch` or none of them. Later operations on
    /// the same key win.
    fn apply(&self, batch: KvBatch) -> Result<()>;
}
