//! In-memory key/value store for testing and temporary indexes.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::{Result, StrataError};
use crate::kv::{KvBatch, KvOp, KvStore};

/// A [`KvStore`] over a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored pairs.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Reject further reads and writes.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn check_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StrataError::storage("store is closed"))
        } else {
            Ok(())
        }
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_closed()?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check_closed()?;
        let entries = self.entries.read();
        Ok(entries
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn apply(&self, batch: KvBatch) -> Result<()> {
        self.check_closed()?;
        let mut entries = self.entries.write();
        for op in batch.into_ops() {
            match op {
                KvOp::Set(key, value) => {
                    entries.insert(key, value);
                }
                KvOp::Delete(key) => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_prefix_is_ordered() {
        let store = MemoryKvStore::new();
        let mut batch = KvBatch::new();
        batch.set(b"tb".to_vec(), b"2".to_vec());
        batch.set(b"ta".to_vec(), b"1".to_vec());
        batch.set(b"s".to_vec(), b"0".to_vec());
        batch.set(b"u".to_vec(), b"3".to_vec());
        store.apply(batch).unwrap();

        let rows = store.scan_prefix(b"t").unwrap();
        let keys: Vec<_> = rows.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"ta".as_slice(), b"tb".as_slice()]);
        assert_eq!(store.scan_prefix(b"").unwrap().len(), 4);
    }

    #[test]
    fn test_batch_last_write_wins() {
        let store = MemoryKvStore::new();
        let mut batch = KvBatch::new();
        batch.set(b"k".to_vec(), b"a".to_vec());
        batch.delete(b"k".to_vec());
        batch.set(b"k".to_vec(), b"b".to_vec());
        assert_eq!(batch.len(), 3);
        store.apply(batch).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"b".to_vec()));
    }

    #[test]
    fn test_closed_store() {
        let store = MemoryKvStore::new();
        store.close();
        assert!(store.get(b"k").is_err());
        assert!(store.apply(KvBatch::new()).is_err());
    }
}
