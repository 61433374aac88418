//! In-memory ordered storage
//!
//! A `BTreeMap` ordered by the store's [`KeyComparator`]. Used directly for
//! volatile stores and as the index behind the durable log backend.
//!
//! Iterators do not hold the map lock between steps: each step re-enters the
//! map strictly after the last key returned, so writers are never blocked by
//! an open scan and a scan observes writes that land ahead of it.

use crate::codec::KeyComparator;
use crate::error::{Error, Result};
use crate::storage::engine::{BatchOp, KvPair, StorageEngine, StorageIterator, WriteBatch};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::debug;

/// Map key carrying the comparator that orders it.
#[derive(Debug, Clone)]
struct SortKey {
    bytes: Vec<u8>,
    comparator: KeyComparator,
}

impl SortKey {
    fn new(bytes: &[u8], comparator: KeyComparator) -> Self {
        Self {
            bytes: bytes.to_vec(),
            comparator,
        }
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.comparator.compare(&self.bytes, &other.bytes)
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

struct Shared {
    map: RwLock<BTreeMap<SortKey, Vec<u8>>>,
    comparator: KeyComparator,
    closed: AtomicBool,
    open_iterators: AtomicUsize,
}

impl Shared {
    /// First entry above `lower` and below `upper`.
    fn first_in(&self, lower: Bound<SortKey>, upper: Option<&SortKey>) -> Option<(Vec<u8>, Vec<u8>)> {
        if let Some(end) = upper {
            let empty = match &lower {
                Bound::Included(k) => k >= end,
                Bound::Excluded(k) => k >= end,
                Bound::Unbounded => false,
            };
            if empty {
                return None;
            }
        }
        let upper = match upper {
            Some(end) => Bound::Excluded(end.clone()),
            None => Bound::Unbounded,
        };
        self.map
            .read()
            .range((lower, upper))
            .next()
            .map(|(k, v)| (k.bytes.clone(), v.clone()))
    }
}

/// Volatile ordered key-value store.
#[derive(Clone)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("comparator", &self.shared.comparator)
            .field("len", &self.len())
            .finish()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Create an empty store ordered by the numeric-aware comparator
    pub fn new() -> Self {
        Self::with_comparator(KeyComparator::default())
    }

    pub fn with_comparator(comparator: KeyComparator) -> Self {
        Self {
            shared: Arc::new(Shared {
                map: RwLock::new(BTreeMap::new()),
                comparator,
                closed: AtomicBool::new(false),
                open_iterators: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.shared.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.map.read().is_empty()
    }

    /// Iterators created and not yet released
    pub fn open_iterators(&self) -> usize {
        self.shared.open_iterators.load(AtomicOrdering::SeqCst)
    }

    /// All pairs in comparator order.
    pub(crate) fn snapshot(&self) -> Vec<KvPair> {
        self.shared
            .map
            .read()
            .iter()
            .map(|(k, v)| KvPair::new(k.bytes.clone(), v.clone()))
            .collect()
    }

    /// Applies operations under a single write lock.
    pub(crate) fn apply(&self, ops: Vec<BatchOp>) {
        let comparator = self.shared.comparator;
        let mut map = self.shared.map.write();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(
                        SortKey {
                            bytes: key,
                            comparator,
                        },
                        value,
                    );
                }
                BatchOp::Delete { key } => {
                    map.remove(&SortKey {
                        bytes: key,
                        comparator,
                    });
                }
            }
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.shared.closed.store(true, AtomicOrdering::SeqCst);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.closed.load(AtomicOrdering::SeqCst) {
            return Err(Error::Storage("store is closed".to_string()));
        }
        Ok(())
    }

    fn sort_key(&self, key: &[u8]) -> SortKey {
        SortKey::new(key, self.shared.comparator)
    }
}

impl StorageEngine for MemoryStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.shared.map.read().get(&self.sort_key(key)).cloned())
    }

    fn scan(&self, start: &[u8], end: Option<&[u8]>, limit: usize) -> Result<Vec<KvPair>> {
        self.ensure_open()?;
        let start = self.sort_key(start);
        let end = end.map(|e| self.sort_key(e));
        if let Some(end) = &end {
            if &start >= end {
                return Ok(Vec::new());
            }
        }
        let upper = match end {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        let cap = if limit == 0 { usize::MAX } else { limit };

        let map = self.shared.map.read();
        let pairs: Vec<KvPair> = map
            .range((Bound::Included(start), upper))
            .take(cap)
            .map(|(k, v)| KvPair::new(k.bytes.clone(), v.clone()))
            .collect();

        debug!(count = pairs.len(), limit, "Scanned memory store");
        Ok(pairs)
    }

    fn iter(&self, start: &[u8], end: Option<&[u8]>) -> Result<Box<dyn StorageIterator>> {
        self.ensure_open()?;
        let lower = self.sort_key(start);
        let upper = end.map(|e| self.sort_key(e));
        let current = self
            .shared
            .first_in(Bound::Included(lower.clone()), upper.as_ref());

        self.shared.open_iterators.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(Box::new(MemoryIterator {
            shared: Arc::clone(&self.shared),
            lower,
            upper,
            current,
            error: None,
            released: false,
        }))
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        self.ensure_open()?;
        let ops = batch.len();
        self.apply(batch.into_ops());
        debug!(ops, "Applied write batch");
        Ok(())
    }

    fn comparator(&self) -> KeyComparator {
        self.shared.comparator
    }

    fn close(&self) -> Result<()> {
        self.mark_closed();
        self.shared.map.write().clear();
        Ok(())
    }
}

/// Iterator over a [`MemoryStorage`] range.
pub struct MemoryIterator {
    shared: Arc<Shared>,
    lower: SortKey,
    upper: Option<SortKey>,
    current: Option<(Vec<u8>, Vec<u8>)>,
    error: Option<String>,
    released: bool,
}

impl MemoryIterator {
    fn store_closed(&mut self) -> bool {
        if self.shared.closed.load(AtomicOrdering::SeqCst) {
            self.error = Some("store closed during iteration".to_string());
            self.current = None;
            return true;
        }
        false
    }
}

impl StorageIterator for MemoryIterator {
    fn valid(&self) -> bool {
        !self.released && self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map(|(k, _)| k.as_slice()).unwrap_or(&[])
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map(|(_, v)| v.as_slice()).unwrap_or(&[])
    }

    fn next(&mut self) {
        if self.released || self.store_closed() {
            return;
        }
        if let Some((key, _)) = self.current.take() {
            let after = SortKey {
                bytes: key,
                comparator: self.shared.comparator,
            };
            self.current = self.shared.first_in(Bound::Excluded(after), self.upper.as_ref());
        }
    }

    fn seek(&mut self, key: &[u8]) {
        if self.released || self.store_closed() {
            return;
        }
        let target = SortKey::new(key, self.shared.comparator);
        let target = if target < self.lower {
            self.lower.clone()
        } else {
            target
        };
        self.current = self.shared.first_in(Bound::Included(target), self.upper.as_ref());
    }

    fn status(&self) -> Result<()> {
        match &self.error {
            Some(e) => Err(Error::Storage(e.clone())),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        if !self.released {
            self.released = true;
            self.current = None;
            self.shared.open_iterators.fetch_sub(1, AtomicOrdering::SeqCst);
        }
    }
}

impl Drop for MemoryIterator {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(pairs: &[KvPair]) -> Vec<String> {
        pairs
            .iter()
            .map(|p| String::from_utf8_lossy(&p.key).to_string())
            .collect()
    }

    #[test]
    fn test_memory_storage_basic_ops() -> Result<()> {
        let storage = MemoryStorage::new();

        storage.put(b"key1", b"value1")?;
        assert_eq!(storage.get(b"key1")?, Some(b"value1".to_vec()));

        storage.delete(b"key1")?;
        assert_eq!(storage.get(b"key1")?, None);
        assert!(storage.is_empty());
        Ok(())
    }

    #[test]
    fn test_scan_uses_numeric_order() -> Result<()> {
        let storage = MemoryStorage::new();
        for id in [10u64, 2, 1, 30, 3] {
            storage.put(format!("t_r_1_{}", id).as_bytes(), b"{}")?;
        }

        let all = storage.scan(b"t_r_1_1", None, 0)?;
        assert_eq!(
            keys(&all),
            vec!["t_r_1_1", "t_r_1_2", "t_r_1_3", "t_r_1_10", "t_r_1_30"]
        );

        let bounded = storage.scan(b"t_r_1_2", Some(b"t_r_1_30"), 2)?;
        assert_eq!(keys(&bounded), vec!["t_r_1_2", "t_r_1_3"]);

        // empty and inverted ranges
        assert!(storage.scan(b"t_r_1_5", Some(b"t_r_1_5"), 0)?.is_empty());
        assert!(storage.scan(b"t_r_1_9", Some(b"t_r_1_5"), 0)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_mixed_values_keep_exact_lookups() -> Result<()> {
        let storage = MemoryStorage::new();
        for value in ["10", "9", "1a", "10", "9", "1a"] {
            storage.put(format!("t_i_1_2_{}", value).as_bytes(), value.as_bytes())?;
            storage.put(format!("t_i_1_3_{}_7", value).as_bytes(), b"7")?;
        }
        assert_eq!(storage.len(), 6);

        for value in ["9", "10", "1a"] {
            let key = format!("t_i_1_2_{}", value);
            assert_eq!(storage.get(key.as_bytes())?, Some(value.as_bytes().to_vec()));
        }
        assert_eq!(
            keys(&storage.scan(b"t_i_1_2_", Some(b"t_i_1_3_"), 0)?),
            vec!["t_i_1_2_9", "t_i_1_2_10", "t_i_1_2_1a"]
        );

        storage.delete(b"t_i_1_3_10_7")?;
        assert_eq!(storage.get(b"t_i_1_3_10_7")?, None);
        assert_eq!(storage.len(), 5);
        Ok(())
    }

    #[test]
    fn test_bytewise_storage_order() -> Result<()> {
        let storage = MemoryStorage::with_comparator(KeyComparator::Bytewise);
        storage.batch_put(vec![
            (b"t_2".to_vec(), vec![]),
            (b"t_10".to_vec(), vec![]),
        ])?;
        assert_eq!(keys(&storage.scan(b"", None, 0)?), vec!["t_10", "t_2"]);
        Ok(())
    }

    #[test]
    fn test_iterator_walk_and_seek() -> Result<()> {
        let storage = MemoryStorage::new();
        for id in 1..=5u64 {
            storage.put(format!("k_{}", id).as_bytes(), id.to_string().as_bytes())?;
        }

        let mut iter = storage.iter(b"k_2", Some(b"k_5"))?;
        let mut seen = Vec::new();
        while iter.valid() {
            seen.push(String::from_utf8_lossy(iter.key()).to_string());
            iter.next();
        }
        assert_eq!(seen, vec!["k_2", "k_3", "k_4"]);

        // exhausted iterator stays invalid
        iter.next();
        assert!(!iter.valid());
        assert!(iter.key().is_empty());

        iter.seek(b"k_3");
        assert!(iter.valid());
        assert_eq!(iter.value(), b"3");

        // seeking below the lower bound clamps to it
        iter.seek(b"k_1");
        assert_eq!(iter.key(), b"k_2");

        assert!(iter.valid_for_prefix(b"k_"));
        assert!(!iter.valid_for_prefix(b"x_"));
        Ok(())
    }

    #[test]
    fn test_iterator_sees_later_writes() -> Result<()> {
        let storage = MemoryStorage::new();
        storage.put(b"k_1", b"a")?;
        storage.put(b"k_3", b"c")?;

        let mut iter = storage.iter(b"k_1", None)?;
        assert_eq!(iter.key(), b"k_1");
        storage.put(b"k_2", b"b")?;
        iter.next();
        assert_eq!(iter.key(), b"k_2");
        Ok(())
    }

    #[test]
    fn test_iterators_released_on_close_and_drop() -> Result<()> {
        let storage = MemoryStorage::new();
        let mut first = storage.iter(b"", None)?;
        let second = storage.iter(b"", None)?;
        assert_eq!(storage.open_iterators(), 2);

        first.close();
        first.close();
        assert_eq!(storage.open_iterators(), 1);

        drop(second);
        assert_eq!(storage.open_iterators(), 0);
        Ok(())
    }

    #[test]
    fn test_write_batch_applies_in_order() -> Result<()> {
        let storage = MemoryStorage::new();
        storage.put(b"a", b"old")?;

        let mut batch = WriteBatch::new();
        batch
            .delete(b"a".to_vec())
            .put(b"a".to_vec(), b"new".to_vec())
            .put(b"b".to_vec(), b"1".to_vec());
        storage.write_batch(batch)?;

        assert_eq!(storage.get(b"a")?, Some(b"new".to_vec()));
        let values = storage.batch_get(&[b"a".to_vec(), b"z".to_vec()])?;
        assert_eq!(values, vec![Some(b"new".to_vec()), None]);
        Ok(())
    }

    #[test]
    fn test_closed_store_rejects_operations() -> Result<()> {
        let storage = MemoryStorage::new();
        storage.put(b"a", b"1")?;
        let mut iter = storage.iter(b"", None)?;

        storage.close()?;
        assert!(matches!(storage.get(b"a"), Err(Error::Storage(_))));

        iter.next();
        assert!(!iter.valid());
        assert!(iter.status().is_err());
        Ok(())
    }
}
