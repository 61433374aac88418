//! Storage engine traits

use crate::codec::KeyComparator;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// A key/value pair returned by scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl KvPair {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { key, value }
    }
}

/// Single operation of a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOp {
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// Ordered list of puts and deletes applied as one unit.
///
/// Operations are applied in insertion order, so a delete followed by a put of
/// the same key leaves the key present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ops: Vec::with_capacity(capacity),
        }
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Put { key, value });
        self
    }

    pub fn delete(&mut self, key: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Delete { key });
        self
    }

    /// Appends all operations of `other`.
    pub fn extend(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

impl From<Vec<BatchOp>> for WriteBatch {
    fn from(ops: Vec<BatchOp>) -> Self {
        Self { ops }
    }
}

/// Ordered key-value backend.
///
/// Every scan and iterator follows [`StorageEngine::comparator`]. Range ends
/// are exclusive; `None` means unbounded.
pub trait StorageEngine: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn batch_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Collects up to `limit` pairs in `[start, end)`. A limit of 0 means no cap.
    fn scan(&self, start: &[u8], end: Option<&[u8]>, limit: usize) -> Result<Vec<KvPair>>;

    /// Opens an iterator over `[start, end)`, positioned at the first entry.
    fn iter(&self, start: &[u8], end: Option<&[u8]>) -> Result<Box<dyn StorageIterator>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::with_capacity(1);
        batch.put(key.to_vec(), value.to_vec());
        self.write_batch(batch)
    }

    fn batch_put(&self, pairs: Vec<(Vec<u8>, Vec<u8>)>) -> Result<()> {
        let mut batch = WriteBatch::with_capacity(pairs.len());
        for (key, value) in pairs {
            batch.put(key, value);
        }
        self.write_batch(batch)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::with_capacity(1);
        batch.delete(key.to_vec());
        self.write_batch(batch)
    }

    fn batch_delete(&self, keys: Vec<Vec<u8>>) -> Result<()> {
        let mut batch = WriteBatch::with_capacity(keys.len());
        for key in keys {
            batch.delete(key);
        }
        self.write_batch(batch)
    }

    /// Applies a mixed batch atomically with respect to other writers.
    fn write_batch(&self, batch: WriteBatch) -> Result<()>;

    fn comparator(&self) -> KeyComparator;

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Rewrites on-disk state into its smallest form. No-op for volatile backends.
    fn compact(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()>;
}

/// Cursor over an ordered key range.
///
/// `key` and `value` are only meaningful while `valid` is true. The iterator
/// is released on [`StorageIterator::close`] or on drop, whichever comes first.
pub trait StorageIterator: Send {
    fn valid(&self) -> bool;

    fn key(&self) -> &[u8];

    fn value(&self) -> &[u8];

    fn next(&mut self);

    /// Positions at the first entry whose key is not less than `key`.
    fn seek(&mut self, key: &[u8]);

    fn valid_for_prefix(&self, prefix: &[u8]) -> bool {
        self.valid() && self.key().starts_with(prefix)
    }

    /// Error that invalidated the iterator, if any.
    fn status(&self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self);
}
