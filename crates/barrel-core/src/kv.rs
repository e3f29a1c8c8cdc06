//! The ordered key-value seam the store layer is written against.
//!
//! Backends only need three things: point reads, atomic multi-key write
//! batches, and ascending range scans. Everything else (keyspaces,
//! sequence encoding, document semantics) lives above this trait.

use async_trait::async_trait;

use crate::error::Result;

/// One staged mutation inside a [`WriteBatch`].
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// An ordered set of mutations applied atomically.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
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

/// An ordered byte-keyed store.
#[async_trait]
pub trait Kv: Send + Sync + 'static {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Apply every op in `batch` atomically: readers observe all or none.
    async fn write(&self, batch: WriteBatch) -> Result<()>;

    /// Keys in `[start, end)` ascending; `end = None` scans to the end of
    /// the keyspace. `limit` caps the row count.
    async fn scan(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// Smallest key strictly greater than every key with `prefix`, or `None`
/// when the prefix is all `0xff` and no such key exists.
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xff {
            *last += 1;
            return Some(end);
        }
        end.pop();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_end_increments_last_byte() {
        assert_eq!(prefix_end(b"abc"), Some(b"abd".to_vec()));
    }

    #[test]
    fn prefix_end_carries_over_ff() {
        assert_eq!(prefix_end(&[0x61, 0xff]), Some(vec![0x62]));
        assert_eq!(prefix_end(&[0xff, 0xff]), None);
    }

    #[test]
    fn batch_preserves_op_order() {
        let mut batch = WriteBatch::new();
        batch.put(b"a".as_slice(), b"1".as_slice());
        batch.delete(b"b".as_slice());
        batch.put(b"c".as_slice(), b"3".as_slice());

        assert_eq!(batch.ops().len(), 3);
        assert!(matches!(batch.ops()[1], BatchOp::Delete { .. }));
    }
}
