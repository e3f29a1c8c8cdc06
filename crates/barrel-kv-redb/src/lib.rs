//! Persistent ordered KV backend on top of redb.
//!
//! One table holds the whole keyspace; one redb write transaction per
//! [`WriteBatch`] gives the atomic multi-key commit the store layer
//! depends on. Engine errors surface as `BarrelError::Storage` with the
//! redb message preserved.

use std::ops::Bound;
use std::path::Path;

use async_trait::async_trait;
use redb::{Database, TableDefinition};

use barrel_core::error::{BarrelError, Result};
use barrel_core::kv::{BatchOp, Kv, WriteBatch};

const KV_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("barrel");

fn storage_err(err: impl std::fmt::Display) -> BarrelError {
    BarrelError::Storage(err.to_string())
}

pub struct RedbKv {
    db: Database,
}

impl RedbKv {
    /// Open the database file at `path`, creating it if absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path).map_err(storage_err)?;

        // Make sure the table exists so read transactions never race a
        // first write.
        let txn = db.begin_write().map_err(storage_err)?;
        txn.open_table(KV_TABLE).map_err(storage_err)?;
        txn.commit().map_err(storage_err)?;

        Ok(Self { db })
    }
}

#[async_trait]
impl Kv for RedbKv {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        let table = txn.open_table(KV_TABLE).map_err(storage_err)?;
        let value = table
            .get(key)
            .map_err(storage_err)?
            .map(|guard| guard.value().to_vec());
        Ok(value)
    }

    async fn write(&self, batch: WriteBatch) -> Result<()> {
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = txn.open_table(KV_TABLE).map_err(storage_err)?;
            for op in batch.into_ops() {
                match op {
                    BatchOp::Put { key, value } => {
                        table
                            .insert(key.as_slice(), value.as_slice())
                            .map_err(storage_err)?;
                    }
                    BatchOp::Delete { key } => {
                        table.remove(key.as_slice()).map_err(storage_err)?;
                    }
                }
            }
        }
        txn.commit().map_err(storage_err)?;
        Ok(())
    }

    async fn scan(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        let table = txn.open_table(KV_TABLE).map_err(storage_err)?;

        let upper = match end {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        let mut rows = Vec::new();
        let range = table
            .range::<&[u8]>((Bound::Included(start), upper))
            .map_err(storage_err)?;
        for item in range {
            if rows.len() >= limit.unwrap_or(usize::MAX) {
                break;
            }
            let (key, value) = item.map_err(storage_err)?;
            rows.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, RedbKv) {
        let dir = tempfile::tempdir().unwrap();
        let kv = RedbKv::open(dir.path().join("test.redb")).unwrap();
        (dir, kv)
    }

    #[tokio::test]
    async fn put_get_delete() {
        let (_dir, kv) = open_temp();

        let mut batch = WriteBatch::new();
        batch.put(b"k1".as_slice(), b"v1".as_slice());
        kv.write(batch).await.unwrap();
        assert_eq!(kv.get(b"k1").await.unwrap(), Some(b"v1".to_vec()));

        let mut batch = WriteBatch::new();
        batch.delete(b"k1".as_slice());
        kv.write(batch).await.unwrap();
        assert_eq!(kv.get(b"k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn scan_is_ordered_and_bounded() {
        let (_dir, kv) = open_temp();
        let mut batch = WriteBatch::new();
        for key in ["p/3", "p/1", "q/1", "p/2"] {
            batch.put(key.as_bytes(), key.as_bytes());
        }
        kv.write(batch).await.unwrap();

        let rows = kv.scan(b"p/", Some(b"p0"), None).await.unwrap();
        let keys: Vec<&[u8]> = rows.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"p/1".as_slice(), b"p/2", b"p/3"]);

        let rows = kv.scan(b"p/", Some(b"p0"), Some(1)).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reopen.redb");

        {
            let kv = RedbKv::open(&path).unwrap();
            let mut batch = WriteBatch::new();
            batch.put(b"durable".as_slice(), b"yes".as_slice());
            kv.write(batch).await.unwrap();
        }

        let kv = RedbKv::open(&path).unwrap();
        assert_eq!(kv.get(b"durable").await.unwrap(), Some(b"yes".to_vec()));
    }
}
