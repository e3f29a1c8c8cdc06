//! The store layer: document semantics over an opaque ordered KV.
//!
//! Each database owns four namespaces plus a meta key, all prefixed by the
//! database's catalog-assigned id:
//!
//! ```text
//! dbs|<name>             catalog entry (store-global)
//! <dbid>|meta            last committed update seq
//! <dbid>|D|<docid>       DocInfo
//! <dbid>|B|<docid>|<rev> body bytes
//! <dbid>|S|<be64 seq>    DocInfo snapshot, keyed so byte order is seq order
//! <dbid>|Y|<docid>       system doc body
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use barrel_core::document::{Doc, DocInfo, FoldOptions, GetOptions, Revision};
use barrel_core::error::{BarrelError, Result};
use barrel_core::kv::{Kv, WriteBatch, prefix_end};

/// Opaque identifier binding a database's keys together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbId(String);

impl DbId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Flow control for the fold-style scans: keep going or stop at this row.
#[derive(Debug)]
pub enum Fold<A> {
    Continue(A),
    Stop(A),
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogEntry {
    id: String,
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct DbMeta {
    last_update_seq: u64,
}

fn catalog_key(name: &str) -> Vec<u8> {
    format!("dbs|{name}").into_bytes()
}

fn db_prefix(db: &DbId) -> Vec<u8> {
    format!("{}|", db.0).into_bytes()
}

fn meta_key(db: &DbId) -> Vec<u8> {
    format!("{}|meta", db.0).into_bytes()
}

fn doc_info_prefix(db: &DbId) -> Vec<u8> {
    format!("{}|D|", db.0).into_bytes()
}

fn doc_info_key(db: &DbId, docid: &str) -> Vec<u8> {
    format!("{}|D|{docid}", db.0).into_bytes()
}

fn doc_body_key(db: &DbId, docid: &str, rev: &Revision) -> Vec<u8> {
    format!("{}|B|{docid}|{rev}", db.0).into_bytes()
}

fn by_seq_prefix(db: &DbId) -> Vec<u8> {
    format!("{}|S|", db.0).into_bytes()
}

fn by_seq_key(db: &DbId, seq: u64) -> Vec<u8> {
    let mut key = by_seq_prefix(db);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn sys_doc_key(db: &DbId, docid: &str) -> Vec<u8> {
    format!("{}|Y|{docid}", db.0).into_bytes()
}

fn seq_from_key(key: &[u8]) -> Option<u64> {
    let tail: [u8; 8] = key.get(key.len().checked_sub(8)?..)?.try_into().ok()?;
    Some(u64::from_be_bytes(tail))
}

/// Store handle for one KV backend. Cheap to clone; every database of the
/// owning store shares it.
#[derive(Clone)]
pub struct Store {
    kv: Arc<dyn Kv>,
}

impl Store {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    /// Look up `name` in the catalog, creating it when asked to.
    pub async fn open_db(&self, name: &str, create_if_missing: bool) -> Result<(DbId, u64)> {
        match self.kv.get(&catalog_key(name)).await? {
            Some(bytes) => {
                let entry: CatalogEntry = serde_json::from_slice(&bytes)?;
                let db = DbId(entry.id);
                let seq = self.last_update_seq(&db).await?;
                Ok((db, seq))
            }
            None if create_if_missing => {
                let id = uuid::Uuid::new_v4().simple().to_string();
                let entry = CatalogEntry {
                    id: id.clone(),
                    name: name.to_string(),
                };
                let db = DbId(id);

                let mut batch = WriteBatch::new();
                batch.put(catalog_key(name), serde_json::to_vec(&entry)?);
                batch.put(
                    meta_key(&db),
                    serde_json::to_vec(&DbMeta { last_update_seq: 0 })?,
                );
                self.kv.write(batch).await?;
                Ok((db, 0))
            }
            None => Err(BarrelError::NotFound(name.to_string())),
        }
    }

    /// Persisted high-water mark; what a fresh writer resumes from.
    pub async fn last_update_seq(&self, db: &DbId) -> Result<u64> {
        match self.kv.get(&meta_key(db)).await? {
            Some(bytes) => Ok(serde_json::from_slice::<DbMeta>(&bytes)?.last_update_seq),
            None => Ok(0),
        }
    }

    pub async fn get_doc_info(&self, db: &DbId, docid: &str) -> Result<Option<DocInfo>> {
        match self.kv.get(&doc_info_key(db, docid)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read a body: the current winner by default, a specific revision when
    /// asked. A deleted winner reads as `NotFound` unless the revision is
    /// named explicitly.
    pub async fn get_doc(&self, db: &DbId, docid: &str, opts: &GetOptions) -> Result<Doc> {
        let info = self
            .get_doc_info(db, docid)
            .await?
            .ok_or_else(|| BarrelError::NotFound(docid.to_string()))?;

        let rev = match &opts.rev {
            Some(rev) => rev.clone(),
            None => {
                if info.deleted {
                    return Err(BarrelError::NotFound(docid.to_string()));
                }
                info.current_rev
                    .clone()
                    .ok_or_else(|| BarrelError::NotFound(docid.to_string()))?
            }
        };

        let bytes = self
            .kv
            .get(&doc_body_key(db, docid, &rev))
            .await?
            .ok_or_else(|| BarrelError::NotFound(format!("{docid} rev {rev}")))?;
        let mut value: serde_json::Value = serde_json::from_slice(&bytes)?;

        if opts.history {
            let path = info
                .rev_tree
                .path_to_root(&rev, opts.max_history, &opts.ancestors);
            if let Some(first) = path.first() {
                let ids: Vec<serde_json::Value> = path
                    .iter()
                    .map(|r| serde_json::Value::String(r.hash.clone()))
                    .collect();
                value["_revisions"] = serde_json::json!({
                    "start": first.pos,
                    "ids": ids,
                });
            }
        }

        Doc::from_json(value)
    }

    /// Fold over doc infos in DocID order. `end_key` is inclusive; `max`
    /// caps the scan. The closure can stop at any row boundary.
    pub async fn fold_by_id<A>(
        &self,
        db: &DbId,
        opts: &FoldOptions,
        acc: A,
        mut f: impl FnMut(A, DocInfo) -> Result<Fold<A>>,
    ) -> Result<A> {
        let mut start = doc_info_prefix(db);
        if let Some(start_key) = &opts.start_key {
            start.extend_from_slice(start_key.as_bytes());
        }
        let end = match &opts.end_key {
            Some(end_key) => {
                let mut end = doc_info_prefix(db);
                end.extend_from_slice(end_key.as_bytes());
                // One zero byte past the inclusive end key.
                end.push(0);
                Some(end)
            }
            None => prefix_end(&doc_info_prefix(db)),
        };

        let limit = opts.max.map(|m| m as usize);
        let rows = self.kv.scan(&start, end.as_deref(), limit).await?;

        let mut acc = acc;
        for (_key, value) in rows {
            let info: DocInfo = serde_json::from_slice(&value)?;
            match f(acc, info)? {
                Fold::Continue(next) => acc = next,
                Fold::Stop(next) => return Ok(next),
            }
        }
        Ok(acc)
    }

    /// Fold over by-seq rows with `seq >= from`, ascending.
    pub async fn changes_since<A>(
        &self,
        db: &DbId,
        from: u64,
        max: Option<u64>,
        acc: A,
        mut f: impl FnMut(A, u64, DocInfo) -> Result<Fold<A>>,
    ) -> Result<A> {
        let start = by_seq_key(db, from);
        let end = prefix_end(&by_seq_prefix(db));
        let limit = max.map(|m| m as usize);
        let rows = self.kv.scan(&start, end.as_deref(), limit).await?;

        let mut acc = acc;
        for (key, value) in rows {
            let info: DocInfo = serde_json::from_slice(&value)?;
            let seq = seq_from_key(&key).unwrap_or(info.update_seq);
            match f(acc, seq, info)? {
                Fold::Continue(next) => acc = next,
                Fold::Stop(next) => return Ok(next),
            }
        }
        Ok(acc)
    }

    /// Persist one accepted update as a single atomic batch: doc info, body,
    /// by-seq snapshot, removal of the doc's previous by-seq row, and the
    /// meta high-water mark.
    pub async fn commit(
        &self,
        db: &DbId,
        info: &DocInfo,
        body: &Doc,
        new_rev: &Revision,
        new_seq: u64,
        old_seq: Option<u64>,
    ) -> Result<()> {
        let info_bytes = serde_json::to_vec(info)?;

        let mut batch = WriteBatch::new();
        batch.put(doc_info_key(db, &info.id), info_bytes.clone());
        batch.put(
            doc_body_key(db, &info.id, new_rev),
            serde_json::to_vec(&body.to_json())?,
        );
        batch.put(by_seq_key(db, new_seq), info_bytes);
        if let Some(old) = old_seq {
            batch.delete(by_seq_key(db, old));
        }
        batch.put(
            meta_key(db),
            serde_json::to_vec(&DbMeta {
                last_update_seq: new_seq,
            })?,
        );

        self.kv.write(batch).await
    }

    /// Drop the catalog entry and every key of the database.
    pub async fn clean_db(&self, name: &str, db: &DbId) -> Result<()> {
        let prefix = db_prefix(db);
        let rows = self
            .kv
            .scan(&prefix, prefix_end(&prefix).as_deref(), None)
            .await?;

        let mut batch = WriteBatch::new();
        batch.delete(catalog_key(name));
        for (key, _) in rows {
            batch.delete(key);
        }
        self.kv.write(batch).await
    }

    // System docs live beside the revisioned namespaces and never touch the
    // revision machinery or the by-seq index.

    pub async fn write_system_doc(
        &self,
        db: &DbId,
        docid: &str,
        value: &serde_json::Value,
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(sys_doc_key(db, docid), serde_json::to_vec(value)?);
        self.kv.write(batch).await
    }

    pub async fn read_system_doc(&self, db: &DbId, docid: &str) -> Result<serde_json::Value> {
        match self.kv.get(&sys_doc_key(db, docid)).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(BarrelError::NotFound(docid.to_string())),
        }
    }

    pub async fn delete_system_doc(&self, db: &DbId, docid: &str) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(sys_doc_key(db, docid));
        self.kv.write(batch).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
