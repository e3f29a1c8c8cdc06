//! The database façade.
//!
//! Reads go straight to the store; writes funnel through the single-writer
//! task. The façade also owns the shared state the writer publishes into
//! (cached update seq + event bus) and respawns the writer if it ever goes
//! away.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, oneshot};

use barrel_changes::{ChangesSource, DbEvent, EventBus, Subscription};
use barrel_core::document::{
    AllDocsResponse, ChangesResponse, DbInfo, Doc, DocInfo, FoldOptions, GetOptions, PutOptions,
    PutResponse, Revision, RevsDiffResult,
};
use barrel_core::error::{BarrelError, Result};
use barrel_core::update::UpdateOp;

use crate::store::{DbId, Fold, Store};
use crate::transactor::{self, WriteCommand, WriterHandle};

/// State the writer publishes into after each commit; shared between the
/// façade, the writer, and bus subscribers.
pub(crate) struct DbShared {
    update_seq: AtomicU64,
    bus: EventBus,
}

impl DbShared {
    fn new(update_seq: u64) -> Self {
        Self {
            update_seq: AtomicU64::new(update_seq),
            bus: EventBus::default(),
        }
    }

    pub(crate) fn publish(&self, seq: u64) {
        self.update_seq.store(seq, Ordering::SeqCst);
        self.bus.notify(DbEvent::Updated { seq });
    }

    fn seq(&self) -> u64 {
        self.update_seq.load(Ordering::SeqCst)
    }

    fn set_seq(&self, seq: u64) {
        self.update_seq.store(seq, Ordering::SeqCst);
    }
}

/// One open database: a name, a store handle, and a writer.
pub struct Database {
    name: String,
    db: DbId,
    store: Store,
    shared: Arc<DbShared>,
    writer: Mutex<WriterHandle>,
    closed: AtomicBool,
}

impl Database {
    pub(crate) async fn open(
        store: Store,
        name: &str,
        create_if_missing: bool,
    ) -> Result<Arc<Self>> {
        let (db, seq) = store.open_db(name, create_if_missing).await?;
        let shared = Arc::new(DbShared::new(seq));
        let writer = transactor::spawn(
            store.clone(),
            db.clone(),
            name.to_string(),
            seq,
            shared.clone(),
        );

        Ok(Arc::new(Self {
            name: name.to_string(),
            db,
            store,
            shared,
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn id(&self) -> &DbId {
        &self.db
    }

    /// Highest committed sequence number; 0 for an empty database.
    pub fn update_seq(&self) -> u64 {
        self.shared.seq()
    }

    /// Register with this database's event bus.
    pub fn subscribe(&self) -> Subscription {
        self.shared.bus.subscribe()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BarrelError::NotFound(self.name.clone()))
        } else {
            Ok(())
        }
    }

    // -- reads ------------------------------------------------------------

    /// The current winning revision's body.
    pub async fn get(&self, docid: &str) -> Result<Doc> {
        self.get_with_opts(docid, GetOptions::default()).await
    }

    pub async fn get_with_opts(&self, docid: &str, opts: GetOptions) -> Result<Doc> {
        self.ensure_open()?;
        self.store.get_doc(&self.db, docid, &opts).await
    }

    pub async fn get_doc_info(&self, docid: &str) -> Result<Option<DocInfo>> {
        self.ensure_open()?;
        self.store.get_doc_info(&self.db, docid).await
    }

    /// Doc infos in DocID order.
    pub async fn infos(&self, opts: FoldOptions) -> Result<AllDocsResponse> {
        let rows = self
            .fold_by_id(&opts, Vec::new(), |mut acc, info| {
                acc.push(info);
                Ok(Fold::Continue(acc))
            })
            .await?;
        Ok(AllDocsResponse {
            total_rows: rows.len() as u64,
            offset: 0,
            rows,
        })
    }

    pub async fn fold_by_id<A>(
        &self,
        opts: &FoldOptions,
        acc: A,
        f: impl FnMut(A, DocInfo) -> Result<Fold<A>>,
    ) -> Result<A> {
        self.ensure_open()?;
        self.store.fold_by_id(&self.db, opts, acc, f).await
    }

    /// Changes committed after `since`, ascending, one row per document.
    ///
    /// `since` is the last seq the caller saw: a positive value scans from
    /// `since + 1`, zero scans from the beginning.
    pub async fn changes_since(&self, since: u64, max: Option<u64>) -> Result<ChangesResponse> {
        let results = self
            .fold_changes_since(since, max, Vec::new(), |mut acc, _seq, info| {
                acc.push(info);
                Ok(Fold::Continue(acc))
            })
            .await?;
        let last_seq = results
            .last()
            .map(|info| info.update_seq)
            .unwrap_or_else(|| self.update_seq());
        Ok(ChangesResponse { last_seq, results })
    }

    /// Fold-style variant of [`changes_since`](Self::changes_since); the
    /// closure can stop at any row boundary.
    pub async fn fold_changes_since<A>(
        &self,
        since: u64,
        max: Option<u64>,
        acc: A,
        f: impl FnMut(A, u64, DocInfo) -> Result<Fold<A>>,
    ) -> Result<A> {
        self.ensure_open()?;
        let from = if since > 0 { since + 1 } else { 0 };
        self.store.changes_since(&self.db, from, max, acc, f).await
    }

    /// Which of `revs` this database is missing, plus leaves (or their
    /// parents) from the input set that could serve as replication
    /// ancestors for them.
    pub async fn revs_diff(&self, docid: &str, revs: Vec<Revision>) -> Result<RevsDiffResult> {
        self.ensure_open()?;
        let info = match self.store.get_doc_info(&self.db, docid).await? {
            Some(info) => info,
            None => {
                return Ok(RevsDiffResult {
                    missing: revs,
                    possible_ancestors: Vec::new(),
                });
            }
        };

        let missing: Vec<Revision> = revs
            .iter()
            .filter(|rev| !info.rev_tree.contains(rev))
            .cloned()
            .collect();

        let input: HashSet<&Revision> = revs.iter().collect();
        let mut ancestors: Vec<Revision> = Vec::new();
        for miss in &missing {
            ancestors = info.rev_tree.fold_leaves(ancestors, |mut acc, leaf| {
                if input.contains(&leaf.id) {
                    if leaf.id.pos < miss.pos {
                        acc.push(leaf.id.clone());
                    } else if leaf.id.pos == miss.pos
                        && let Some(parent) = &leaf.parent
                    {
                        acc.push(parent.clone());
                    }
                }
                acc
            });
        }
        ancestors.sort();
        ancestors.dedup();

        Ok(RevsDiffResult {
            missing,
            possible_ancestors: ancestors,
        })
    }

    pub async fn info(&self) -> Result<DbInfo> {
        let doc_count = self
            .fold_by_id(&FoldOptions::default(), 0u64, |acc, info| {
                Ok(Fold::Continue(if info.deleted { acc } else { acc + 1 }))
            })
            .await?;
        Ok(DbInfo {
            db_name: self.name.clone(),
            doc_count,
            update_seq: self.update_seq(),
        })
    }

    pub async fn read_system_doc(&self, docid: &str) -> Result<serde_json::Value> {
        self.ensure_open()?;
        self.store.read_system_doc(&self.db, docid).await
    }

    // -- writes -----------------------------------------------------------

    /// Normal write: the body carries `_id` and, for updates, the `_rev`
    /// being replaced.
    pub async fn put(&self, doc: serde_json::Value) -> Result<PutResponse> {
        self.put_with_opts(doc, PutOptions::default()).await
    }

    pub async fn put_with_opts(
        &self,
        doc: serde_json::Value,
        opts: PutOptions,
    ) -> Result<PutResponse> {
        let doc = Doc::from_json(doc)?;
        if doc.id.is_empty() {
            return Err(BarrelError::BadDoc("missing _id".into()));
        }
        self.update(UpdateOp::Put { doc, lww: opts.lww }).await
    }

    /// Create with a generated DocID when the body carries none. Bodies
    /// with a `_rev` are rejected.
    pub async fn post(&self, doc: serde_json::Value) -> Result<PutResponse> {
        let mut doc = Doc::from_json(doc)?;
        if doc.rev.is_some() {
            return Err(BarrelError::BadDoc("_rev is not allowed in post".into()));
        }
        if doc.id.is_empty() {
            doc.id = uuid::Uuid::new_v4().simple().to_string();
        }
        self.update(UpdateOp::Put { doc, lww: false }).await
    }

    /// Tombstone the given leaf revision.
    pub async fn delete(&self, docid: &str, rev: &Revision) -> Result<PutResponse> {
        self.update(UpdateOp::Delete {
            id: docid.to_string(),
            rev: rev.clone(),
        })
        .await
    }

    /// Replication write: accept a body together with its revision history
    /// (newest first), grafting whatever part of the history is missing.
    pub async fn put_rev(
        &self,
        doc: serde_json::Value,
        history: Vec<Revision>,
    ) -> Result<PutResponse> {
        let doc = Doc::from_json(doc)?;
        if doc.id.is_empty() {
            return Err(BarrelError::BadDoc("missing _id".into()));
        }
        self.update(UpdateOp::PutRev { doc, history }).await
    }

    pub async fn write_system_doc(&self, docid: &str, value: serde_json::Value) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(WriteCommand::SystemWrite {
            id: docid.to_string(),
            value,
            reply,
        })
        .await?;
        self.await_reply(rx).await
    }

    pub async fn delete_system_doc(&self, docid: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(WriteCommand::SystemDelete {
            id: docid.to_string(),
            reply,
        })
        .await?;
        self.await_reply(rx).await
    }

    async fn update(&self, op: UpdateOp) -> Result<PutResponse> {
        let (reply, rx) = oneshot::channel();
        self.submit(WriteCommand::Update { op, reply }).await?;
        self.await_reply(rx).await
    }

    async fn submit(&self, cmd: WriteCommand) -> Result<()> {
        self.ensure_open()?;
        let writer = self.writer.lock().await.clone();
        if writer.send(cmd).await.is_err() {
            self.respawn_writer().await;
            return Err(BarrelError::WriterDown(self.name.clone()));
        }
        Ok(())
    }

    async fn await_reply<T>(&self, rx: oneshot::Receiver<Result<T>>) -> Result<T> {
        match rx.await {
            Ok(result) => result,
            // The writer dropped our reply without answering: it died
            // mid-request. The write is lost; the caller resubmits.
            Err(_) => {
                self.respawn_writer().await;
                Err(BarrelError::WriterDown(self.name.clone()))
            }
        }
    }

    /// Bring up a fresh writer, resuming from the persisted high-water
    /// mark. No-op when a live writer is already installed (a concurrent
    /// caller won the race) or the database has been closed.
    async fn respawn_writer(&self) {
        let mut guard = self.writer.lock().await;
        if !guard.is_closed() || self.closed.load(Ordering::SeqCst) {
            return;
        }

        let seq = match self.store.last_update_seq(&self.db).await {
            Ok(seq) => seq,
            Err(err) => {
                tracing::error!(db = %self.name, error = %err, "cannot reload update seq");
                return;
            }
        };
        self.shared.set_seq(seq);
        tracing::warn!(db = %self.name, seq, "respawning database writer");
        *guard = transactor::spawn(
            self.store.clone(),
            self.db.clone(),
            self.name.clone(),
            seq,
            self.shared.clone(),
        );
    }

    /// Stop accepting work and shut the writer down. Used by the registry
    /// when a database is cleaned.
    pub(crate) async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let writer = self.writer.lock().await.clone();
        let _ = writer.send(WriteCommand::Shutdown).await;
    }
}

#[async_trait]
impl ChangesSource for Database {
    async fn changes_since(&self, since: u64, max: Option<u64>) -> Result<ChangesResponse> {
        Database::changes_since(self, since, max).await
    }

    fn subscribe(&self) -> Subscription {
        Database::subscribe(self)
    }
}
