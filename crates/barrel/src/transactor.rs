//! The per-database writer: a single task that serializes every mutation.
//!
//! Commands arrive over a bounded channel and are processed strictly in
//! arrival order. Each accepted update allocates the next sequence number,
//! persists as one atomic store batch, and then publishes the new seq to
//! the owning database's shared state and event bus.

use tokio::sync::{mpsc, oneshot};

use barrel_core::document::{DocInfo, PutResponse};
use barrel_core::error::Result;
use barrel_core::update::{self, UpdateOp, UpdateOutcome};

use crate::database::DbShared;
use crate::store::{DbId, Store};

use std::sync::Arc;

pub(crate) enum WriteCommand {
    Update {
        op: UpdateOp,
        reply: oneshot::Sender<Result<PutResponse>>,
    },
    SystemWrite {
        id: String,
        value: serde_json::Value,
        reply: oneshot::Sender<Result<()>>,
    },
    SystemDelete {
        id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// Sending side of a writer's command channel.
#[derive(Clone)]
pub(crate) struct WriterHandle {
    tx: mpsc::Sender<WriteCommand>,
}

impl WriterHandle {
    pub(crate) async fn send(
        &self,
        cmd: WriteCommand,
    ) -> std::result::Result<(), mpsc::error::SendError<WriteCommand>> {
        self.tx.send(cmd).await
    }

    /// True once the writer task is gone.
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer for one database, resuming from `update_seq`.
pub(crate) fn spawn(
    store: Store,
    db: DbId,
    name: String,
    update_seq: u64,
    shared: Arc<DbShared>,
) -> WriterHandle {
    let (tx, rx) = mpsc::channel(128);
    let transactor = Transactor {
        store,
        db,
        name,
        update_seq,
        shared,
    };

    let join = tokio::spawn(transactor.run(rx));
    tokio::spawn(async move {
        if let Err(err) = join.await {
            tracing::error!(error = %err, "database writer crashed");
        }
    });

    WriterHandle { tx }
}

struct Transactor {
    store: Store,
    db: DbId,
    name: String,
    update_seq: u64,
    shared: Arc<DbShared>,
}

impl Transactor {
    async fn run(mut self, mut rx: mpsc::Receiver<WriteCommand>) {
        tracing::debug!(db = %self.name, seq = self.update_seq, "writer started");
        while let Some(cmd) = rx.recv().await {
            match cmd {
                WriteCommand::Update { op, reply } => {
                    let _ = reply.send(self.handle_update(op).await);
                }
                WriteCommand::SystemWrite { id, value, reply } => {
                    let _ = reply.send(self.store.write_system_doc(&self.db, &id, &value).await);
                }
                WriteCommand::SystemDelete { id, reply } => {
                    let _ = reply.send(self.store.delete_system_doc(&self.db, &id).await);
                }
                WriteCommand::Shutdown => break,
            }
        }
        tracing::debug!(db = %self.name, "writer stopped");
    }

    #[tracing::instrument(level = "debug", skip(self, op), fields(db = %self.name, doc = %op.doc_id()))]
    async fn handle_update(&mut self, op: UpdateOp) -> Result<PutResponse> {
        let docid = op.doc_id().to_string();
        let info = self
            .store
            .get_doc_info(&self.db, &docid)
            .await?
            .unwrap_or_else(|| DocInfo::new(&docid));
        // A stored record always carries the seq it was committed at; 0
        // means the doc has never had a by-seq row.
        let old_seq = (info.update_seq > 0).then_some(info.update_seq);

        match update::apply(op, info)? {
            UpdateOutcome::Unchanged { rev } => Ok(PutResponse {
                ok: true,
                id: docid,
                rev,
            }),
            UpdateOutcome::Commit {
                mut info,
                body,
                new_rev,
            } => {
                let new_seq = self.update_seq + 1;
                info.update_seq = new_seq;
                self.store
                    .commit(&self.db, &info, &body, &new_rev, new_seq, old_seq)
                    .await?;
                self.update_seq = new_seq;
                self.shared.publish(new_seq);
                tracing::debug!(seq = new_seq, rev = %new_rev, "committed");
                Ok(PutResponse {
                    ok: true,
                    id: docid,
                    rev: new_rev,
                })
            }
        }
    }
}
