//! Barrel: a document database with CouchDB-style revision trees.
//!
//! Documents carry monotonically deepening revision histories with
//! deterministic winner election, every database serializes its writes
//! through a single writer task, and committed changes land on a by-seq
//! log that feeds incremental change feeds (normal, longpoll, and
//! event-stream).
//!
//! ```no_run
//! # async fn demo() -> barrel::Result<()> {
//! let barrel = barrel::Barrel::memory();
//! let db = barrel.open(barrel::Barrel::DEFAULT_STORE, "mydb").await?;
//!
//! let created = db.post(serde_json::json!({"title": "hello"})).await?;
//! let doc = db.get(&created.id).await?;
//! assert_eq!(doc.rev, Some(created.rev));
//!
//! let feed = db.changes_since(0, None).await?;
//! assert_eq!(feed.last_seq, 1);
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod registry;
pub mod store;
mod transactor;

pub use barrel_changes::{
    ChangesSource, DbEvent, EventBus, FeedHandle, FeedOptions, Subscription, event_source_feed,
    longpoll_feed, normal_feed,
};
pub use barrel_core::document::{
    AllDocsResponse, ChangesResponse, DbInfo, Doc, DocInfo, FoldOptions, GetOptions, PutOptions,
    PutResponse, Revision, RevsDiffResult,
};
pub use barrel_core::error::{BarrelError, ConflictKind, Result};
pub use barrel_core::kv::{BatchOp, Kv, WriteBatch};
pub use barrel_core::rev_tree::{RevInfo, RevTree, Winning};
pub use database::Database;
pub use registry::{Backend, Barrel, BarrelConfig, StoreDef};
pub use store::{DbId, Fold, Store};
