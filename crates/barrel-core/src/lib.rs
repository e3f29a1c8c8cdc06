//! Core types and algorithms for Barrel: the revision codec, the revision
//! tree, the pure update algebra, the ordered-KV seam, and the error type
//! shared across the workspace.

pub mod document;
pub mod error;
pub mod kv;
pub mod rev_tree;
pub mod update;

pub use document::{
    AllDocsResponse, ChangesResponse, DbInfo, Doc, DocInfo, FoldOptions, GetOptions, PutOptions,
    PutResponse, Revision, RevsDiffResult,
};
pub use error::{BarrelError, ConflictKind, Result};
pub use rev_tree::{RevInfo, RevTree, Winning};
pub use update::{UpdateOp, UpdateOutcome, apply};
