//! The write algebra: what a single serialized update does to a document's
//! metadata, independent of storage.
//!
//! Operations cross the writer's channel as a tagged enum rather than a
//! closure; the writer applies them with [`apply`] and persists the
//! resulting [`UpdateOutcome`].

use serde_json::{Map, Value};

use crate::document::{Doc, DocInfo, Revision};
use crate::error::{BarrelError, ConflictKind, Result};
use crate::rev_tree::RevInfo;

/// A write request against one document.
#[derive(Debug, Clone)]
pub enum UpdateOp {
    /// Normal edit. With `lww` the write is accepted unconditionally,
    /// grafting onto the current winner.
    Put { doc: Doc, lww: bool },
    /// Replication write: a body plus its revision history, newest first.
    PutRev { doc: Doc, history: Vec<Revision> },
    /// Tombstone the given leaf revision.
    Delete { id: String, rev: Revision },
}

impl UpdateOp {
    pub fn doc_id(&self) -> &str {
        match self {
            UpdateOp::Put { doc, .. } | UpdateOp::PutRev { doc, .. } => &doc.id,
            UpdateOp::Delete { id, .. } => id,
        }
    }
}

/// What applying an [`UpdateOp`] decided.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// Persist `info` and `body` under `new_rev`, allocate a sequence.
    Commit {
        info: DocInfo,
        body: Doc,
        new_rev: Revision,
    },
    /// The tree already contained the revision; nothing to persist.
    Unchanged { rev: Revision },
}

/// Apply `op` to the current metadata of its document.
///
/// Pure: performs no I/O and never partially mutates on error.
pub fn apply(op: UpdateOp, info: DocInfo) -> Result<UpdateOutcome> {
    match op {
        UpdateOp::Put { doc, lww } => apply_put(doc, lww, info),
        UpdateOp::PutRev { doc, history } => apply_put_rev(doc, history, info),
        UpdateOp::Delete { id, rev } => {
            let doc = Doc {
                id,
                rev: Some(rev),
                deleted: true,
                data: Value::Object(Map::new()),
            };
            apply_put(doc, false, info)
        }
    }
}

fn apply_put(doc: Doc, lww: bool, mut info: DocInfo) -> Result<UpdateOutcome> {
    let current = info.current_rev.clone();

    let (new_pos, parent) = if lww {
        match (&current, &doc.rev) {
            (Some(cur), _) => (cur.pos + 1, Some(cur.clone())),
            (None, Some(rev)) => (rev.pos + 1, None),
            (None, None) => (1, None),
        }
    } else {
        match &doc.rev {
            None => match &current {
                None => (1, None),
                // The winner is a tombstone: a rev-less write resurrects
                // the document on top of it.
                Some(cur) if info.deleted => (cur.pos + 1, Some(cur.clone())),
                Some(_) => return Err(BarrelError::Conflict(ConflictKind::DocExists)),
            },
            Some(rev) => {
                if info.rev_tree.is_leaf(rev) {
                    (rev.pos + 1, Some(rev.clone()))
                } else {
                    return Err(BarrelError::Conflict(ConflictKind::RevisionConflict));
                }
            }
        }
    };

    let new_rev = Revision::mint(new_pos, doc.rev.as_ref(), &doc)?;
    info.rev_tree
        .add(RevInfo::new(new_rev.clone(), parent, doc.deleted));
    refresh_winner(&mut info);

    let body = Doc {
        rev: Some(new_rev.clone()),
        ..doc
    };
    Ok(UpdateOutcome::Commit {
        info,
        body,
        new_rev,
    })
}

fn apply_put_rev(doc: Doc, history: Vec<Revision>, mut info: DocInfo) -> Result<UpdateOutcome> {
    let new_rev = match history.first() {
        Some(rev) => rev.clone(),
        None => return Err(BarrelError::BadDoc("empty revision history".into())),
    };

    // Replaying an already-known revision is a no-op.
    if info.rev_tree.contains(&new_rev) {
        return Ok(UpdateOutcome::Unchanged { rev: new_rev });
    }

    // Graft point: the first member of the history the tree already has.
    // Everything before it is missing and gets added.
    let graft_idx = history
        .iter()
        .position(|rev| info.rev_tree.contains(rev))
        .unwrap_or(history.len());

    // Chain the missing prefix: each entry's parent is its successor in the
    // history; the oldest missing entry attaches to the graft point, or
    // becomes a root when the whole history is new. Only the newest carries
    // the tombstone flag.
    for i in (0..graft_idx).rev() {
        let parent = history.get(i + 1).cloned();
        let deleted = i == 0 && doc.deleted;
        info.rev_tree
            .add(RevInfo::new(history[i].clone(), parent, deleted));
    }
    refresh_winner(&mut info);

    let body = Doc {
        rev: Some(new_rev.clone()),
        ..doc
    };
    Ok(UpdateOutcome::Commit {
        info,
        body,
        new_rev,
    })
}

fn refresh_winner(info: &mut DocInfo) {
    match info.rev_tree.winning_revision() {
        Some(w) => {
            info.current_rev = Some(w.rev);
            info.branched = w.branched;
            info.conflict = w.conflict;
            info.deleted = w.deleted;
        }
        None => {
            info.current_rev = None;
            info.branched = false;
            info.conflict = false;
            info.deleted = false;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
