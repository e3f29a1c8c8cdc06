//! Revision tree in mapping form.
//!
//! Every entry points at its parent by revision id; roots have no parent.
//! Generations strictly increase away from the root, so the mapping is
//! acyclic by construction. A leaf is an entry no other entry names as its
//! parent.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::document::Revision;

fn is_false(v: &bool) -> bool {
    !*v
}

/// One revision in the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevInfo {
    pub id: Revision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Revision>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

impl RevInfo {
    pub fn new(id: Revision, parent: Option<Revision>, deleted: bool) -> Self {
        Self {
            id,
            parent,
            deleted,
        }
    }
}

/// The winner election result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Winning {
    pub rev: Revision,
    /// The winner is a tombstone (every leaf is deleted).
    pub deleted: bool,
    /// More than one leaf exists.
    pub branched: bool,
    /// More than one non-deleted leaf exists.
    pub conflict: bool,
}

/// Mapping from revision id to [`RevInfo`].
///
/// Serializes as a JSON object keyed by the `"{pos}-{hash}"` form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevTree {
    entries: HashMap<Revision, RevInfo>,
}

impl RevTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or overwrite an entry.
    ///
    /// No parent-existence check: callers staging a batch of related
    /// revisions insert them in any order and are responsible for ending up
    /// with every named parent present.
    pub fn add(&mut self, info: RevInfo) {
        self.entries.insert(info.id.clone(), info);
    }

    pub fn contains(&self, rev: &Revision) -> bool {
        self.entries.contains_key(rev)
    }

    pub fn get(&self, rev: &Revision) -> Option<&RevInfo> {
        self.entries.get(rev)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RevInfo> {
        self.entries.values()
    }

    /// True iff `rev` is present and no other entry names it as parent.
    pub fn is_leaf(&self, rev: &Revision) -> bool {
        self.contains(rev)
            && !self
                .entries
                .values()
                .any(|info| info.parent.as_ref() == Some(rev))
    }

    /// All leaves, sorted descending by `(pos, hash)` so iteration order is
    /// deterministic and the winner candidate comes first.
    pub fn leaves(&self) -> Vec<&RevInfo> {
        let mut leaves: Vec<&RevInfo> = self
            .entries
            .values()
            .filter(|info| self.is_leaf(&info.id))
            .collect();
        leaves.sort_by(|a, b| b.id.cmp(&a.id));
        leaves
    }

    /// Fold over every leaf exactly once.
    pub fn fold_leaves<A>(&self, acc: A, mut f: impl FnMut(A, &RevInfo) -> A) -> A {
        self.leaves().into_iter().fold(acc, |acc, leaf| f(acc, leaf))
    }

    /// Elect the winning revision.
    ///
    /// Non-deleted leaves win over deleted ones; ties break on highest
    /// generation, then lexicographically greatest hash. Every replica
    /// independently arrives at the same winner.
    pub fn winning_revision(&self) -> Option<Winning> {
        let leaves = self.leaves();
        if leaves.is_empty() {
            return None;
        }

        let live: Vec<&&RevInfo> = leaves.iter().filter(|l| !l.deleted).collect();

        // Leaves are sorted winner-first, so the first of the chosen
        // partition is the winner.
        let (winner, deleted) = match live.first() {
            Some(leaf) => (**leaf, false),
            None => (leaves[0], true),
        };

        Some(Winning {
            rev: winner.id.clone(),
            deleted,
            branched: leaves.len() > 1,
            conflict: live.len() > 1,
        })
    }

    /// Walk from `rev` toward the root, returning the revisions visited,
    /// newest first. Visits at most `max` entries and stops after including
    /// a revision listed in `ancestors`.
    pub fn path_to_root(&self, rev: &Revision, max: usize, ancestors: &[Revision]) -> Vec<Revision> {
        let mut path = Vec::new();
        let mut cursor = self.get(rev);
        while let Some(info) = cursor {
            if path.len() >= max {
                break;
            }
            path.push(info.id.clone());
            if ancestors.contains(&info.id) {
                break;
            }
            cursor = info.parent.as_ref().and_then(|p| self.get(p));
        }
        path
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
