use std::fmt;
use std::str::FromStr;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::error::{BarrelError, Result};
use crate::rev_tree::RevTree;

// ---------------------------------------------------------------------------
// Revision
// ---------------------------------------------------------------------------

/// A revision identifier: `{pos}-{hash}`.
///
/// - `pos` is the generation number (starts at 1, increments each edit).
/// - `hash` is a 32-character lowercase hex MD5 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision {
    pub pos: u64,
    pub hash: String,
}

impl Revision {
    pub fn new(pos: u64, hash: impl Into<String>) -> Self {
        Self {
            pos,
            hash: hash.into(),
        }
    }

    /// Mint the revision id for a new edit.
    ///
    /// The digest covers the new generation, the `_rev` the caller supplied
    /// on the body (empty for first writes), and the canonical body bytes
    /// with `_rev` excluded. Every replica that applies the same edit mints
    /// the same id.
    pub fn mint(pos: u64, body_rev: Option<&Revision>, doc: &Doc) -> Result<Revision> {
        let mut hasher = Md5::new();
        hasher.update(pos.to_be_bytes());
        hasher.update(b"\0");
        if let Some(rev) = body_rev {
            hasher.update(rev.to_string().as_bytes());
        }
        hasher.update(b"\0");
        hasher.update(doc.canonical_bytes()?);

        let digest = hasher.finalize();
        let hash: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Ok(Revision { pos, hash })
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.pos, self.hash)
    }
}

impl FromStr for Revision {
    type Err = BarrelError;

    fn from_str(s: &str) -> Result<Self> {
        let (pos_str, hash) = s
            .split_once('-')
            .ok_or_else(|| BarrelError::InvalidRev(s.to_string()))?;
        let pos: u64 = pos_str
            .parse()
            .map_err(|_| BarrelError::InvalidRev(s.to_string()))?;
        if pos == 0 || hash.is_empty() {
            return Err(BarrelError::InvalidRev(s.to_string()));
        }
        Ok(Revision {
            pos,
            hash: hash.to_string(),
        })
    }
}

/// Ordered by generation, then lexicographically by hash. This order is the
/// winner tie-break: the greatest leaf wins.
impl Ord for Revision {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.pos
            .cmp(&other.pos)
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Revisions travel as `"{pos}-{hash}"` strings on the wire and double as
/// JSON map keys in the serialized revision tree.
impl Serialize for Revision {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Revision {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A document body with its underscore fields split out.
#[derive(Debug, Clone)]
pub struct Doc {
    pub id: String,
    pub rev: Option<Revision>,
    pub deleted: bool,
    pub data: serde_json::Value,
}

impl Doc {
    /// Create a document from a JSON value.
    ///
    /// Extracts `_id`, `_rev`, and `_deleted` from the value and keeps the
    /// remaining fields in `data`.
    pub fn from_json(mut value: serde_json::Value) -> Result<Self> {
        let obj = value
            .as_object_mut()
            .ok_or_else(|| BarrelError::BadDoc("document must be a JSON object".into()))?;

        let id = obj
            .remove("_id")
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();

        let rev = obj
            .remove("_rev")
            .and_then(|v| v.as_str().map(String::from))
            .map(|s| s.parse::<Revision>())
            .transpose()?;

        let deleted = obj
            .remove("_deleted")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        Ok(Doc {
            id,
            rev,
            deleted,
            data: value,
        })
    }

    /// Convert back to a JSON value with the underscore fields in place.
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = match &self.data {
            serde_json::Value::Object(m) => m.clone(),
            _ => serde_json::Map::new(),
        };

        obj.insert("_id".into(), serde_json::Value::String(self.id.clone()));

        if let Some(rev) = &self.rev {
            obj.insert("_rev".into(), serde_json::Value::String(rev.to_string()));
        }

        if self.deleted {
            obj.insert("_deleted".into(), serde_json::Value::Bool(true));
        }

        serde_json::Value::Object(obj)
    }

    /// Canonical bytes for revision hashing: the JSON form with `_rev`
    /// excluded. `serde_json`'s map type keeps keys sorted, so two bodies
    /// that are structurally equal hash identically regardless of the key
    /// order they arrived in.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut obj = match &self.data {
            serde_json::Value::Object(m) => m.clone(),
            _ => serde_json::Map::new(),
        };
        if !self.id.is_empty() {
            obj.insert("_id".into(), serde_json::Value::String(self.id.clone()));
        }
        if self.deleted {
            obj.insert("_deleted".into(), serde_json::Value::Bool(true));
        }
        Ok(serde_json::to_vec(&serde_json::Value::Object(obj))?)
    }
}

// ---------------------------------------------------------------------------
// DocInfo — per-document metadata
// ---------------------------------------------------------------------------

fn is_false(v: &bool) -> bool {
    !*v
}

/// Per-document metadata: the winning revision, branch/conflict flags, the
/// full revision tree, and the sequence the document was last committed at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_rev: Option<Revision>,
    pub branched: bool,
    pub conflict: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(rename = "revtree")]
    pub rev_tree: RevTree,
    #[serde(default)]
    pub update_seq: u64,
}

impl DocInfo {
    /// A fresh record for a document that has never been written.
    pub fn new(id: impl Into<String>) -> Self {
        DocInfo {
            id: id.into(),
            current_rev: None,
            branched: false,
            conflict: false,
            deleted: false,
            rev_tree: RevTree::new(),
            update_seq: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Option / response types shared across the workspace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GetOptions {
    /// Retrieve a specific revision instead of the current winner.
    pub rev: Option<Revision>,
    /// Attach `_revisions: {start, ids}` history.
    pub history: bool,
    /// Cap on how many ancestors the history walk visits.
    pub max_history: usize,
    /// Revisions the caller already has; the walk stops after including one.
    pub ancestors: Vec<Revision>,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            rev: None,
            history: false,
            max_history: 1000,
            ancestors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Last-write-wins: accept unconditionally, grafting onto the current
    /// winner instead of rejecting mismatched `_rev`s.
    pub lww: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FoldOptions {
    pub start_key: Option<String>,
    pub end_key: Option<String>,
    pub max: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutResponse {
    pub ok: bool,
    pub id: String,
    pub rev: Revision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllDocsResponse {
    pub total_rows: u64,
    pub offset: u64,
    pub rows: Vec<DocInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangesResponse {
    pub last_seq: u64,
    pub results: Vec<DocInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevsDiffResult {
    pub missing: Vec<Revision>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub possible_ancestors: Vec<Revision>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbInfo {
    pub db_name: String,
    pub doc_count: u64,
    pub update_seq: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
