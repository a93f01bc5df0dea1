use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Hex-encoded SHA-256 of an object's header and payload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub const HEX_LEN: usize = 64;

    pub fn compute(kind: ObjectKind, data: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(format!("{} {}\0", kind.as_str(), data.len()).as_bytes());
        hasher.update(data);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let valid = s.len() == Self::HEX_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::NotFound(format!("invalid object id: {}", s)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectKind {
    pub fn as_str(&self) -> &str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Commit => "commit",
            ObjectKind::Tag => "tag",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blob" => Some(ObjectKind::Blob),
            "tree" => Some(ObjectKind::Tree),
            "commit" => Some(ObjectKind::Commit),
            "tag" => Some(ObjectKind::Tag),
            _ => None,
        }
    }
}

/// An object as it sits in a store: its kind and encoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObject {
    pub kind: ObjectKind,
    pub data: Vec<u8>,
}

/// Flat snapshot of the tracked files, keyed by `/`-separated relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub entries: BTreeMap<String, ObjectId>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, blob: ObjectId) {
        self.entries.insert(path.into(), blob);
    }

    pub fn get(&self, path: &str) -> Option<&ObjectId> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only the entries accepted by `keep`.
    pub fn retain(mut self, mut keep: impl FnMut(&str) -> bool) -> Self {
        self.entries.retain(|path, _| keep(path));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    /// 1 for a root commit, otherwise one more than the highest parent.
    pub generation: u64,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub message: String,
    /// Paths changed relative to the first parent, recorded at commit time
    /// so the commit still describes itself once that parent is pruned.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_paths: Vec<String>,
}

impl Commit {
    pub fn new(tree: ObjectId, author: String, message: String) -> Self {
        Self {
            tree,
            parents: Vec::new(),
            generation: 1,
            timestamp: Utc::now(),
            author,
            message,
            changed_paths: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: ObjectId, parent_generation: u64) -> Self {
        self.parents.push(parent);
        self.generation = self.generation.max(parent_generation + 1);
        self
    }

    pub fn with_changes(mut self, changes: &[TreeChange]) -> Self {
        self.changed_paths = changes.iter().map(|c| c.path.clone()).collect();
        self
    }

    pub fn first_parent(&self) -> Option<&ObjectId> {
        self.parents.first()
    }
}

/// Annotated tag object; the ref `refs/tags/<name>` points at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub target: ObjectId,
    pub created_at: DateTime<Utc>,
    pub description: String,
}

impl Tag {
    pub fn new(name: String, target: ObjectId, description: String) -> Self {
        Self {
            name,
            target,
            created_at: Utc::now(),
            description,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

impl ChangeType {
    pub fn as_str(&self) -> &str {
        match self {
            ChangeType::Added => "added",
            ChangeType::Modified => "modified",
            ChangeType::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "added" => Some(ChangeType::Added),
            "modified" => Some(ChangeType::Modified),
            "deleted" => Some(ChangeType::Deleted),
            _ => None,
        }
    }
}

/// One path that differs between two trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeChange {
    pub path: String,
    pub change_type: ChangeType,
    pub old: Option<ObjectId>,
    pub new: Option<ObjectId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChanges {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl PendingChanges {
    pub fn from_tree_changes(changes: &[TreeChange]) -> Self {
        let mut pending = Self::default();
        for change in changes {
            let bucket = match change.change_type {
                ChangeType::Added => &mut pending.added,
                ChangeType::Modified => &mut pending.modified,
                ChangeType::Deleted => &mut pending.deleted,
            };
            bucket.push(change.path.clone());
        }
        pending.added.sort();
        pending.modified.sort();
        pending.deleted.sort();
        pending
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn total(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub id: ObjectId,
    pub parent_ids: Vec<ObjectId>,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub message: String,
    pub change_count: usize,
    pub files_affected: Vec<String>,
}

impl CommitInfo {
    pub fn new(id: ObjectId, commit: &Commit, changes: &[TreeChange]) -> Self {
        Self {
            id,
            parent_ids: commit.parents.clone(),
            timestamp: commit.timestamp,
            author: commit.author.clone(),
            message: commit.message.clone(),
            change_count: changes.len(),
            files_affected: changes.iter().map(|c| c.path.clone()).collect(),
        }
    }

    /// Metadata from the change list stored in the commit itself.
    pub fn from_recorded(id: ObjectId, commit: &Commit) -> Self {
        Self {
            id,
            parent_ids: commit.parents.clone(),
            timestamp: commit.timestamp,
            author: commit.author.clone(),
            message: commit.message.clone(),
            change_count: commit.changed_paths.len(),
            files_affected: commit.changed_paths.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub tag: String,
    pub commit_id: ObjectId,
    pub description: String,
    pub created_at: DateTime<Utc>,
    /// Process that opened the window and is expected to close it. `None`
    /// for windows that outlive their opener, such as those started from
    /// the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_pid: Option<u32>,
    /// Set when the owning process is gone while the window is still open.
    #[serde(default)]
    pub interrupted: bool,
}

impl CheckpointInfo {
    pub fn from_tag(tag: &Tag) -> Self {
        Self {
            tag: tag.name.clone(),
            commit_id: tag.target.clone(),
            description: tag.description.clone(),
            created_at: tag.created_at,
            owner_pid: None,
            interrupted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_is_content_addressed() {
        let a = ObjectId::compute(ObjectKind::Blob, b"hello");
        let b = ObjectId::compute(ObjectKind::Blob, b"hello");
        let c = ObjectId::compute(ObjectKind::Tree, b"hello");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), ObjectId::HEX_LEN);
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn test_object_id_parse() {
        let id = ObjectId::compute(ObjectKind::Blob, b"x");
        assert_eq!(ObjectId::parse(id.as_str()).unwrap(), id);
        assert!(ObjectId::parse("abc").is_err());
        assert!(ObjectId::parse(&"Z".repeat(64)).is_err());
    }

    #[test]
    fn test_commit_generation() {
        let tree = ObjectId::compute(ObjectKind::Tree, b"{}");
        let root = Commit::new(tree.clone(), "me".to_string(), "root".to_string());
        assert_eq!(root.generation, 1);

        let child = Commit::new(tree, "me".to_string(), "child".to_string())
            .with_parent(ObjectId::compute(ObjectKind::Commit, b"p"), 4);
        assert_eq!(child.generation, 5);
        assert_eq!(child.parents.len(), 1);
    }

    #[test]
    fn test_recorded_changes_describe_commit() {
        let tree = ObjectId::compute(ObjectKind::Tree, b"{}");
        let blob = ObjectId::compute(ObjectKind::Blob, b"x");
        let changes = vec![TreeChange {
            path: "a.yaml".to_string(),
            change_type: ChangeType::Added,
            old: None,
            new: Some(blob),
        }];
        let commit = Commit::new(tree, "me".to_string(), "add a".to_string())
            .with_changes(&changes);
        let id = ObjectId::compute(ObjectKind::Commit, b"c");

        let info = CommitInfo::from_recorded(id.clone(), &commit);
        assert_eq!(info, CommitInfo::new(id, &commit, &changes));
    }

    #[test]
    fn test_pending_changes_sorted() {
        let id = ObjectId::compute(ObjectKind::Blob, b"x");
        let changes = vec![
            TreeChange {
                path: "z.yaml".to_string(),
                change_type: ChangeType::Added,
                old: None,
                new: Some(id.clone()),
            },
            TreeChange {
                path: "a.yaml".to_string(),
                change_type: ChangeType::Added,
                old: None,
                new: Some(id.clone()),
            },
            TreeChange {
                path: "m.yaml".to_string(),
                change_type: ChangeType::Deleted,
                old: Some(id),
                new: None,
            },
        ];

        let pending = PendingChanges::from_tree_changes(&changes);
        assert_eq!(pending.added, vec!["a.yaml", "z.yaml"]);
        assert_eq!(pending.deleted, vec!["m.yaml"]);
        assert_eq!(pending.total(), 3);
        assert!(!pending.is_empty());
    }

    #[test]
    fn test_change_type_parse() {
        assert_eq!(ChangeType::parse("modified"), Some(ChangeType::Modified));
        assert_eq!(ChangeType::parse("renamed"), None);
        assert_eq!(ObjectKind::parse(ObjectKind::Tag.as_str()), Some(ObjectKind::Tag));
    }
}
