//! Content-addressed object storage.
//!
//! The engine talks to storage only through [`ObjectStore`]: put/get/remove
//! objects by id, and read/compare-and-swap named references. Typed access
//! (commits, trees, tags) and tree diffing are layered on top by
//! [`ObjectStoreExt`], so a backend only has to move bytes.

mod loose;
mod sqlite;

pub use loose::LooseObjectStore;
pub use sqlite::SqliteObjectStore;

use crate::error::{Error, Result};
use crate::models::{ChangeType, Commit, ObjectId, ObjectKind, RawObject, Tag, Tree, TreeChange};

pub const HEAD_REF: &str = "HEAD";
pub const TAG_PREFIX: &str = "refs/tags/";
pub const RETAINED_ROOT_REF: &str = "refs/meta/retained-root";

pub trait ObjectStore: Send + Sync {
    /// Store `data` and return its id. Storing existing content is a no-op.
    fn put(&self, kind: ObjectKind, data: &[u8]) -> Result<ObjectId>;

    fn get(&self, id: &ObjectId) -> Result<Option<RawObject>>;

    fn contains(&self, id: &ObjectId) -> Result<bool>;

    /// Returns whether the object existed.
    fn remove(&self, id: &ObjectId) -> Result<bool>;

    fn object_ids(&self) -> Result<Vec<ObjectId>>;

    fn read_ref(&self, name: &str) -> Result<Option<String>>;

    /// Set `name` to `new` if its current value equals `expected`.
    /// Fails with [`Error::RefConflict`] otherwise.
    fn update_ref(&self, name: &str, expected: Option<&str>, new: &str) -> Result<()>;

    fn delete_ref(&self, name: &str) -> Result<bool>;

    /// All refs whose name starts with `prefix`, sorted by name.
    fn list_refs(&self, prefix: &str) -> Result<Vec<(String, String)>>;
}

/// Typed helpers available on every store.
pub trait ObjectStoreExt: ObjectStore {
    fn put_blob(&self, data: &[u8]) -> Result<ObjectId> {
        self.put(ObjectKind::Blob, data)
    }

    fn put_tree(&self, tree: &Tree) -> Result<ObjectId> {
        self.put(ObjectKind::Tree, &serde_json::to_vec(tree)?)
    }

    fn put_commit(&self, commit: &Commit) -> Result<ObjectId> {
        self.put(ObjectKind::Commit, &serde_json::to_vec(commit)?)
    }

    fn put_tag(&self, tag: &Tag) -> Result<ObjectId> {
        self.put(ObjectKind::Tag, &serde_json::to_vec(tag)?)
    }

    fn get_kind(&self, id: &ObjectId, kind: ObjectKind) -> Result<Option<Vec<u8>>> {
        match self.get(id)? {
            Some(raw) if raw.kind == kind => Ok(Some(raw.data)),
            Some(raw) => Err(Error::CorruptObject(format!(
                "{} is a {}, expected {}",
                id,
                raw.kind.as_str(),
                kind.as_str()
            ))),
            None => Ok(None),
        }
    }

    fn get_blob(&self, id: &ObjectId) -> Result<Vec<u8>> {
        self.get_kind(id, ObjectKind::Blob)?
            .ok_or_else(|| Error::NotFound(format!("blob {}", id)))
    }

    fn get_tree(&self, id: &ObjectId) -> Result<Tree> {
        let data = self
            .get_kind(id, ObjectKind::Tree)?
            .ok_or_else(|| Error::NotFound(format!("tree {}", id)))?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn find_commit(&self, id: &ObjectId) -> Result<Option<Commit>> {
        match self.get_kind(id, ObjectKind::Commit)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    fn get_commit(&self, id: &ObjectId) -> Result<Commit> {
        self.find_commit(id)?
            .ok_or_else(|| Error::NotFound(format!("commit {}", id)))
    }

    fn get_tag(&self, id: &ObjectId) -> Result<Tag> {
        let data = self
            .get_kind(id, ObjectKind::Tag)?
            .ok_or_else(|| Error::NotFound(format!("tag object {}", id)))?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn head(&self) -> Result<Option<ObjectId>> {
        self.read_ref(HEAD_REF)?
            .map(|value| ObjectId::parse(value.trim()))
            .transpose()
    }

    /// Per-path differences going from tree `old` to tree `new`, sorted by path.
    fn tree_diff(&self, old: &Tree, new: &Tree) -> Vec<TreeChange> {
        let mut changes = Vec::new();

        for (path, old_id) in &old.entries {
            match new.get(path) {
                Some(new_id) if new_id != old_id => changes.push(TreeChange {
                    path: path.clone(),
                    change_type: ChangeType::Modified,
                    old: Some(old_id.clone()),
                    new: Some(new_id.clone()),
                }),
                Some(_) => {}
                None => changes.push(TreeChange {
                    path: path.clone(),
                    change_type: ChangeType::Deleted,
                    old: Some(old_id.clone()),
                    new: None,
                }),
            }
        }

        for (path, new_id) in &new.entries {
            if !old.entries.contains_key(path) {
                changes.push(TreeChange {
                    path: path.clone(),
                    change_type: ChangeType::Added,
                    old: None,
                    new: Some(new_id.clone()),
                });
            }
        }

        changes.sort_by(|a, b| a.path.cmp(&b.path));
        changes
    }
}

impl<S: ObjectStore + ?Sized> ObjectStoreExt for S {}

/// Reject ref names that could escape the metadata directory.
pub(crate) fn validate_ref_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.starts_with('/')
        || name.ends_with('/')
        || name
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..")
        || name.contains('\\');
    if bad {
        return Err(Error::PathSecurity(format!("invalid ref name: {:?}", name)));
    }
    Ok(())
}
