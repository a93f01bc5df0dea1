//! Retention: decide which commits survive a prune and which objects are
//! still referenced afterwards.
//!
//! Planning is pure so it can be tested without a store. The repository
//! applies a plan by first advancing the retained-root marker, then
//! sweeping every object outside the live set.

use crate::error::Result;
use crate::models::{Commit, ObjectId, Tag};
use crate::store::{ObjectStore, ObjectStoreExt, RETAINED_ROOT_REF};
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    /// Commits that stay part of history, newest first.
    pub keep: Vec<ObjectId>,
    /// Commits that drop out of history. Pinned ones among them survive as
    /// detached roots.
    pub cut: Vec<ObjectId>,
    /// The new retained-root marker.
    pub boundary: BTreeSet<ObjectId>,
}

impl RetentionPlan {
    pub fn has_surplus(&self) -> bool {
        !self.cut.is_empty()
    }
}

/// Plan a prune over `history`, which must be in walk order (newest first,
/// every commit before its ancestors) and start at `head`.
///
/// HEAD and pinned commits do not count towards `ceiling`. Once `ceiling`
/// other commits have been kept, the first surplus commit and everything
/// after it are cut.
pub fn plan(
    history: &[(ObjectId, Commit)],
    head: &ObjectId,
    pinned: &HashSet<ObjectId>,
    old_boundary: &HashSet<ObjectId>,
    ceiling: usize,
) -> RetentionPlan {
    let mut counted = 0;
    let mut split = history.len();

    for (index, (id, _)) in history.iter().enumerate() {
        if id == head || pinned.contains(id) {
            continue;
        }
        if counted == ceiling {
            split = index;
            break;
        }
        counted += 1;
    }

    let (kept, cut) = history.split_at(split);
    let cut_ids: HashSet<&ObjectId> = cut.iter().map(|(id, _)| id).collect();

    let boundary = kept
        .iter()
        .filter(|(id, commit)| {
            old_boundary.contains(id) || commit.parents.iter().any(|p| cut_ids.contains(p))
        })
        .map(|(id, _)| id.clone())
        .collect();

    RetentionPlan {
        keep: kept.iter().map(|(id, _)| id.clone()).collect(),
        cut: cut.iter().map(|(id, _)| id.clone()).collect(),
        boundary,
    }
}

pub(crate) fn read_boundary(store: &dyn ObjectStore) -> Result<(Option<String>, HashSet<ObjectId>)> {
    let raw = store.read_ref(RETAINED_ROOT_REF)?;
    let ids: HashSet<ObjectId> = match raw.as_deref() {
        Some(value) => value
            .split_whitespace()
            .map(ObjectId::parse)
            .collect::<Result<_>>()?,
        None => HashSet::new(),
    };
    Ok((raw, ids))
}

pub(crate) fn encode_boundary(boundary: &BTreeSet<ObjectId>) -> String {
    boundary
        .iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Every object reachable from the kept commits and the tags.
///
/// A tag keeps its own object, its target commit and that commit's tree,
/// but not the target's ancestry.
pub(crate) fn live_objects(
    store: &dyn ObjectStore,
    kept: &[ObjectId],
    tags: &[(ObjectId, Tag)],
) -> Result<HashSet<ObjectId>> {
    let mut live = HashSet::new();

    let targets = tags.iter().map(|(_, tag)| &tag.target);
    for id in kept.iter().chain(targets) {
        if !live.insert(id.clone()) {
            continue;
        }
        let commit = store.get_commit(id)?;
        if live.insert(commit.tree.clone()) {
            let tree = store.get_tree(&commit.tree)?;
            live.extend(tree.entries.into_values());
        }
    }

    live.extend(tags.iter().map(|(id, _)| id.clone()));
    Ok(live)
}

/// Remove every object outside `live`. Returns how many of `cut` were
/// deleted.
pub(crate) fn sweep(
    store: &dyn ObjectStore,
    live: &HashSet<ObjectId>,
    cut: &[ObjectId],
) -> Result<usize> {
    let cut: HashSet<&ObjectId> = cut.iter().collect();
    let mut removed_commits = 0;

    for id in store.object_ids()? {
        if live.contains(&id) {
            continue;
        }
        if store.remove(&id)? && cut.contains(&id) {
            removed_commits += 1;
        }
    }

    Ok(removed_commits)
}
