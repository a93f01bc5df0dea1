//! Lazy traversal of the commit graph.
//!
//! Commits are produced newest-first in reverse topological order: the
//! queue is keyed on generation number, so a commit always comes out before
//! any of its ancestors. Equal generations are ordered by ascending id.

use crate::error::Result;
use crate::models::{Commit, CommitInfo, ObjectId, Tree};
use crate::store::{ObjectStore, ObjectStoreExt};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use tracing::warn;

struct Queued {
    generation: u64,
    id: Reverse<ObjectId>,
    commit: Commit,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.generation == other.generation && self.id == other.id
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation
            .cmp(&other.generation)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Raw walk over `(id, commit)` pairs. Parents of boundary commits are not
/// followed; parents that are no longer in the store are skipped.
pub(crate) struct Walk<'a> {
    store: &'a dyn ObjectStore,
    queue: BinaryHeap<Queued>,
    seen: HashSet<ObjectId>,
    boundary: HashSet<ObjectId>,
    failed: bool,
}

impl<'a> Walk<'a> {
    pub(crate) fn new(
        store: &'a dyn ObjectStore,
        start: &ObjectId,
        boundary: HashSet<ObjectId>,
    ) -> Result<Self> {
        let commit = store.get_commit(start)?;
        let mut queue = BinaryHeap::new();
        queue.push(Queued {
            generation: commit.generation,
            id: Reverse(start.clone()),
            commit,
        });

        Ok(Self {
            store,
            queue,
            seen: HashSet::from([start.clone()]),
            boundary,
            failed: false,
        })
    }

    fn enqueue_parents(&mut self, id: &ObjectId, commit: &Commit) -> Result<()> {
        if self.boundary.contains(id) {
            return Ok(());
        }
        for parent in &commit.parents {
            if !self.seen.insert(parent.clone()) {
                continue;
            }
            match self.store.find_commit(parent)? {
                Some(parent_commit) => self.queue.push(Queued {
                    generation: parent_commit.generation,
                    id: Reverse(parent.clone()),
                    commit: parent_commit,
                }),
                None => warn!(
                    "Parent {} of {} is missing, history ends there",
                    parent.short(),
                    id.short()
                ),
            }
        }
        Ok(())
    }
}

impl Iterator for Walk<'_> {
    type Item = Result<(ObjectId, Commit)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let Queued {
            id: Reverse(id),
            commit,
            ..
        } = self.queue.pop()?;

        if let Err(e) = self.enqueue_parents(&id, &commit) {
            self.failed = true;
            return Some(Err(e));
        }
        Some(Ok((id, commit)))
    }
}

/// Commit metadata from a starting commit back to the retained root,
/// windowed by offset and limit. Produced lazily; dropping it early costs
/// nothing.
pub struct History<'a> {
    store: &'a dyn ObjectStore,
    walk: Walk<'a>,
    skip: usize,
    remaining: Option<usize>,
}

impl<'a> History<'a> {
    pub(crate) fn new(
        store: &'a dyn ObjectStore,
        start: &ObjectId,
        boundary: HashSet<ObjectId>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Self> {
        Ok(Self {
            store,
            walk: Walk::new(store, start, boundary)?,
            skip: offset,
            remaining: limit,
        })
    }

    /// Changes are diffed against the first parent. Past the retained root
    /// that parent is gone, so the commit's recorded change list is used.
    fn describe(&self, id: ObjectId, commit: Commit) -> Result<CommitInfo> {
        let parent_tree = match commit.first_parent() {
            Some(parent) => match self.store.find_commit(parent)? {
                Some(parent) => self.store.get_tree(&parent.tree)?,
                None => return Ok(CommitInfo::from_recorded(id, &commit)),
            },
            None => Tree::new(),
        };
        let tree = self.store.get_tree(&commit.tree)?;
        let changes = self.store.tree_diff(&parent_tree, &tree);
        Ok(CommitInfo::new(id, &commit, &changes))
    }
}

impl Iterator for History<'_> {
    type Item = Result<CommitInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        while self.skip > 0 {
            if let Err(e) = self.walk.next()? {
                return Some(Err(e));
            }
            self.skip -= 1;
        }

        let (id, commit) = match self.walk.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e)),
        };
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(self.describe(id, commit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteObjectStore;

    fn commit(store: &SqliteObjectStore, parents: &[&ObjectId], message: &str) -> ObjectId {
        let mut tree = Tree::new();
        tree.insert(format!("{}.yaml", message), store.put_blob(message.as_bytes()).unwrap());
        let tree_id = store.put_tree(&tree).unwrap();

        let mut commit = Commit::new(tree_id, "test".to_string(), message.to_string());
        for parent in parents {
            let generation = store.get_commit(parent).unwrap().generation;
            commit = commit.with_parent((*parent).clone(), generation);
        }
        store.put_commit(&commit).unwrap()
    }

    fn chain(store: &SqliteObjectStore, n: usize) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = Vec::new();
        for i in 0..n {
            let parents: Vec<&ObjectId> = ids.last().into_iter().collect();
            let id = commit(store, &parents, &format!("c{}", i));
            ids.push(id);
        }
        ids
    }

    fn messages(history: History<'_>) -> Vec<String> {
        history.map(|c| c.unwrap().message).collect()
    }

    #[test]
    fn test_linear_history_newest_first() {
        let store = SqliteObjectStore::in_memory().unwrap();
        let ids = chain(&store, 4);

        let history = History::new(&store, &ids[3], HashSet::new(), None, 0).unwrap();
        assert_eq!(messages(history), vec!["c3", "c2", "c1", "c0"]);
    }

    #[test]
    fn test_limit_and_offset() {
        let store = SqliteObjectStore::in_memory().unwrap();
        let ids = chain(&store, 5);

        let history = History::new(&store, &ids[4], HashSet::new(), Some(2), 1).unwrap();
        assert_eq!(messages(history), vec!["c3", "c2"]);

        let history = History::new(&store, &ids[4], HashSet::new(), Some(0), 0).unwrap();
        assert_eq!(history.count(), 0);

        let history = History::new(&store, &ids[4], HashSet::new(), None, 10).unwrap();
        assert_eq!(history.count(), 0);
    }

    #[test]
    fn test_merge_is_topological_with_id_tiebreak() {
        let store = SqliteObjectStore::in_memory().unwrap();
        let root = commit(&store, &[], "root");
        let left = commit(&store, &[&root], "left");
        let right = commit(&store, &[&root], "right");
        let merge = commit(&store, &[&left, &right], "merge");

        let order: Vec<ObjectId> = History::new(&store, &merge, HashSet::new(), None, 0)
            .unwrap()
            .map(|c| c.unwrap().id)
            .collect();

        let mut middle = vec![left, right];
        middle.sort();
        assert_eq!(order, vec![merge, middle[0].clone(), middle[1].clone(), root]);
    }

    #[test]
    fn test_walk_stops_at_boundary() {
        let store = SqliteObjectStore::in_memory().unwrap();
        let ids = chain(&store, 5);

        let boundary = HashSet::from([ids[2].clone()]);
        let history = History::new(&store, &ids[4], boundary, None, 0).unwrap();
        assert_eq!(messages(history), vec!["c4", "c3", "c2"]);
    }

    #[test]
    fn test_missing_parent_is_tolerated() {
        let store = SqliteObjectStore::in_memory().unwrap();
        let ids = chain(&store, 3);
        store.remove(&ids[1]).unwrap();

        let history = History::new(&store, &ids[2], HashSet::new(), None, 0).unwrap();
        assert_eq!(messages(history), vec!["c2"]);
    }

    #[test]
    fn test_pruned_parent_reports_recorded_changes() {
        let store = SqliteObjectStore::in_memory().unwrap();
        let blob = store.put_blob(b"x: 1\n").unwrap();

        let mut tree = Tree::new();
        tree.insert("a.yaml", blob.clone());
        tree.insert("b.yaml", blob.clone());
        let root = store
            .put_commit(&Commit::new(
                store.put_tree(&tree).unwrap(),
                "test".to_string(),
                "root".to_string(),
            ))
            .unwrap();

        let old_tree = tree.clone();
        tree.insert("c.yaml", blob);
        let changes = store.tree_diff(&old_tree, &tree);
        let child = Commit::new(
            store.put_tree(&tree).unwrap(),
            "test".to_string(),
            "add c".to_string(),
        )
        .with_parent(root.clone(), 1)
        .with_changes(&changes);
        let child = store.put_commit(&child).unwrap();
        store.remove(&root).unwrap();

        let infos: Vec<CommitInfo> = History::new(&store, &child, HashSet::new(), None, 0)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].change_count, 1);
        assert_eq!(infos[0].files_affected, vec!["c.yaml"]);
    }

    #[test]
    fn test_commit_info_counts_changes() {
        let store = SqliteObjectStore::in_memory().unwrap();
        let ids = chain(&store, 2);

        let infos: Vec<CommitInfo> = History::new(&store, &ids[1], HashSet::new(), None, 0)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        // c1 replaces c0.yaml with c1.yaml
        assert_eq!(infos[0].change_count, 2);
        assert_eq!(infos[0].files_affected, vec!["c0.yaml", "c1.yaml"]);
        assert_eq!(infos[0].parent_ids, vec![ids[0].clone()]);
        assert_eq!(infos[1].change_count, 1);
    }
}
