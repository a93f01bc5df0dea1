//! The versioning engine.
//!
//! A [`Repository`] ties together the object store, the working tree (via a
//! [`FileManager`]) and the change filter. Reads take no lock: they load
//! HEAD once and only ever see objects that were fully written before HEAD
//! moved. Every mutation goes through a [`WriteSection`], which holds the
//! repository's write mutex and the `<meta>/LOCK` file lock for as long as
//! it lives, so writers in other processes are excluded as well.

use crate::checkpoint::AutoCommitGate;
use crate::config::{Config, StorageBackend};
use crate::diff::FileDiff;
use crate::error::{Error, Result};
use crate::files::{FileManager, FsFileManager};
use crate::filter::ChangeFilter;
use crate::history::{History, Walk};
use crate::lock::{RootLock, LOCK_FILE};
use crate::models::{
    Commit, CommitInfo, ObjectId, ObjectKind, PendingChanges, Tag, Tree, TreeChange,
};
use crate::retention;
use crate::store::{
    LooseObjectStore, ObjectStore, ObjectStoreExt, SqliteObjectStore, HEAD_REF,
    RETAINED_ROOT_REF, TAG_PREFIX,
};
use chrono::Utc;
use globset::{Glob, GlobSetBuilder};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub const SQLITE_STORE_FILE: &str = "store.db";

/// Shortest commit id prefix accepted by [`Repository::resolve`].
pub const MIN_PREFIX_LEN: usize = 4;

const INITIAL_MESSAGE: &str = "Initial commit";

pub struct Repository {
    config: Config,
    store: Box<dyn ObjectStore>,
    files: Box<dyn FileManager>,
    filter: ChangeFilter,
    write_lock: Mutex<()>,
    lock_path: PathBuf,
}

impl Repository {
    /// Open the repository at `config.root`, creating the metadata
    /// directory, the store and an initial commit if they do not exist yet.
    /// Running it on an initialized root changes nothing.
    pub fn init(config: Config) -> Result<Self> {
        config.validate()?;
        prepare_root(&config)?;
        if !config.config_path().exists() {
            config.save()?;
        }

        let store = open_store(&config)?;
        let files = Box::new(FsFileManager::new(
            config.root.clone(),
            config.metadata_dir.clone(),
        ));
        Self::init_with(config, store, files)
    }

    /// Like [`Repository::init`] with caller-supplied storage and file access.
    pub fn init_with(
        config: Config,
        store: Box<dyn ObjectStore>,
        files: Box<dyn FileManager>,
    ) -> Result<Self> {
        let repo = Self::assemble(config, store, files)?;
        repo.write_section()?.ensure_initial_commit()?;
        Ok(repo)
    }

    /// Open an existing repository. Fails if `init` has never run.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        if !config.metadata_path().is_dir() {
            return Err(Error::Repository(format!(
                "{} is not initialized (no {} directory)",
                config.root.display(),
                config.metadata_dir
            )));
        }

        let store = open_store(&config)?;
        let files = Box::new(FsFileManager::new(
            config.root.clone(),
            config.metadata_dir.clone(),
        ));
        let repo = Self::assemble(config, store, files)?;
        if repo.store.head()?.is_none() {
            return Err(Error::Repository("repository has no HEAD".to_string()));
        }
        Ok(repo)
    }

    fn assemble(
        config: Config,
        store: Box<dyn ObjectStore>,
        files: Box<dyn FileManager>,
    ) -> Result<Self> {
        let filter = config.change_filter()?;
        let lock_path = config.metadata_path().join(LOCK_FILE);
        Ok(Self {
            config,
            store,
            files,
            filter,
            write_lock: Mutex::new(()),
            lock_path,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn root(&self) -> &Path {
        self.config.root()
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    pub(crate) fn files(&self) -> &dyn FileManager {
        self.files.as_ref()
    }

    /// Enter the write section, blocking until no other mutation runs in
    /// this process or any other process using the same root.
    pub fn write_section(&self) -> Result<WriteSection<'_>> {
        let guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let lock = RootLock::acquire(&self.lock_path)?;
        Ok(WriteSection {
            repo: self,
            _lock: lock,
            _guard: guard,
        })
    }

    pub fn head(&self) -> Result<ObjectId> {
        self.store
            .head()?
            .ok_or_else(|| Error::Repository("repository has no HEAD".to_string()))
    }

    /// Resolve `HEAD`, a tag name, a full commit id or a unique id prefix of
    /// at least [`MIN_PREFIX_LEN`] characters.
    pub fn resolve(&self, revision: &str) -> Result<ObjectId> {
        self.resolve_against(revision, None)
    }

    /// [`Repository::resolve`], answering `HEAD` with `head` when given.
    fn resolve_against(&self, revision: &str, head: Option<&ObjectId>) -> Result<ObjectId> {
        let revision = revision.trim();
        if revision == HEAD_REF {
            return match head {
                Some(head) => Ok(head.clone()),
                None => self.head(),
            };
        }

        if is_valid_tag_name(revision) {
            if let Some(tag_id) = self.store.read_ref(&tag_ref(revision))? {
                let tag = self.store.get_tag(&ObjectId::parse(&tag_id)?)?;
                return Ok(tag.target);
            }
        }

        let is_hex = revision
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !is_hex || revision.len() < MIN_PREFIX_LEN {
            return Err(Error::NotFound(format!("revision {}", revision)));
        }

        if revision.len() == ObjectId::HEX_LEN {
            let id = ObjectId::parse(revision)?;
            return match self.store.find_commit(&id)? {
                Some(_) => Ok(id),
                None => Err(Error::NotFound(format!("commit {}", revision))),
            };
        }

        let mut matches = Vec::new();
        for id in self.store.object_ids()? {
            if !id.as_str().starts_with(revision) {
                continue;
            }
            if matches!(self.store.get(&id)?, Some(raw) if raw.kind == ObjectKind::Commit) {
                matches.push(id);
            }
        }

        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(Error::NotFound(format!("revision {}", revision))),
            n => Err(Error::NotFound(format!(
                "revision {} is ambiguous ({} commits match)",
                revision, n
            ))),
        }
    }

    /// Commits reachable from HEAD, newest first, stopping at the retained
    /// root.
    pub fn get_history(&self, limit: Option<usize>, offset: usize) -> Result<History<'_>> {
        let head = self.head()?;
        let (_, boundary) = retention::read_boundary(self.store())?;
        History::new(self.store(), &head, boundary, limit, offset)
    }

    pub fn get_pending_changes(&self) -> Result<PendingChanges> {
        let changes = self.working_changes(&self.head()?)?.1;
        Ok(PendingChanges::from_tree_changes(&changes))
    }

    /// Diff going from revision `from` to revision `to` (HEAD when `None`).
    pub fn get_diff(&self, from: &str, to: Option<&str>) -> Result<Vec<FileDiff>> {
        let head = self.head()?;
        let from = self.resolve_against(from, Some(&head))?;
        let to = match to {
            Some(rev) => self.resolve_against(rev, Some(&head))?,
            None => head,
        };

        let old_tree = self.commit_tree(&from)?;
        let new_tree = self.commit_tree(&to)?;

        self.store
            .tree_diff(&old_tree, &new_tree)
            .iter()
            .map(|change| {
                let old = self.stored_content(change.old.as_ref())?;
                let new = self.stored_content(change.new.as_ref())?;
                Ok(FileDiff::from_change(change, old.as_deref(), new.as_deref()))
            })
            .collect()
    }

    /// Diff going from HEAD to the working tree.
    pub fn diff_working_tree(&self) -> Result<Vec<FileDiff>> {
        let (_, changes) = self.working_changes(&self.head()?)?;

        changes
            .iter()
            .map(|change| {
                let old = self.stored_content(change.old.as_ref())?;
                let new = match change.new {
                    Some(_) => Some(self.files.read(&change.path)?),
                    None => None,
                };
                Ok(FileDiff::from_change(change, old.as_deref(), new.as_deref()))
            })
            .collect()
    }

    pub fn commit_changes(&self, message: &str, force: bool) -> Result<CommitInfo> {
        self.write_section()?.commit(message, force, true)
    }

    /// Commit on behalf of a collaborator. Returns `None` while `gate`
    /// reports a checkpoint window or when there is nothing to commit.
    pub fn auto_commit(&self, gate: &AutoCommitGate, message: &str) -> Result<Option<CommitInfo>> {
        let section = self.write_section()?;
        if gate.is_suspended() {
            debug!("Auto-commit skipped: checkpoint window open");
            return Ok(None);
        }
        match section.commit(message, false, true) {
            Ok(info) => Ok(Some(info)),
            Err(Error::NoChanges) => {
                debug!("Auto-commit skipped: no changes");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn rollback(&self, revision: &str, force: bool) -> Result<CommitInfo> {
        self.write_section()?.rollback(revision, force)
    }

    pub fn restore_files(&self, revision: &str, patterns: &[String]) -> Result<Vec<String>> {
        self.write_section()?.restore_files(revision, patterns)
    }

    /// Apply the retention ceiling now. Returns the number of commits removed.
    pub fn prune(&self) -> Result<usize> {
        self.write_section()?.prune()
    }

    /// All tags, sorted by name.
    pub fn tags(&self) -> Result<Vec<Tag>> {
        Ok(self.tag_objects()?.into_iter().map(|(_, tag)| tag).collect())
    }

    pub fn find_tag(&self, name: &str) -> Result<Option<Tag>> {
        if !is_valid_tag_name(name) {
            return Ok(None);
        }
        match self.store.read_ref(&tag_ref(name))? {
            Some(id) => Ok(Some(self.store.get_tag(&ObjectId::parse(&id)?)?)),
            None => Ok(None),
        }
    }

    /// Remove a tag, unpinning its target. Returns whether it existed.
    pub fn delete_tag(&self, name: &str) -> Result<bool> {
        self.write_section()?.delete_tag(name)
    }

    fn tag_objects(&self) -> Result<Vec<(ObjectId, Tag)>> {
        self.store
            .list_refs(TAG_PREFIX)?
            .into_iter()
            .map(|(_, value)| {
                let id = ObjectId::parse(&value)?;
                let tag = self.store.get_tag(&id)?;
                Ok((id, tag))
            })
            .collect()
    }

    fn commit_tree(&self, id: &ObjectId) -> Result<Tree> {
        let commit = self.store.get_commit(id)?;
        Ok(self.tracked(self.store.get_tree(&commit.tree)?))
    }

    fn tracked(&self, tree: Tree) -> Tree {
        tree.retain(|path| self.filter.is_trackable(path))
    }

    fn stored_content(&self, id: Option<&ObjectId>) -> Result<Option<Vec<u8>>> {
        id.map(|id| self.store.get_blob(id)).transpose()
    }

    /// Hash every trackable file without storing anything.
    fn scan_working_tree(&self) -> Result<Tree> {
        let mut tree = Tree::new();
        for path in self.files.list_files("**")? {
            if !self.filter.is_trackable(&path) {
                continue;
            }
            match self.files.read(&path) {
                Ok(data) => {
                    let id = ObjectId::compute(ObjectKind::Blob, &data);
                    tree.insert(path, id);
                }
                // Removed between listing and reading.
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        debug!("Scanned {} tracked files", tree.len());
        Ok(tree)
    }

    /// The HEAD commit, the working tree and the changes between them.
    fn working_changes(&self, head: &ObjectId) -> Result<(Tree, Vec<TreeChange>)> {
        let head_tree = self.commit_tree(head)?;
        let working = self.scan_working_tree()?;
        let changes = self.store.tree_diff(&head_tree, &working);
        Ok((working, changes))
    }
}

/// Exclusive access to a repository for a sequence of mutations.
///
/// Obtained from [`Repository::write_section`]; both locks are released
/// when it is dropped, the file lock first.
pub struct WriteSection<'a> {
    repo: &'a Repository,
    _lock: RootLock,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> WriteSection<'a> {
    pub fn repository(&self) -> &'a Repository {
        self.repo
    }

    /// Commit the working tree. With `retain`, the retention ceiling is
    /// applied afterwards; a failure there is logged and does not fail the
    /// commit.
    pub fn commit(&self, message: &str, force: bool, retain: bool) -> Result<CommitInfo> {
        let repo = self.repo;
        let head = repo.head()?;
        let (working, changes) = repo.working_changes(&head)?;

        if changes.is_empty() && !force {
            return Err(Error::NoChanges);
        }

        for change in &changes {
            let Some(expected) = &change.new else {
                continue;
            };
            let data = match repo.files.read(&change.path) {
                Ok(data) => data,
                Err(Error::NotFound(_)) => {
                    return Err(Error::WorkingTreeChanged(change.path.clone()))
                }
                Err(e) => return Err(e),
            };
            if &ObjectId::compute(ObjectKind::Blob, &data) != expected {
                return Err(Error::WorkingTreeChanged(change.path.clone()));
            }
            repo.store.put_blob(&data)?;
        }

        self.write_commit(&head, working, &changes, message, retain)
    }

    /// Store `tree` as a new commit on top of `head` and advance HEAD.
    fn write_commit(
        &self,
        head: &ObjectId,
        tree: Tree,
        changes: &[TreeChange],
        message: &str,
        retain: bool,
    ) -> Result<CommitInfo> {
        let repo = self.repo;
        let parent = repo.store.get_commit(head)?;
        let message = if message.trim().is_empty() {
            format!("Auto-commit at {}", Utc::now().to_rfc3339())
        } else {
            message.to_string()
        };

        let tree_id = repo.store.put_tree(&tree)?;
        let commit = Commit::new(tree_id, repo.config.author.clone(), message)
            .with_parent(head.clone(), parent.generation)
            .with_changes(changes);
        let id = repo.store.put_commit(&commit)?;
        repo.store
            .update_ref(HEAD_REF, Some(head.as_str()), id.as_str())?;

        info!(
            "Committed {} ({} files): {}",
            id.short(),
            changes.len(),
            commit.message
        );

        if retain {
            if let Err(e) = self.apply_retention() {
                warn!("Retention after commit {} failed: {}", id.short(), e);
            }
        }

        Ok(CommitInfo::new(id, &commit, changes))
    }

    /// Make the working tree match `revision` and record that as a new
    /// commit. Excluded paths are neither written nor removed.
    pub fn rollback(&self, revision: &str, force: bool) -> Result<CommitInfo> {
        let repo = self.repo;
        let target = repo.resolve(revision)?;

        let pending = repo.get_pending_changes()?;
        if !pending.is_empty() {
            if !force {
                return Err(Error::Conflict(format!(
                    "{} pending change(s); commit them or force the rollback",
                    pending.total()
                )));
            }
            self.commit(&format!("Before rollback to {}", target.short()), false, false)?;
        }

        let head = repo.head()?;
        let target_tree = repo.commit_tree(&target)?;
        let working = repo.scan_working_tree()?;

        for (path, id) in &target_tree.entries {
            if working.get(path) != Some(id) {
                repo.files.write(path, &repo.store.get_blob(id)?)?;
            }
        }
        for path in working.entries.keys() {
            if target_tree.get(path).is_none() {
                repo.files.remove(path)?;
            }
        }

        let head_tree = repo.commit_tree(&head)?;
        let changes = repo.store.tree_diff(&head_tree, &target_tree);
        info!(
            "Rolled back working tree to {} ({} files changed)",
            target.short(),
            changes.len()
        );

        self.write_commit(
            &head,
            target_tree,
            &changes,
            &format!("Rollback to {}", target.short()),
            true,
        )
    }

    /// Write the files of `revision` matching any of `patterns` (all files
    /// when empty) into the working tree without committing.
    pub fn restore_files(&self, revision: &str, patterns: &[String]) -> Result<Vec<String>> {
        let repo = self.repo;
        let target = repo.resolve(revision)?;
        let tree = repo.commit_tree(&target)?;

        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }
        let matcher = builder.build()?;

        let mut restored = Vec::new();
        for (path, id) in &tree.entries {
            if !patterns.is_empty() && !matcher.is_match(path) {
                continue;
            }
            repo.files.write(path, &repo.store.get_blob(id)?)?;
            restored.push(path.clone());
        }

        info!(
            "Restored {} file(s) from {}",
            restored.len(),
            target.short()
        );
        Ok(restored)
    }

    /// Point `refs/tags/<name>` at a new tag object for `target`.
    pub fn create_tag(&self, name: &str, target: &ObjectId, description: &str) -> Result<Tag> {
        if !is_valid_tag_name(name) {
            return Err(Error::Repository(format!("invalid tag name {:?}", name)));
        }
        self.repo.store.get_commit(target)?;

        let tag = Tag::new(name.to_string(), target.clone(), description.to_string());
        let id = self.repo.store.put_tag(&tag)?;
        self.repo.store.update_ref(&tag_ref(name), None, id.as_str())?;

        info!("Tagged {} as {}", target.short(), name);
        Ok(tag)
    }

    pub fn delete_tag(&self, name: &str) -> Result<bool> {
        if !is_valid_tag_name(name) {
            return Ok(false);
        }
        let removed = self.repo.store.delete_ref(&tag_ref(name))?;
        if removed {
            info!("Deleted tag {}", name);
        }
        Ok(removed)
    }

    pub fn prune(&self) -> Result<usize> {
        self.apply_retention().map_err(|e| match e {
            Error::Prune(_) => e,
            other => Error::Prune(other.to_string()),
        })
    }

    fn apply_retention(&self) -> Result<usize> {
        let repo = self.repo;
        let store = repo.store();
        let head = repo.head()?;
        let (raw_boundary, boundary) = retention::read_boundary(store)?;

        let history = Walk::new(store, &head, boundary.clone())?.collect::<Result<Vec<_>>>()?;
        let tags = repo.tag_objects()?;
        let pinned: HashSet<ObjectId> = tags.iter().map(|(_, tag)| tag.target.clone()).collect();

        let plan = retention::plan(
            &history,
            &head,
            &pinned,
            &boundary,
            repo.config.retention_ceiling,
        );
        if !plan.has_surplus() {
            debug!("Retention: {} commits within ceiling", plan.keep.len());
            return Ok(0);
        }

        store.update_ref(
            RETAINED_ROOT_REF,
            raw_boundary.as_deref(),
            &retention::encode_boundary(&plan.boundary),
        )?;

        let live = retention::live_objects(store, &plan.keep, &tags)?;
        let removed = retention::sweep(store, &live, &plan.cut)?;

        info!(
            "Pruned {} commit(s), {} retained",
            removed,
            plan.keep.len()
        );
        Ok(removed)
    }

    fn ensure_initial_commit(&self) -> Result<()> {
        let store = self.repo.store();
        if let Some(head) = store.head()? {
            debug!("Repository already initialized at {}", head.short());
            return Ok(());
        }

        let tree = store.put_tree(&Tree::new())?;
        let commit = Commit::new(
            tree,
            self.repo.config.author.clone(),
            INITIAL_MESSAGE.to_string(),
        );
        let id = store.put_commit(&commit)?;
        match store.update_ref(HEAD_REF, None, id.as_str()) {
            Ok(()) => info!("Initialized repository at {}", self.repo.root().display()),
            // Another process got there first.
            Err(Error::RefConflict(_)) => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

/// Tag names become ref file names, so they are kept to a safe alphabet.
pub fn is_valid_tag_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn tag_ref(name: &str) -> String {
    format!("{}{}", TAG_PREFIX, name)
}

fn prepare_root(config: &Config) -> Result<()> {
    let root = config.root();
    let meta = fs::metadata(root).map_err(|e| {
        Error::Repository(format!("cannot use {} as root: {}", root.display(), e))
    })?;
    if !meta.is_dir() {
        return Err(Error::Repository(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let metadata_path = config.metadata_path();
    fs::create_dir_all(&metadata_path).map_err(|e| {
        Error::Repository(format!(
            "cannot create {}: {}",
            metadata_path.display(),
            e
        ))
    })?;

    let write_test = metadata_path.join(".write-test");
    fs::write(&write_test, b"")
        .and_then(|_| fs::remove_file(&write_test))
        .map_err(|e| {
            Error::Repository(format!(
                "{} is not writable: {}",
                metadata_path.display(),
                e
            ))
        })
}

fn open_store(config: &Config) -> Result<Box<dyn ObjectStore>> {
    let metadata_path = config.metadata_path();
    let store: Box<dyn ObjectStore> = match config.backend {
        StorageBackend::Loose => Box::new(LooseObjectStore::new(metadata_path)?),
        StorageBackend::Sqlite => {
            Box::new(SqliteObjectStore::new(metadata_path.join(SQLITE_STORE_FILE))?)
        }
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeType, RawObject};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(Config::new(dir.path())).unwrap();
        (dir, repo)
    }

    fn write(dir: &TempDir, path: &str, content: &str) {
        let full = dir.path().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    #[test]
    fn test_init_creates_initial_commit() {
        let (dir, repo) = setup();
        let history: Vec<CommitInfo> = repo
            .get_history(None, 0)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, INITIAL_MESSAGE);
        assert!(dir.path().join(".confvault/HEAD").is_file());
        assert!(dir.path().join(".confvault/config.toml").is_file());
    }

    #[test]
    fn test_init_rejects_missing_root() {
        let dir = TempDir::new().unwrap();
        let result = Repository::init(Config::new(dir.path().join("missing")));
        assert!(matches!(result, Err(Error::Repository(_))));

        fs::write(dir.path().join("file"), "x").unwrap();
        let result = Repository::init(Config::new(dir.path().join("file")));
        assert!(matches!(result, Err(Error::Repository(_))));
    }

    #[test]
    fn test_open_requires_init() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Repository::open(Config::new(dir.path())),
            Err(Error::Repository(_))
        ));
        Repository::init(Config::new(dir.path())).unwrap();
        assert!(Repository::open(Config::new(dir.path())).is_ok());
    }

    #[test]
    fn test_commit_and_pending() {
        let (dir, repo) = setup();
        assert!(matches!(
            repo.commit_changes("nothing", false),
            Err(Error::NoChanges)
        ));

        write(&dir, "a.yaml", "a: 1\n");
        write(&dir, "secrets.yaml", "password: hunter2\n");
        let pending = repo.get_pending_changes().unwrap();
        assert_eq!(pending.added, vec!["a.yaml"]);

        let info = repo.commit_changes("add a", false).unwrap();
        assert_eq!(info.change_count, 1);
        assert_eq!(info.files_affected, vec!["a.yaml"]);
        assert_eq!(repo.head().unwrap(), info.id);
        assert!(repo.get_pending_changes().unwrap().is_empty());
    }

    #[test]
    fn test_force_commit_and_default_message() {
        let (_dir, repo) = setup();
        let info = repo.commit_changes("", true).unwrap();
        assert_eq!(info.change_count, 0);
        assert!(info.message.starts_with("Auto-commit at "));
    }

    #[test]
    fn test_resolve() {
        let (dir, repo) = setup();
        write(&dir, "a.yaml", "a: 1\n");
        let info = repo.commit_changes("add a", false).unwrap();

        assert_eq!(repo.resolve("HEAD").unwrap(), info.id);
        assert_eq!(repo.resolve(info.id.as_str()).unwrap(), info.id);
        assert_eq!(repo.resolve(&info.id.as_str()[..12]).unwrap(), info.id);
        assert!(matches!(repo.resolve("abc"), Err(Error::NotFound(_))));
        assert!(matches!(repo.resolve("nope"), Err(Error::NotFound(_))));

        repo.write_section()
            .unwrap()
            .create_tag("release", &info.id, "first release")
            .unwrap();
        assert_eq!(repo.resolve("release").unwrap(), info.id);
        assert_eq!(repo.tags().unwrap().len(), 1);
        assert!(repo.delete_tag("release").unwrap());
        assert!(matches!(repo.resolve("release"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_get_diff_and_working_tree_diff() {
        let (dir, repo) = setup();
        write(&dir, "a.yaml", "a: 1\n");
        let first = repo.commit_changes("add a", false).unwrap();
        write(&dir, "a.yaml", "a: 2\n");
        write(&dir, "b.yaml", "b: 1\n");

        let working = repo.diff_working_tree().unwrap();
        assert_eq!(working.len(), 2);
        assert_eq!(working[0].change_type, ChangeType::Modified);
        assert_eq!(working[1].change_type, ChangeType::Added);

        repo.commit_changes("update", false).unwrap();
        let diff = repo.get_diff(first.id.as_str(), None).unwrap();
        let paths: Vec<_> = diff.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["a.yaml", "b.yaml"]);
        assert!(repo.get_diff("HEAD", Some("HEAD")).unwrap().is_empty());
        assert!(matches!(
            repo.get_diff("deadbeef", None),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_rollback_requires_force_with_pending_changes() {
        let (dir, repo) = setup();
        write(&dir, "a.yaml", "a: 1\n");
        let first = repo.commit_changes("v1", false).unwrap();
        write(&dir, "a.yaml", "a: 2\n");
        repo.commit_changes("v2", false).unwrap();
        write(&dir, "a.yaml", "a: 3\n");

        assert!(matches!(
            repo.rollback(first.id.as_str(), false),
            Err(Error::Conflict(_))
        ));

        let info = repo.rollback(first.id.as_str(), true).unwrap();
        assert_eq!(info.message, format!("Rollback to {}", first.id.short()));
        assert_eq!(fs::read_to_string(dir.path().join("a.yaml")).unwrap(), "a: 1\n");

        let messages: Vec<String> = repo
            .get_history(Some(2), 0)
            .unwrap()
            .map(|c| c.unwrap().message)
            .collect();
        assert_eq!(messages[1], format!("Before rollback to {}", first.id.short()));
    }

    #[test]
    fn test_restore_files_does_not_commit() {
        let (dir, repo) = setup();
        write(&dir, "a.yaml", "a: 1\n");
        write(&dir, "b.yaml", "b: 1\n");
        let first = repo.commit_changes("v1", false).unwrap();
        write(&dir, "a.yaml", "a: 2\n");
        write(&dir, "b.yaml", "b: 2\n");
        let head = repo.commit_changes("v2", false).unwrap();

        let restored = repo
            .restore_files(first.id.as_str(), &["a.*".to_string()])
            .unwrap();
        assert_eq!(restored, vec!["a.yaml"]);
        assert_eq!(fs::read_to_string(dir.path().join("a.yaml")).unwrap(), "a: 1\n");
        assert_eq!(fs::read_to_string(dir.path().join("b.yaml")).unwrap(), "b: 2\n");
        assert_eq!(repo.head().unwrap(), head.id);
        assert_eq!(repo.get_pending_changes().unwrap().modified, vec!["a.yaml"]);
    }

    #[test]
    fn test_auto_commit_respects_gate() {
        let (dir, repo) = setup();
        let gate = AutoCommitGate::new();
        assert!(repo.auto_commit(&gate, "").unwrap().is_none());

        write(&dir, "a.yaml", "a: 1\n");
        gate.set_suspended(true);
        assert!(repo.auto_commit(&gate, "").unwrap().is_none());

        gate.set_suspended(false);
        assert!(repo.auto_commit(&gate, "").unwrap().is_some());
    }

    /// Disk file manager that sees new content in `path` after its first
    /// read, as if an editor saved again mid-commit.
    struct ShiftingReads {
        inner: FsFileManager,
        path: &'static str,
        reads: AtomicUsize,
    }

    impl FileManager for ShiftingReads {
        fn list_files(&self, pattern: &str) -> Result<Vec<String>> {
            self.inner.list_files(pattern)
        }

        fn read(&self, path: &str) -> Result<Vec<u8>> {
            if path == self.path && self.reads.fetch_add(1, Ordering::SeqCst) > 0 {
                return Ok(b"a: edited again\n".to_vec());
            }
            self.inner.read(path)
        }

        fn write(&self, path: &str, data: &[u8]) -> Result<()> {
            self.inner.write(path, data)
        }

        fn remove(&self, path: &str) -> Result<()> {
            self.inner.remove(path)
        }

        fn check_path(&self, path: &str) -> Result<()> {
            self.inner.check_path(path)
        }
    }

    /// In-memory store that cannot delete objects and counts HEAD reads.
    struct StickyStore {
        inner: SqliteObjectStore,
        head_reads: Arc<AtomicUsize>,
    }

    impl ObjectStore for StickyStore {
        fn put(&self, kind: ObjectKind, data: &[u8]) -> Result<ObjectId> {
            self.inner.put(kind, data)
        }

        fn get(&self, id: &ObjectId) -> Result<Option<RawObject>> {
            self.inner.get(id)
        }

        fn contains(&self, id: &ObjectId) -> Result<bool> {
            self.inner.contains(id)
        }

        fn remove(&self, _id: &ObjectId) -> Result<bool> {
            Err(Error::Repository("object store is read-only".to_string()))
        }

        fn object_ids(&self) -> Result<Vec<ObjectId>> {
            self.inner.object_ids()
        }

        fn read_ref(&self, name: &str) -> Result<Option<String>> {
            if name == HEAD_REF {
                self.head_reads.fetch_add(1, Ordering::SeqCst);
            }
            self.inner.read_ref(name)
        }

        fn update_ref(&self, name: &str, expected: Option<&str>, new: &str) -> Result<()> {
            self.inner.update_ref(name, expected, new)
        }

        fn delete_ref(&self, name: &str) -> Result<bool> {
            self.inner.delete_ref(name)
        }

        fn list_refs(&self, prefix: &str) -> Result<Vec<(String, String)>> {
            self.inner.list_refs(prefix)
        }
    }

    fn sticky_repo(dir: &TempDir, ceiling: usize) -> (Repository, Arc<AtomicUsize>) {
        let head_reads = Arc::new(AtomicUsize::new(0));
        let store = StickyStore {
            inner: SqliteObjectStore::in_memory().unwrap(),
            head_reads: Arc::clone(&head_reads),
        };
        let files = FsFileManager::new(dir.path(), ".confvault");
        let config = Config::new(dir.path()).with_retention_ceiling(ceiling);
        let repo = Repository::init_with(config, Box::new(store), Box::new(files)).unwrap();
        (repo, head_reads)
    }

    #[test]
    fn test_commit_fails_when_file_changes_during_scan() {
        let dir = TempDir::new().unwrap();
        let files = ShiftingReads {
            inner: FsFileManager::new(dir.path(), ".confvault"),
            path: "a.yaml",
            reads: AtomicUsize::new(0),
        };
        let store = SqliteObjectStore::in_memory().unwrap();
        let repo =
            Repository::init_with(Config::new(dir.path()), Box::new(store), Box::new(files))
                .unwrap();
        let head = repo.head().unwrap();

        write(&dir, "a.yaml", "a: 1\n");
        match repo.commit_changes("racy", false) {
            Err(Error::WorkingTreeChanged(path)) => assert_eq!(path, "a.yaml"),
            other => panic!("expected WorkingTreeChanged, got {:?}", other),
        }
        assert_eq!(repo.head().unwrap(), head);

        // Once the file holds still the commit goes through.
        let info = repo.commit_changes("settled", false).unwrap();
        assert_eq!(info.files_affected, vec!["a.yaml"]);
        assert_eq!(repo.head().unwrap(), info.id);
    }

    #[test]
    fn test_prune_failure_does_not_fail_commit() {
        let dir = TempDir::new().unwrap();
        let (repo, _) = sticky_repo(&dir, 1);

        let mut last = repo.head().unwrap();
        for i in 0..4 {
            write(&dir, "a.yaml", &format!("a: {}\n", i));
            let info = repo.commit_changes(&format!("c{}", i), false).unwrap();
            assert_eq!(info.parent_ids, vec![last.clone()]);
            assert_eq!(repo.head().unwrap(), info.id);
            last = info.id;
        }

        // Each commit already advanced the retained root despite the sweep.
        assert_eq!(repo.prune().unwrap(), 0);
        assert_eq!(repo.head().unwrap(), last);
        let history: Vec<_> = repo.get_history(None, 0).unwrap().collect();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_get_diff_reads_head_once() {
        let dir = TempDir::new().unwrap();
        let (repo, head_reads) = sticky_repo(&dir, 30);
        write(&dir, "a.yaml", "a: 1\n");
        repo.commit_changes("add a", false).unwrap();

        head_reads.store(0, Ordering::SeqCst);
        assert!(repo.get_diff("HEAD", None).unwrap().is_empty());
        assert_eq!(head_reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_write_section_excludes_other_instances() {
        let dir = TempDir::new().unwrap();
        let first = Repository::init(Config::new(dir.path())).unwrap();
        let second = Repository::open(Config::new(dir.path())).unwrap();

        let section = first.write_section().unwrap();
        let lock_path = dir.path().join(".confvault").join(LOCK_FILE);
        assert!(RootLock::try_acquire(&lock_path).unwrap().is_none());

        let done = Arc::new(AtomicUsize::new(0));
        let waiter = {
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let result = second.prune();
                done.store(1, Ordering::SeqCst);
                result
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(100));
        assert_eq!(done.load(Ordering::SeqCst), 0);

        drop(section);
        assert_eq!(waiter.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn test_tag_names() {
        assert!(is_valid_tag_name("checkpoint_20240101_120000_2"));
        assert!(is_valid_tag_name("v1.2"));
        assert!(!is_valid_tag_name(""));
        assert!(!is_valid_tag_name(".hidden"));
        assert!(!is_valid_tag_name("a/b"));
        assert!(!is_valid_tag_name("../x"));
    }
}
