//! Checkpoint windows: coalesce a burst of edits into a single commit.
//!
//! `start` tags HEAD and suspends auto-commits; `end` commits whatever
//! accumulated in one go and lifts the suspension. The open window is also
//! persisted as `<meta>/CHECKPOINT` so that other processes, and a restart
//! after a crash, see it.

use crate::error::{Error, Result};
use crate::files::atomic_write;
use crate::lock::is_process_alive;
use crate::models::{CheckpointInfo, CommitInfo};
use crate::repository::Repository;
use chrono::Utc;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

pub const CHECKPOINT_FILE: &str = "CHECKPOINT";
pub const CHECKPOINT_TAG_PREFIX: &str = "checkpoint_";

/// Read-only view of the "auto-commit suspended" flag, handed to
/// collaborators that make incidental commits.
#[derive(Debug, Clone, Default)]
pub struct AutoCommitGate {
    suspended: Arc<AtomicBool>,
}

impl AutoCommitGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub(crate) fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::SeqCst);
    }
}

/// Owns the checkpoint state machine for one repository.
///
/// The `<meta>/CHECKPOINT` marker is the shared truth: every transition
/// re-reads it inside the write section, so controllers in other threads
/// or processes never open a second window.
pub struct CheckpointController {
    repo: Arc<Repository>,
    gate: AutoCommitGate,
    active: Mutex<Option<CheckpointInfo>>,
}

impl CheckpointController {
    /// Create the controller, adopting a window that is already open. A
    /// window whose owning process has exited comes back marked
    /// `interrupted`; it stays open until it is ended or aborted.
    pub fn new(repo: Arc<Repository>) -> Result<Self> {
        let controller = Self {
            repo,
            gate: AutoCommitGate::new(),
            active: Mutex::new(None),
        };

        if let Some(open) = controller.read_marker()? {
            if open.interrupted {
                warn!(
                    "Checkpoint {} ({}) was left open by an exited process; auto-commits stay suspended until it is ended or aborted",
                    open.tag, open.description
                );
            } else {
                info!("Checkpoint {} is open: {}", open.tag, open.description);
            }
            controller.gate.set_suspended(true);
            *controller.lock() = Some(open);
        }

        Ok(controller)
    }

    pub fn gate(&self) -> AutoCommitGate {
        self.gate.clone()
    }

    pub fn active(&self) -> Option<CheckpointInfo> {
        self.lock().clone()
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    /// Open a window owned by this process. Pending changes are committed
    /// first so the window starts from a clean tree; that commit does not
    /// trigger retention.
    pub fn start(&self, description: &str) -> Result<CheckpointInfo> {
        self.open_window(description, Some(std::process::id()))
    }

    /// Open a window that outlives this process, to be closed later by
    /// any controller on the same root.
    pub fn start_detached(&self, description: &str) -> Result<CheckpointInfo> {
        self.open_window(description, None)
    }

    fn open_window(&self, description: &str, owner_pid: Option<u32>) -> Result<CheckpointInfo> {
        let mut active = self.lock();
        let section = self.repo.write_section()?;
        if let Some(open) = self.sync(&mut active)? {
            return Err(Error::AlreadyOpen(open.tag));
        }

        match section.commit(&format!("Checkpoint before: {}", description), false, false) {
            Ok(commit) => info!("Committed pending changes as {}", commit.id.short()),
            Err(Error::NoChanges) => {}
            Err(e) => return Err(e),
        }

        let head = self.repo.head()?;
        let name = self.unique_tag_name()?;
        let tag = section.create_tag(&name, &head, description)?;
        let checkpoint = CheckpointInfo {
            owner_pid,
            ..CheckpointInfo::from_tag(&tag)
        };

        self.write_marker(&checkpoint)?;
        self.gate.set_suspended(true);
        *active = Some(checkpoint.clone());

        info!("Checkpoint {} started: {}", checkpoint.tag, description);
        Ok(checkpoint)
    }

    /// Close the window, committing everything written during it as one
    /// commit. Returns `None` when nothing changed. If the commit fails the
    /// window stays open.
    pub fn end(&self) -> Result<Option<CommitInfo>> {
        let mut active = self.lock();
        let section = self.repo.write_section()?;
        let checkpoint = self.sync(&mut active)?.ok_or(Error::NoActiveCheckpoint)?;

        let commit = match section.commit(
            &format!("Checkpoint: {}", checkpoint.description),
            false,
            true,
        ) {
            Ok(commit) => Some(commit),
            Err(Error::NoChanges) => None,
            Err(e) => return Err(e),
        };

        self.remove_marker()?;
        self.gate.set_suspended(false);
        *active = None;

        match &commit {
            Some(commit) => info!(
                "Checkpoint {} ended with commit {} ({} files)",
                checkpoint.tag,
                commit.id.short(),
                commit.change_count
            ),
            None => info!("Checkpoint {} ended with no changes", checkpoint.tag),
        }
        Ok(commit)
    }

    /// Close the window without committing. The tag stays.
    pub fn abort(&self) -> Result<CheckpointInfo> {
        let mut active = self.lock();
        let _section = self.repo.write_section()?;
        let checkpoint = self.sync(&mut active)?.ok_or(Error::NoActiveCheckpoint)?;

        self.remove_marker()?;
        self.gate.set_suspended(false);
        *active = None;

        info!("Checkpoint {} aborted", checkpoint.tag);
        Ok(checkpoint)
    }

    /// Pick up a window opened or closed by another process.
    pub fn reload(&self) -> Result<Option<CheckpointInfo>> {
        let mut active = self.lock();
        self.sync(&mut active)
    }

    /// Checkpoint tags, oldest first.
    pub fn list(&self) -> Result<Vec<CheckpointInfo>> {
        let mut checkpoints: Vec<CheckpointInfo> = self
            .repo
            .tags()?
            .iter()
            .filter(|tag| tag.name.starts_with(CHECKPOINT_TAG_PREFIX))
            .map(CheckpointInfo::from_tag)
            .collect();
        checkpoints.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.tag.cmp(&b.tag))
        });
        Ok(checkpoints)
    }

    /// Make the in-memory state and the gate match the marker.
    fn sync(&self, active: &mut Option<CheckpointInfo>) -> Result<Option<CheckpointInfo>> {
        let marker = self.read_marker()?;
        self.gate.set_suspended(marker.is_some());
        *active = marker.clone();
        Ok(marker)
    }

    fn unique_tag_name(&self) -> Result<String> {
        let base = format!(
            "{}{}",
            CHECKPOINT_TAG_PREFIX,
            Utc::now().format("%Y%m%d_%H%M%S")
        );
        if self.repo.find_tag(&base)?.is_none() {
            return Ok(base);
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}_{}", base, n);
            if self.repo.find_tag(&candidate)?.is_none() {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<CheckpointInfo>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn marker_path(&self) -> PathBuf {
        self.repo.config().metadata_path().join(CHECKPOINT_FILE)
    }

    fn read_marker(&self) -> Result<Option<CheckpointInfo>> {
        let mut checkpoint: CheckpointInfo = match fs::read(self.marker_path()) {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        checkpoint.interrupted = checkpoint
            .owner_pid
            .is_some_and(|pid| pid != std::process::id() && !is_process_alive(pid));
        Ok(Some(checkpoint))
    }

    fn write_marker(&self, checkpoint: &CheckpointInfo) -> Result<()> {
        atomic_write(&self.marker_path(), &serde_json::to_vec_pretty(checkpoint)?)
    }

    fn remove_marker(&self) -> Result<()> {
        match fs::remove_file(self.marker_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
