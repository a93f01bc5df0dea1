pub mod checkpoint;
pub mod commit;
pub mod diff;
pub mod init;
pub mod log;
pub mod prune;
pub mod restore;
pub mod rollback;
pub mod status;
pub mod transaction;
pub mod watch;

use anyhow::{Context, Result};
use confvault_core::{CheckpointController, Config, Repository};
use std::path::PathBuf;
use std::sync::Arc;

pub fn get_root(custom_root: Option<PathBuf>) -> Result<PathBuf> {
    match custom_root {
        Some(root) => Ok(root),
        None => std::env::current_dir().context("Cannot determine the current directory"),
    }
}

pub fn open_repo(custom_root: Option<PathBuf>) -> Result<Repository> {
    let root = get_root(custom_root)?;
    let config = Config::load(&root)
        .with_context(|| format!("Invalid configuration in {}", root.display()))?;

    Repository::open(config).with_context(|| {
        format!(
            "No confvault repository in {}. Run 'confvault init' first.",
            root.display()
        )
    })
}

pub fn open_controller(custom_root: Option<PathBuf>) -> Result<CheckpointController> {
    let repo = Arc::new(open_repo(custom_root)?);
    Ok(CheckpointController::new(repo)?)
}
