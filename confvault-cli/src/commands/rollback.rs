use crate::display;
use anyhow::{Context, Result};
use colored::Colorize;
use confvault_core::{Error, ObjectStoreExt};
use std::path::PathBuf;

pub fn run(root: Option<PathBuf>, revision: String, execute: bool, force: bool) -> Result<()> {
    let repo = super::open_repo(root)?;
    let target = repo.resolve(&revision)?;
    let commit = repo.store().get_commit(&target)?;

    println!("{}", "Rollback Preview".bold().cyan());
    println!("  {}: {}", "Target Commit".bold(), target);
    println!("  {}: {}", "Message".bold(), commit.message);
    println!("  {}: {}", "Author".bold(), commit.author);
    println!(
        "  {}: {}",
        "Date".bold(),
        commit.timestamp.format("%Y-%m-%d %H:%M:%S")
    );
    println!();

    let pending = repo.get_pending_changes()?;
    if !pending.is_empty() {
        println!(
            "{} {}",
            "Uncommitted changes:".bold(),
            format!("({})", pending.total()).yellow()
        );
        display::print_pending(&pending, 10);
        println!();
    }

    let diffs = repo.get_diff("HEAD", Some(target.as_str()))?;
    if diffs.is_empty() && pending.is_empty() {
        println!("{}", "Working tree already matches this commit".yellow());
    } else {
        println!("{}", "Files to be restored:".bold());
        for diff in &diffs {
            let status = match diff.change_type {
                confvault_core::ChangeType::Added => "will be recreated".green(),
                confvault_core::ChangeType::Modified => "will be restored".yellow(),
                confvault_core::ChangeType::Deleted => "will be removed".red(),
            };
            println!("  {} {}", diff.path, status);
        }
        println!();
    }

    if !execute {
        println!("{}", "This is a preview only.".yellow());
        println!(
            "Run with {} to actually perform the rollback",
            "--execute".cyan()
        );
        return Ok(());
    }

    println!("{}", "Performing rollback...".bold());
    let info = match repo.rollback(target.as_str(), force) {
        Ok(info) => info,
        Err(Error::Conflict(reason)) => {
            println!("{} {}", "✗".red(), reason);
            println!(
                "Commit first or run with {} to commit them automatically",
                "--force".cyan()
            );
            anyhow::bail!("Rollback refused: {}", reason);
        }
        Err(e) => return Err(e).context("Rollback failed"),
    };

    println!(
        "{}",
        format!("✓ Rolled back to {}", target.short()).green().bold()
    );
    println!("  {}: {}", "New commit".bold(), info.id);
    println!("  {}: {}", "Files changed".bold(), info.change_count);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use confvault_core::{Config, Repository};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_refused_rollback_is_an_error() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(Config::new(dir.path())).unwrap();
        let initial = repo.head().unwrap();

        fs::write(dir.path().join("app.yaml"), "port: 80\n").unwrap();
        repo.commit_changes("add app", false).unwrap();
        let head = repo.head().unwrap();
        fs::write(dir.path().join("app.yaml"), "port: 81\n").unwrap();

        let root = Some(dir.path().to_path_buf());
        assert!(run(root.clone(), initial.to_string(), true, false).is_err());
        assert_eq!(repo.head().unwrap(), head);
        assert_eq!(
            fs::read_to_string(dir.path().join("app.yaml")).unwrap(),
            "port: 81\n"
        );

        run(root, initial.to_string(), true, true).unwrap();
        assert!(!dir.path().join("app.yaml").exists());
    }
}
