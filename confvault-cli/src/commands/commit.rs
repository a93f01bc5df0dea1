use anyhow::{Context, Result};
use colored::Colorize;
use confvault_core::Error;
use std::path::PathBuf;

pub fn run(root: Option<PathBuf>, message: String, force: bool) -> Result<()> {
    let repo = super::open_repo(root)?;

    println!("{}", "Creating commit...".bold());

    let info = match repo.commit_changes(&message, force) {
        Ok(info) => info,
        Err(Error::NoChanges) => {
            println!("{}", "No changes to commit".yellow());
            return Ok(());
        }
        Err(e) => return Err(e).context("Commit failed"),
    };

    println!("{}", "✓ Commit created successfully!".green().bold());
    println!("  {}: {}", "Commit ID".bold(), info.id);
    println!("  {}: {}", "Message".bold(), info.message);
    println!("  {}: {}", "Author".bold(), info.author);
    println!("  {}: {}", "Files changed".bold(), info.change_count);

    Ok(())
}
