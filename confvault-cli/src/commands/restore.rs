use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

pub fn run(root: Option<PathBuf>, revision: String, patterns: Vec<String>) -> Result<()> {
    let repo = super::open_repo(root)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("Restoring files from {}...", revision));

    let restored = repo
        .restore_files(&revision, &patterns)
        .context("Restore failed");
    spinner.finish_and_clear();
    let restored = restored?;

    if restored.is_empty() {
        println!("{}", "No matching files in that revision".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("✓ Restored {} file(s)", restored.len()).green().bold()
    );
    for path in &restored {
        println!("  {} {}", "✓".green(), path);
    }
    println!();
    println!(
        "Changes are not committed; run {} to record them",
        "confvault commit \"message\"".cyan()
    );

    Ok(())
}
