use crate::display;
use anyhow::Result;
use colored::Colorize;
use confvault_core::CommitInfo;
use std::path::PathBuf;

pub fn run(root: Option<PathBuf>, limit: Option<usize>, offset: usize, json: bool) -> Result<()> {
    let repo = super::open_repo(root)?;

    // One extra entry tells whether more history follows.
    let commits = repo
        .get_history(limit.map(|n| n + 1), offset)?
        .collect::<confvault_core::Result<Vec<CommitInfo>>>()?;
    let to_show = limit.unwrap_or(commits.len()).min(commits.len());

    if json {
        println!("{}", serde_json::to_string_pretty(&commits[..to_show])?);
        return Ok(());
    }

    if commits.is_empty() {
        println!("{}", "No commits in range".yellow());
        return Ok(());
    }

    println!("{}", "Commit History".bold().cyan());
    println!();

    for info in commits.iter().take(to_show) {
        display::print_commit(info);
    }

    if commits.len() > to_show {
        println!("{}", "... more commits follow".dimmed());
        println!(
            "Use {} to see more",
            format!("--offset {}", offset + to_show).cyan()
        );
    }

    Ok(())
}
