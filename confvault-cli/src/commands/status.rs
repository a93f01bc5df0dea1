use crate::display;
use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

pub fn run(root: Option<PathBuf>) -> Result<()> {
    let controller = super::open_controller(root)?;
    let repo = controller.repository();
    let head = repo.head()?;
    let commit = repo
        .get_history(Some(1), 0)?
        .next()
        .transpose()?;
    let pending = repo.get_pending_changes()?;

    println!("{}", "Repository Status".bold().cyan());
    println!("  {}: {}", "Root".bold(), repo.root().display());
    match commit {
        Some(commit) => println!(
            "  {}: {} {}",
            "HEAD".bold(),
            head.short().yellow(),
            commit.message
        ),
        None => println!("  {}: {}", "HEAD".bold(), head.short().yellow()),
    }

    if let Some(checkpoint) = controller.active() {
        let note = if checkpoint.interrupted {
            " (owner exited)".red()
        } else {
            "".normal()
        };
        println!(
            "  {}: {} - {}{}",
            "Checkpoint".bold(),
            checkpoint.tag.cyan(),
            checkpoint.description,
            note
        );
    }
    println!();

    if pending.is_empty() {
        println!("{}", "No uncommitted changes".green());
    } else {
        println!(
            "{} {}",
            "Uncommitted changes:".bold(),
            format!("({})", pending.total()).yellow()
        );
        println!();

        display::print_pending(&pending, 10);

        println!();
        println!(
            "Run {} to commit these changes",
            "confvault commit \"message\"".cyan()
        );
    }

    Ok(())
}
