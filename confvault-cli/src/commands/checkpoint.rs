use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

pub fn start(root: Option<PathBuf>, description: String) -> Result<()> {
    let controller = super::open_controller(root)?;
    let checkpoint = controller
        .start_detached(&description)
        .context("Cannot start checkpoint")?;

    println!("{}", "✓ Checkpoint started".green().bold());
    println!("  {}: {}", "Tag".bold(), checkpoint.tag.cyan());
    println!("  {}: {}", "Commit".bold(), checkpoint.commit_id.short());
    println!("  {}: {}", "Description".bold(), checkpoint.description);
    println!();
    println!(
        "Auto-commits are suspended. Run {} when done.",
        "confvault checkpoint end".cyan()
    );

    Ok(())
}

pub fn end(root: Option<PathBuf>) -> Result<()> {
    let controller = super::open_controller(root)?;
    let checkpoint = controller.active();
    let commit = controller.end().context("Cannot end checkpoint")?;

    if let Some(checkpoint) = checkpoint {
        println!(
            "{} {}",
            "✓ Checkpoint ended:".green().bold(),
            checkpoint.description
        );
    }
    match commit {
        Some(info) => {
            println!("  {}: {}", "Commit".bold(), info.id);
            println!("  {}: {}", "Files changed".bold(), info.change_count);
        }
        None => println!("  {}", "No changes were made during the checkpoint".dimmed()),
    }

    Ok(())
}

pub fn abort(root: Option<PathBuf>) -> Result<()> {
    let controller = super::open_controller(root)?;
    let checkpoint = controller.abort().context("Cannot abort checkpoint")?;

    println!(
        "{} {}",
        "Checkpoint aborted:".yellow().bold(),
        checkpoint.description
    );
    println!(
        "  Changes stay uncommitted; tag {} still marks the starting point",
        checkpoint.tag.cyan()
    );

    Ok(())
}

pub fn list(root: Option<PathBuf>) -> Result<()> {
    let controller = super::open_controller(root)?;
    let checkpoints = controller.list()?;
    let active = controller.active().map(|c| c.tag);

    if checkpoints.is_empty() {
        println!("{}", "No checkpoints yet".yellow());
        return Ok(());
    }

    println!("{}", "Checkpoints".bold().cyan());
    println!();
    for checkpoint in &checkpoints {
        let marker = if active.as_deref() == Some(checkpoint.tag.as_str()) {
            "*".green().bold()
        } else {
            " ".normal()
        };
        println!(
            "{} {} {} {} {}",
            marker,
            checkpoint.tag.cyan(),
            checkpoint.commit_id.short().yellow(),
            checkpoint.created_at.format("%Y-%m-%d %H:%M:%S"),
            checkpoint.description
        );
    }

    Ok(())
}
