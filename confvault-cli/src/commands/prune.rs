use anyhow::{Context, Result};
use colored::Colorize;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

pub fn run(root: Option<PathBuf>, yes: bool) -> Result<()> {
    let repo = super::open_repo(root)?;
    let ceiling = repo.config().retention_ceiling;

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Permanently drop commits beyond the newest {}?",
                ceiling
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("{}", "Prune cancelled".yellow());
            return Ok(());
        }
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Pruning history...");

    let removed = repo.prune().context("Prune failed");
    spinner.finish_and_clear();
    let removed = removed?;

    if removed == 0 {
        println!("{}", "Nothing to prune".green());
    } else {
        println!(
            "{}",
            format!("✓ Removed {} commit(s)", removed).green().bold()
        );
    }

    Ok(())
}
