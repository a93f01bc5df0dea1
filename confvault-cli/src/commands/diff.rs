use crate::display;
use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

pub fn run(root: Option<PathBuf>, from: Option<String>, to: Option<String>) -> Result<()> {
    let repo = super::open_repo(root)?;

    let diffs = match from {
        Some(from) => {
            let from_id = repo.resolve(&from)?;
            let to_id = match &to {
                Some(to) => repo.resolve(to)?,
                None => repo.head()?,
            };
            println!(
                "{}",
                format!("Diff {}..{}", from_id.short(), to_id.short())
                    .bold()
                    .cyan()
            );
            println!();
            repo.get_diff(from_id.as_str(), Some(to_id.as_str()))?
        }
        None => {
            println!("{}", "Uncommitted changes".bold().cyan());
            println!();
            repo.diff_working_tree()?
        }
    };

    if diffs.is_empty() {
        println!("{}", "No differences".green());
        return Ok(());
    }

    for diff in &diffs {
        display::print_file_diff(diff);
    }
    println!("{}", display::diff_stat(&diffs).dimmed());

    Ok(())
}
