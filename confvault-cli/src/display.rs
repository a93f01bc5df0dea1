use colored::{ColoredString, Colorize};
use confvault_core::{ChangeType, CommitInfo, DiffLineType, FileDiff, PendingChanges};

pub fn change_icon(change_type: ChangeType) -> ColoredString {
    match change_type {
        ChangeType::Added => "+".green(),
        ChangeType::Modified => "~".yellow(),
        ChangeType::Deleted => "-".red(),
    }
}

pub fn change_label(change_type: ChangeType) -> ColoredString {
    match change_type {
        ChangeType::Added => "NEW".green(),
        ChangeType::Modified => "MOD".yellow(),
        ChangeType::Deleted => "DEL".red(),
    }
}

/// Print up to `max` pending paths, one per line, with change icons.
pub fn print_pending(pending: &PendingChanges, max: usize) {
    let entries = pending
        .added
        .iter()
        .map(|p| (ChangeType::Added, p))
        .chain(pending.modified.iter().map(|p| (ChangeType::Modified, p)))
        .chain(pending.deleted.iter().map(|p| (ChangeType::Deleted, p)));

    for (change_type, path) in entries.take(max) {
        println!("  {} {}", change_icon(change_type), path);
    }

    if pending.total() > max {
        println!();
        println!(
            "  {} and {} more...",
            "...".dimmed(),
            (pending.total() - max).to_string().yellow()
        );
    }
}

pub fn print_commit(info: &CommitInfo) {
    println!(
        "{} {}",
        "commit".yellow().bold(),
        info.id.to_string().yellow()
    );
    println!("{}: {}", "Author".bold(), info.author);
    println!(
        "{}: {}",
        "Date".bold(),
        info.timestamp.format("%Y-%m-%d %H:%M:%S")
    );
    println!();
    println!("    {}", info.message);
    println!();
    println!(
        "    {} file(s) changed",
        info.change_count.to_string().cyan()
    );

    if !info.files_affected.is_empty() {
        for path in info.files_affected.iter().take(5) {
            println!("      • {}", path.dimmed());
        }
        if info.files_affected.len() > 5 {
            println!(
                "      {} and {} more...",
                "...".dimmed(),
                (info.files_affected.len() - 5).to_string().dimmed()
            );
        }
    }

    println!();
}

pub fn print_file_diff(diff: &FileDiff) {
    println!("{}", "━".repeat(80).bright_black());
    println!(
        "{} {}",
        change_label(diff.change_type),
        diff.path.white().bold()
    );
    println!();

    if diff.binary {
        println!("  {}", "[Binary file]".dimmed());
        println!();
        return;
    }

    for hunk in &diff.hunks {
        println!(
            "{}",
            format!(
                "@@ -{},{} +{},{} @@",
                hunk.old_start, hunk.old_lines, hunk.new_start, hunk.new_lines
            )
            .cyan()
        );
        for line in &hunk.lines {
            let text = format!("{}{}", line.line_type.prefix(), line.content);
            let text = text.trim_end_matches('\n');
            match line.line_type {
                DiffLineType::Addition => println!("{}", text.green()),
                DiffLineType::Deletion => println!("{}", text.red()),
                DiffLineType::Context => println!("{}", text),
            }
        }
    }
    println!();
}

/// `+added -deleted` summary for a set of file diffs.
pub fn diff_stat(diffs: &[FileDiff]) -> String {
    let additions: usize = diffs.iter().map(FileDiff::additions).sum();
    let deletions: usize = diffs.iter().map(FileDiff::deletions).sum();
    format!(
        "{} file(s) changed, {} insertion(s), {} deletion(s)",
        diffs.len(),
        additions,
        deletions
    )
}
