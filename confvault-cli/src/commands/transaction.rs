use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use confvault_core::{FileOperation, Transaction, TransactionStatus};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;

fn status_label(status: TransactionStatus) -> ColoredString {
    match status {
        TransactionStatus::Open => status.as_str().cyan(),
        TransactionStatus::Validated => status.as_str().blue(),
        TransactionStatus::Committed => status.as_str().green(),
        TransactionStatus::Aborted => status.as_str().yellow(),
        TransactionStatus::Failed => status.as_str().red(),
    }
}

/// Parse `key=value` pairs given with `--context`.
fn parse_context(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("Context must be key=value, got '{}'", pair))?;
            Ok((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

pub fn begin(root: Option<PathBuf>, context: Vec<String>) -> Result<()> {
    let repo = super::open_repo(root)?;
    let context = parse_context(&context)?;
    let transaction = repo
        .begin_transaction(context)
        .context("Cannot begin transaction")?;

    println!("{}", "✓ Transaction started".green().bold());
    println!("  {}: {}", "ID".bold(), transaction.id.simple().to_string().cyan());
    Ok(())
}

/// Stage a write of `source` (a file, or stdin for `-`) to `path`.
pub fn write(root: Option<PathBuf>, id: String, path: String, source: PathBuf) -> Result<()> {
    let repo = super::open_repo(root)?;
    let content = if source.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Cannot read stdin")?;
        buf
    } else {
        std::fs::read_to_string(&source)
            .with_context(|| format!("Cannot read {}", source.display()))?
    };

    let transaction = repo
        .stage_file_write(&id, &path, &content)
        .context("Cannot stage write")?;
    println!(
        "{} write {} ({} operation(s) staged)",
        "+".green(),
        path,
        transaction.operations.len()
    );
    Ok(())
}

pub fn delete(root: Option<PathBuf>, id: String, path: String) -> Result<()> {
    let repo = super::open_repo(root)?;
    let transaction = repo
        .stage_file_delete(&id, &path)
        .context("Cannot stage delete")?;
    println!(
        "{} delete {} ({} operation(s) staged)",
        "-".red(),
        path,
        transaction.operations.len()
    );
    Ok(())
}

pub fn validate(root: Option<PathBuf>, id: String) -> Result<()> {
    let repo = super::open_repo(root)?;
    let validation = repo.validate_transaction(&id)?;

    if validation.is_valid() {
        println!("{}", "✓ Transaction is valid".green().bold());
        return Ok(());
    }

    println!("{}", "Transaction is invalid:".red().bold());
    for error in &validation.errors {
        println!("  {} {}", "✗".red(), error);
    }
    anyhow::bail!("{} validation error(s)", validation.errors.len());
}

pub fn commit(root: Option<PathBuf>, id: String, message: Option<String>) -> Result<()> {
    let repo = super::open_repo(root)?;

    println!("{}", "Applying transaction...".bold());
    let info = repo
        .commit_transaction(&id, message.as_deref())
        .context("Transaction failed")?;

    println!("{}", "✓ Transaction committed".green().bold());
    println!("  {}: {}", "Commit".bold(), info.id);
    println!("  {}: {}", "Files changed".bold(), info.change_count);
    Ok(())
}

pub fn abort(root: Option<PathBuf>, id: String) -> Result<()> {
    let repo = super::open_repo(root)?;
    let transaction = repo
        .abort_transaction(&id)
        .context("Cannot abort transaction")?;
    println!(
        "{} {}",
        "Transaction aborted:".yellow().bold(),
        transaction.id.simple()
    );
    Ok(())
}

pub fn show(root: Option<PathBuf>, id: String, json: bool) -> Result<()> {
    let repo = super::open_repo(root)?;
    let transaction = repo.get_transaction(&id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&transaction)?);
        return Ok(());
    }

    print_summary(&transaction);
    for (key, value) in &transaction.context {
        println!("  {}: {}", key.bold(), value);
    }
    if let Some(commit) = &transaction.commit_id {
        println!("  {}: {}", "Commit".bold(), commit);
    }
    if let Some(error) = &transaction.error {
        println!("  {}: {}", "Error".bold(), error.red());
    }
    println!();
    for operation in &transaction.operations {
        match operation {
            FileOperation::Write { path, .. } => println!("  {} {}", "+".green(), path),
            FileOperation::Delete { path } => println!("  {} {}", "-".red(), path),
        }
    }
    Ok(())
}

pub fn list(root: Option<PathBuf>) -> Result<()> {
    let repo = super::open_repo(root)?;
    let transactions = repo.transactions()?;

    if transactions.is_empty() {
        println!("{}", "No transactions".yellow());
        return Ok(());
    }

    println!("{}", "Transactions".bold().cyan());
    println!();
    for transaction in &transactions {
        print_summary(transaction);
    }
    Ok(())
}

fn print_summary(transaction: &Transaction) {
    println!(
        "{} {} {} {} op(s)",
        transaction.id.simple().to_string().cyan(),
        status_label(transaction.status),
        transaction.updated_at.format("%Y-%m-%d %H:%M:%S"),
        transaction.operations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_context() {
        let pairs = vec!["ticket=OPS-12".to_string(), "reason=a=b".to_string()];
        let context = parse_context(&pairs).unwrap();
        assert_eq!(context["ticket"], "OPS-12");
        assert_eq!(context["reason"], "a=b");

        assert!(parse_context(&["missing".to_string()]).is_err());
    }
}
