use anyhow::{Context, Result};
use colored::Colorize;
use confvault_core::{Config, Repository, StorageBackend};
use std::path::PathBuf;

pub fn run(
    root: Option<PathBuf>,
    backend: Option<StorageBackend>,
    ceiling: Option<usize>,
) -> Result<()> {
    let root = super::get_root(root)?;
    let mut config = Config::load(&root)
        .with_context(|| format!("Invalid configuration in {}", root.display()))?;
    let existed = config.config_path().exists();

    if existed && (backend.is_some() || ceiling.is_some()) {
        println!(
            "{}",
            "Repository already configured; edit config.toml to change settings".yellow()
        );
    } else {
        if let Some(backend) = backend {
            config = config.with_backend(backend);
        }
        if let Some(ceiling) = ceiling {
            config = config.with_retention_ceiling(ceiling);
        }
    }

    let metadata_path = config.metadata_path();
    let backend = config.backend;
    let ceiling = config.retention_ceiling;
    let repo = Repository::init(config).context("Failed to initialize repository")?;
    let head = repo.head()?;

    if existed {
        println!("{}", "Repository already initialized".green());
    } else {
        println!("{}", "✓ Repository initialized".green().bold());
    }
    println!("  {}: {}", "Root".bold(), repo.root().display());
    println!("  {}: {}", "Metadata".bold(), metadata_path.display());
    println!("  {}: {:?}", "Backend".bold(), backend);
    println!("  {}: {}", "Retention".bold(), ceiling);
    println!("  {}: {}", "HEAD".bold(), head.short().yellow());

    Ok(())
}
