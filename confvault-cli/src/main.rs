use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use confvault_core::StorageBackend;
use std::path::PathBuf;

mod commands;
mod display;

use commands::{
    checkpoint, commit, diff, init, log, prune, restore, rollback, status, transaction, watch,
};

#[derive(Parser)]
#[command(name = "confvault")]
#[command(version, about = "Version control for configuration directories", long_about = None)]
struct Cli {
    /// Configuration root (defaults to the current directory)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start versioning a configuration directory
    Init {
        /// Object store backend
        #[arg(long, value_enum)]
        backend: Option<Backend>,

        /// Number of commits kept besides HEAD and checkpoints
        #[arg(long)]
        ceiling: Option<usize>,
    },

    /// Show HEAD, the open checkpoint and uncommitted changes
    Status,

    /// Commit changes with a message
    Commit {
        /// Commit message
        message: String,

        /// Create the commit even when nothing changed
        #[arg(short, long)]
        force: bool,
    },

    /// Show commit history
    Log {
        /// Number of commits to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Number of commits to skip
        #[arg(short, long, default_value = "0")]
        offset: usize,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show changes between revisions, or uncommitted changes
    Diff {
        /// Base revision (if not provided, shows uncommitted changes)
        from: Option<String>,

        /// Target revision (defaults to HEAD)
        to: Option<String>,
    },

    /// Roll the working tree back to a revision
    Rollback {
        /// Commit id, unique prefix, tag name or HEAD
        revision: String,

        /// Actually perform the rollback (without this, just shows preview)
        #[arg(long)]
        execute: bool,

        /// Commit uncommitted changes first instead of refusing
        #[arg(short, long)]
        force: bool,
    },

    /// Restore files from a revision without committing
    Restore {
        /// Commit id, unique prefix, tag name or HEAD
        revision: String,

        /// Glob patterns selecting the files (all files when omitted)
        patterns: Vec<String>,
    },

    /// Manage checkpoint windows
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Stage file operations and apply them as one commit
    Transaction {
        #[command(subcommand)]
        action: TransactionAction,
    },

    /// Drop commits beyond the retention ceiling
    Prune {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Auto-commit whenever files change
    Watch {
        /// Quiet period before a batch of changes is committed
        #[arg(long, default_value = "500")]
        debounce_ms: u64,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Open a window; auto-commits are suspended until it ends
    Start {
        /// What the edits in this window are for
        description: String,
    },
    /// Close the window with a single commit
    End,
    /// Close the window without committing
    Abort,
    /// List checkpoint tags
    List,
}

#[derive(Subcommand)]
enum TransactionAction {
    /// Open a transaction and print its id
    Begin {
        /// Context recorded with the transaction, as key=value
        #[arg(short, long = "context")]
        context: Vec<String>,
    },
    /// Stage writing a file's new content
    Write {
        id: String,
        /// Path relative to the root
        path: String,
        /// File holding the new content, or - for stdin
        source: PathBuf,
    },
    /// Stage deleting a file
    Delete { id: String, path: String },
    /// Check staged operations without applying them
    Validate { id: String },
    /// Apply staged operations and commit them
    Commit {
        id: String,
        /// Commit message
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Discard a pending transaction
    Abort { id: String },
    /// Show one transaction
    Show {
        id: String,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// List transactions
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Loose,
    Sqlite,
}

impl From<Backend> for StorageBackend {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Loose => StorageBackend::Loose,
            Backend::Sqlite => StorageBackend::Sqlite,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let root = cli.root;

    match cli.command {
        Commands::Init { backend, ceiling } => {
            init::run(root, backend.map(Into::into), ceiling)?;
        }
        Commands::Status => {
            status::run(root)?;
        }
        Commands::Commit { message, force } => {
            commit::run(root, message, force)?;
        }
        Commands::Log {
            limit,
            offset,
            json,
        } => {
            log::run(root, limit, offset, json)?;
        }
        Commands::Diff { from, to } => {
            diff::run(root, from, to)?;
        }
        Commands::Rollback {
            revision,
            execute,
            force,
        } => {
            rollback::run(root, revision, execute, force)?;
        }
        Commands::Restore { revision, patterns } => {
            restore::run(root, revision, patterns)?;
        }
        Commands::Checkpoint { action } => match action {
            CheckpointAction::Start { description } => checkpoint::start(root, description)?,
            CheckpointAction::End => checkpoint::end(root)?,
            CheckpointAction::Abort => checkpoint::abort(root)?,
            CheckpointAction::List => checkpoint::list(root)?,
        },
        Commands::Transaction { action } => match action {
            TransactionAction::Begin { context } => transaction::begin(root, context)?,
            TransactionAction::Write { id, path, source } => {
                transaction::write(root, id, path, source)?
            }
            TransactionAction::Delete { id, path } => transaction::delete(root, id, path)?,
            TransactionAction::Validate { id } => transaction::validate(root, id)?,
            TransactionAction::Commit { id, message } => transaction::commit(root, id, message)?,
            TransactionAction::Abort { id } => transaction::abort(root, id)?,
            TransactionAction::Show { id, json } => transaction::show(root, id, json)?,
            TransactionAction::List => transaction::list(root)?,
        },
        Commands::Prune { yes } => {
            prune::run(root, yes)?;
        }
        Commands::Watch { debounce_ms } => {
            watch::run(root, debounce_ms).await?;
        }
    }

    Ok(())
}
