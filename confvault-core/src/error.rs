use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Repository error: {0}")]
    Repository(String),

    #[error("No changes to commit")]
    NoChanges,

    #[error("Working tree has uncommitted changes: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Checkpoint already open: {0}")]
    AlreadyOpen(String),

    #[error("No active checkpoint")]
    NoActiveCheckpoint,

    #[error("Prune failed: {0}")]
    Prune(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Path rejected: {0}")]
    PathSecurity(String),

    #[error("Working tree changed while committing: {0}")]
    WorkingTreeChanged(String),

    #[error("Corrupt object {0}")]
    CorruptObject(String),

    #[error("Reference {0} was updated concurrently")]
    RefConflict(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<globset::Error> for Error {
    fn from(err: globset::Error) -> Self {
        Error::InvalidPattern {
            pattern: err.glob().unwrap_or_default().to_string(),
            reason: err.kind().to_string(),
        }
    }
}
