//! # confvault-core
//!
//! Versioning engine for directories of configuration files.
//!
//! This crate keeps a configuration root under continuous version control:
//! content-addressed snapshots, checkpoint windows that coalesce bursts of
//! edits into one commit, filtered change detection, staged transactions,
//! rollback and retention pruning.

pub mod checkpoint;
pub mod config;
pub mod diff;
pub mod error;
pub mod files;
pub mod filter;
pub mod history;
pub mod lock;
pub mod models;
pub mod repository;
pub mod retention;
pub mod store;
pub mod transaction;

pub use checkpoint::{AutoCommitGate, CheckpointController};
pub use config::{Config, StorageBackend};
pub use diff::{DiffLine, DiffLineType, FileDiff, FileHunk};
pub use error::{Error, Result};
pub use files::{FileManager, FsFileManager};
pub use filter::ChangeFilter;
pub use history::History;
pub use models::{
    ChangeType, CheckpointInfo, Commit, CommitInfo, ObjectId, PendingChanges, Tag, Tree,
};
pub use repository::{Repository, WriteSection};
pub use store::{LooseObjectStore, ObjectStore, ObjectStoreExt, SqliteObjectStore};
pub use transaction::{
    FileOperation, RollbackRecord, Transaction, TransactionStatus, Validation,
};
