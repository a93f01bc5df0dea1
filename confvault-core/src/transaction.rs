//! Staged, failure-atomic batches of file writes and deletes.
//!
//! A transaction collects operations under `<meta>/transactions/<id>.json`
//! so they survive between calls and processes. Committing validates the
//! batch, snapshots every touched path into the object store, applies the
//! operations through the [`FileManager`](crate::FileManager) and records
//! the result as one commit. If anything fails on the way, the touched
//! paths are put back as they were and the transaction is marked failed.

use crate::error::{Error, Result};
use crate::files::atomic_write;
use crate::models::{CommitInfo, ObjectId};
use crate::repository::{Repository, WriteSection};
use crate::store::ObjectStoreExt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const TRANSACTIONS_DIR: &str = "transactions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Open,
    Validated,
    Committed,
    Aborted,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TransactionStatus::Open => "open",
            TransactionStatus::Validated => "validated",
            TransactionStatus::Committed => "committed",
            TransactionStatus::Aborted => "aborted",
            TransactionStatus::Failed => "failed",
        }
    }

    /// Whether operations may still be staged or applied.
    pub fn is_pending(&self) -> bool {
        matches!(self, TransactionStatus::Open | TransactionStatus::Validated)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum FileOperation {
    Write { path: String, content: String },
    Delete { path: String },
}

impl FileOperation {
    pub fn path(&self) -> &str {
        match self {
            FileOperation::Write { path, .. } | FileOperation::Delete { path } => path,
        }
    }
}

/// What a commit attempt touched, enough to put the working tree back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRecord {
    /// Previous content of paths that existed, as blobs in the object store.
    /// They are only guaranteed to exist until the next prune.
    pub backups: BTreeMap<String, ObjectId>,
    /// Paths that did not exist before the first operation on them.
    pub created: Vec<String>,
    /// Every touched path, in order of first use.
    pub touched: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    pub status: TransactionStatus,
    #[serde(default)]
    pub operations: Vec<FileOperation>,
    #[serde(default)]
    pub rollback: RollbackRecord,
    #[serde(default)]
    pub commit_id: Option<ObjectId>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    fn new(context: BTreeMap<String, String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            context,
            status: TransactionStatus::Open,
            operations: Vec::new(),
            rollback: RollbackRecord::default(),
            commit_id: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn set_status(&mut self, status: TransactionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub errors: Vec<String>,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Transaction files under the metadata directory.
struct TransactionLog {
    dir: PathBuf,
}

impl TransactionLog {
    fn new(repo: &Repository) -> Self {
        Self {
            dir: repo.config().metadata_path().join(TRANSACTIONS_DIR),
        }
    }

    fn path(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id.simple()))
    }

    fn load(&self, id: &str) -> Result<Transaction> {
        let uuid = Uuid::parse_str(id.trim())
            .map_err(|_| Error::NotFound(format!("transaction {}", id)))?;
        match fs::read(self.path(&uuid)) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("transaction {}", id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, transaction: &Transaction) -> Result<()> {
        atomic_write(
            &self.path(&transaction.id),
            &serde_json::to_vec_pretty(transaction)?,
        )
    }

    fn list(&self) -> Result<Vec<Transaction>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut transactions = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match serde_json::from_slice::<Transaction>(&fs::read(&path)?) {
                Ok(transaction) => transactions.push(transaction),
                Err(e) => warn!("Skipping unreadable transaction {}: {}", path.display(), e),
            }
        }
        transactions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(transactions)
    }
}

impl Repository {
    pub fn begin_transaction(&self, context: BTreeMap<String, String>) -> Result<Transaction> {
        self.write_section()?.begin_transaction(context)
    }

    pub fn stage_file_write(&self, id: &str, path: &str, content: &str) -> Result<Transaction> {
        self.write_section()?.stage_file_write(id, path, content)
    }

    pub fn stage_file_delete(&self, id: &str, path: &str) -> Result<Transaction> {
        self.write_section()?.stage_file_delete(id, path)
    }

    pub fn validate_transaction(&self, id: &str) -> Result<Validation> {
        self.write_section()?.validate_transaction(id)
    }

    pub fn commit_transaction(&self, id: &str, message: Option<&str>) -> Result<CommitInfo> {
        self.write_section()?.commit_transaction(id, message)
    }

    pub fn abort_transaction(&self, id: &str) -> Result<Transaction> {
        self.write_section()?.abort_transaction(id)
    }

    pub fn get_transaction(&self, id: &str) -> Result<Transaction> {
        TransactionLog::new(self).load(id)
    }

    /// Every recorded transaction, oldest first.
    pub fn transactions(&self) -> Result<Vec<Transaction>> {
        TransactionLog::new(self).list()
    }
}

impl WriteSection<'_> {
    pub fn begin_transaction(&self, context: BTreeMap<String, String>) -> Result<Transaction> {
        let transaction = Transaction::new(context);
        TransactionLog::new(self.repository()).save(&transaction)?;
        info!("Transaction {} started", transaction.id.simple());
        Ok(transaction)
    }

    pub fn stage_file_write(&self, id: &str, path: &str, content: &str) -> Result<Transaction> {
        self.stage(
            id,
            FileOperation::Write {
                path: path.to_string(),
                content: content.to_string(),
            },
        )
    }

    pub fn stage_file_delete(&self, id: &str, path: &str) -> Result<Transaction> {
        self.stage(
            id,
            FileOperation::Delete {
                path: path.to_string(),
            },
        )
    }

    fn stage(&self, id: &str, operation: FileOperation) -> Result<Transaction> {
        let log = TransactionLog::new(self.repository());
        let mut transaction = log.load(id)?;
        if !transaction.status.is_pending() {
            return Err(Error::Transaction(format!(
                "cannot stage operations for transaction {} in state {}",
                transaction.id.simple(),
                transaction.status
            )));
        }

        transaction.operations.push(operation);
        transaction.set_status(TransactionStatus::Open);
        log.save(&transaction)?;
        Ok(transaction)
    }

    /// Check the staged operations. The transaction becomes `validated`
    /// or `failed`.
    pub fn validate_transaction(&self, id: &str) -> Result<Validation> {
        let log = TransactionLog::new(self.repository());
        let mut transaction = log.load(id)?;
        if !transaction.status.is_pending() {
            return Err(Error::Transaction(format!(
                "transaction {} is {}",
                transaction.id.simple(),
                transaction.status
            )));
        }

        let validation = self.validate(&transaction);
        if validation.is_valid() {
            transaction.set_status(TransactionStatus::Validated);
        } else {
            transaction.error = Some(validation.errors.join("; "));
            transaction.set_status(TransactionStatus::Failed);
        }
        log.save(&transaction)?;
        Ok(validation)
    }

    fn validate(&self, transaction: &Transaction) -> Validation {
        let repo = self.repository();
        let mut errors = Vec::new();

        if transaction.operations.is_empty() {
            errors.push("transaction has no staged operations".to_string());
        }
        for operation in &transaction.operations {
            let path = operation.path();
            if let Err(e) = repo.files().check_path(path) {
                errors.push(e.to_string());
            } else if !repo.filter().is_trackable(path) {
                errors.push(format!("{} is excluded from tracking", path));
            }
        }

        Validation { errors }
    }

    /// Validate, apply and commit the staged operations. On failure the
    /// touched paths are restored, the transaction is marked failed and the
    /// error is returned.
    pub fn commit_transaction(&self, id: &str, message: Option<&str>) -> Result<CommitInfo> {
        let log = TransactionLog::new(self.repository());
        let mut transaction = log.load(id)?;
        let short = transaction.id.simple().to_string();

        if !transaction.status.is_pending() {
            return Err(Error::Transaction(format!(
                "transaction {} is {}",
                short, transaction.status
            )));
        }

        let validation = self.validate(&transaction);
        if !validation.is_valid() {
            let reason = validation.errors.join("; ");
            transaction.error = Some(reason.clone());
            transaction.set_status(TransactionStatus::Failed);
            log.save(&transaction)?;
            return Err(Error::Transaction(reason));
        }

        let message = match message {
            Some(message) if !message.trim().is_empty() => message.to_string(),
            _ => format!("Transaction apply: {}", short),
        };

        let mut record = RollbackRecord::default();
        let outcome = self
            .apply_operations(&transaction.operations, &mut record)
            .and_then(|()| self.commit(&message, true, true));

        transaction.rollback = record;
        match outcome {
            Ok(commit) => {
                transaction.commit_id = Some(commit.id.clone());
                transaction.error = None;
                transaction.set_status(TransactionStatus::Committed);
                log.save(&transaction)?;
                info!(
                    "Transaction {} committed as {} ({} operations)",
                    short,
                    commit.id.short(),
                    transaction.operations.len()
                );
                Ok(commit)
            }
            Err(e) => {
                if let Err(restore_err) = self.restore_touched(&transaction.rollback) {
                    error!(
                        "Restoring files after transaction {} failed: {}",
                        short, restore_err
                    );
                }
                transaction.error = Some(e.to_string());
                transaction.set_status(TransactionStatus::Failed);
                log.save(&transaction)?;
                warn!("Transaction {} failed and was rolled back: {}", short, e);
                Err(e)
            }
        }
    }

    pub fn abort_transaction(&self, id: &str) -> Result<Transaction> {
        let log = TransactionLog::new(self.repository());
        let mut transaction = log.load(id)?;
        if transaction.status == TransactionStatus::Committed {
            return Err(Error::Transaction(format!(
                "transaction {} is already committed",
                transaction.id.simple()
            )));
        }

        transaction.set_status(TransactionStatus::Aborted);
        log.save(&transaction)?;
        info!("Transaction {} aborted", transaction.id.simple());
        Ok(transaction)
    }

    /// Apply `operations` in order, snapshotting each path before its first
    /// change.
    fn apply_operations(
        &self,
        operations: &[FileOperation],
        record: &mut RollbackRecord,
    ) -> Result<()> {
        let repo = self.repository();
        let files = repo.files();

        for operation in operations {
            let path = operation.path();
            if !record.touched.iter().any(|touched| touched == path) {
                match files.read(path) {
                    Ok(data) => {
                        let backup = repo.store().put_blob(&data)?;
                        record.backups.insert(path.to_string(), backup);
                    }
                    Err(Error::NotFound(_)) => record.created.push(path.to_string()),
                    Err(e) => return Err(e),
                }
                record.touched.push(path.to_string());
            }

            match operation {
                FileOperation::Write { content, .. } => files.write(path, content.as_bytes())?,
                FileOperation::Delete { .. } => files.remove(path)?,
            }
        }
        Ok(())
    }

    /// Put every touched path back. Keeps going past failures and reports
    /// the first one.
    fn restore_touched(&self, record: &RollbackRecord) -> Result<()> {
        let repo = self.repository();
        let files = repo.files();
        let mut first_error = None;

        for path in &record.created {
            if let Err(e) = files.remove(path) {
                first_error.get_or_insert(e);
            }
        }
        for (path, backup) in &record.backups {
            let restored = repo
                .store()
                .get_blob(backup)
                .and_then(|data| files.write(path, &data));
            if let Err(e) = restored {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
