//! Persistence and coordination sinks used by the orchestrator.
//!
//! Four capabilities, each a trait so the pipeline can run against SQLite,
//! memory or (for locking) Redis:
//! - [`UploadStore`]: upload status transitions
//! - [`GroupStore`]: the groups produced for an upload
//! - [`ProgressSink`]: percent/message progress reporting
//! - [`ProcessingLock`]: expiring single-flight lock

mod memory;
mod models;
#[cfg(feature = "redis-backend")]
mod redis_lock;
mod sqlite;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::{MemoryLock, MemoryStore};
pub use models::{Group, NewGroup, Upload, UploadStatus};
#[cfg(feature = "redis-backend")]
pub use redis_lock::RedisLock;
pub use sqlite::SqliteStore;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[cfg(feature = "redis-backend")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Lock backend not supported: {0}")]
    UnsupportedBackend(String),

    #[error("Upload not found: {0}")]
    UploadNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Upload records and their status transitions.
pub trait UploadStore: Send + Sync {
    /// Insert an upload; an existing row with the same id is left untouched.
    fn create_upload(&self, upload: &Upload) -> Result<()>;

    fn get_upload(&self, upload_id: &str) -> Result<Option<Upload>>;

    /// Point an existing upload at a new owner and source file.
    fn set_source(&self, upload_id: &str, owner_id: &str, source_path: &Path) -> Result<()>;

    /// Status `processing`, error and progress cleared.
    fn mark_processing(&self, upload_id: &str) -> Result<()>;

    /// Status `completed` with the document's page count.
    fn mark_completed(&self, upload_id: &str, total_pages: u32) -> Result<()>;

    /// Status `failed` with a caller-safe message.
    fn mark_failed(&self, upload_id: &str, message: &str) -> Result<()>;
}

/// Groups produced by processing an upload.
pub trait GroupStore: Send + Sync {
    fn create_group(&self, group: &NewGroup) -> Result<Group>;

    /// Delete every group of an upload, returning the deleted rows.
    fn delete_all_for_upload(&self, upload_id: &str) -> Result<Vec<Group>>;

    /// Groups of an upload in creation order.
    fn list_for_upload(&self, upload_id: &str) -> Result<Vec<Group>>;
}

/// Receives progress updates.
pub trait ProgressSink: Send + Sync {
    fn write_progress(&self, upload_id: &str, percent: u8, message: &str) -> Result<()>;
}

/// Exclusive lock that expires on its own after `ttl`.
pub trait ProcessingLock: Send + Sync {
    /// `true` if the lock was acquired, `false` if someone else holds it.
    fn acquire(&self, key: &str, ttl: Duration) -> Result<bool>;

    fn release(&self, key: &str) -> Result<()>;
}

/// Parse an RFC 3339 timestamp from storage, defaulting to the Unix epoch.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}
