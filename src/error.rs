//! Store Error Types
//!
//! This module defines all error types that can occur during record store
//! operations.
//!
//! ## Error Categories
//!
//! ### Commit Conflicts
//! - `OffsetsAlreadyCommitted`: a consumer group tried to commit an offset
//!   value that already exists for the same topic/group/partition. The whole
//!   batch is rolled back. Retrying the same call is pointless; the caller
//!   must re-derive the correct next offset.
//!
//! ### Argument Errors
//! - `TopicAlreadyExists`: duplicate topic creation (or duplicate cache
//!   registration)
//! - `InvalidArgument`: invalid usage such as a zero partition count
//! - `NotStarted`: an operation other than start/stop/is_running was called
//!   before the store was started
//!
//! ### Database Errors
//! - `Database`: any underlying database failure (connectivity, statement
//!   error, constraint violation other than the offset-conflict case). The
//!   triggering transaction is rolled back before this propagates, and this
//!   layer never retries; retryability is a caller decision.
//!
//! ## Usage
//!
//! All store operations return `Result<T>` which is aliased to
//! `Result<T, StoreError>`. This allows clean error propagation with `?`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("offset {offset} already committed for {topic}/{partition} by group {group}")]
    OffsetsAlreadyCommitted {
        topic: String,
        group: String,
        partition: u32,
        offset: i64,
    },

    #[error("topic already exists: {0}")]
    TopicAlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("store is not started")]
    NotStarted,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(String),
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        StoreError::Migration(e.to_string())
    }
}
