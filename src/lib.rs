//! sqlbus - SQL-backed durable record store
//!
//! This crate implements the storage engine behind a topic/partition
//! publish-subscribe abstraction that runs without an external broker: a
//! relational database is the durable log, and a bounded in-process cache
//! accelerates reads of recently written records.
//!
//! ## Why a SQL broker?
//!
//! For small deployments, tests, and environments where operating a
//! dedicated broker cluster is undesirable, any SQL-capable store the
//! platform already runs can double as the messaging fabric. This crate
//! provides the part that is hard to get right:
//!
//! - **Transactional writes**: records and consumer offsets persist in one
//!   transaction, with an at-most-once post-transaction callback so callers
//!   can chain side effects exactly once per attempted write.
//! - **Strict per-partition ordering**: range reads always return ascending
//!   offsets with no gaps or duplicates.
//! - **A cache that never lies**: the read-through cache refuses to serve a
//!   window unless it holds the window's start, so a caller can never skip
//!   records it has not seen.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────┐   writes (write-through on commit)
//! │ CachedRecordStore  │──────────────────────────────┐
//! │  (decorator)       │   reads: cache first         │
//! └────────┬───────────┘                              ▼
//!          │ cache miss                      ┌────────────────┐
//!          ▼                                 │  RecordsCache  │
//! ┌────────────────────┐                     │ (per-partition,│
//! │ SqliteRecordStore  │                     │  FIFO-bounded) │
//! │ PostgresRecordStore│                     └────────────────┘
//! └────────┬───────────┘
//!          │ sqlx pool, one transaction per operation
//!          ▼
//!   topics / records / committed_offsets tables
//! ```
//!
//! ## Usage Example
//!
//! ```ignore
//! use sqlbus::{CachedRecordStore, FetchWindow, RecordEntry, RecordStore, SqliteRecordStore};
//!
//! let store = CachedRecordStore::new(SqliteRecordStore::new("bus.db").await?);
//! store.start().await?;
//!
//! store.create_topic("orders", 1).await?;
//! store
//!     .write_records(
//!         vec![RecordEntry::new("orders", 0, 0, &b"a"[..], None)],
//!         Box::new(|outcome| println!("write resolved: {outcome:?}")),
//!     )
//!     .await?;
//!
//! let records = store
//!     .read_records("orders", &[FetchWindow::new(0, 0, 10, 100)])
//!     .await?;
//! ```
//!
//! ## What this crate does NOT do
//!
//! Offsets are assigned by the caller under a single-writer-per-partition
//! contract; this engine neither generates nor validates them. There is no
//! replication, no consumer-group rebalancing, and no cross-partition
//! ordering. Wire serialization of keys/values is an opaque byte boundary.

pub mod cache;
pub mod cached_store;
pub mod error;
pub mod store;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use cache::RecordsCache;
pub use cached_store::{CacheConfig, CachedRecordStore};
pub use error::{Result, StoreError};
pub use store::SqliteRecordStore;
pub use types::{FetchWindow, PostTxFn, RecordEntry, Topic, TxOutcome};

#[cfg(feature = "postgres")]
pub use postgres::PostgresRecordStore;

use async_trait::async_trait;
use std::collections::HashMap;

/// Record store trait - the contract every storage engine implements.
///
/// This is the only boundary the rest of the platform depends on; callers
/// hold a `RecordStore` and must not care whether it is the plain
/// database-backed provider or the cached decorator.
///
/// ## Lifecycle
///
/// Implementations are `stopped -> started -> stopped`, idempotent on
/// repeated `start`/`stop`. No operation other than `start`, `stop` and
/// `is_running` is valid before the first `start`; calling one returns
/// [`StoreError::NotStarted`].
///
/// ## Blocking behavior
///
/// Every operation may await on acquiring a pooled connection and executing
/// statements. Timeouts are a property of the underlying pool and surface as
/// ordinary [`StoreError::Database`] errors; this layer performs no retries.
///
/// ## Thread safety
///
/// All implementations are Send + Sync and safe to share via
/// `Arc<dyn RecordStore>`. Concurrent writers to *different* partitions may
/// proceed independently; two writers to the *same* partition must be
/// serialized by the caller (single-writer-per-partition contract).
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ============================================================
    // LIFECYCLE
    // ============================================================

    /// Start the store. Idempotent.
    async fn start(&self) -> Result<()>;

    /// Stop the store. Idempotent.
    async fn stop(&self) -> Result<()>;

    /// Whether the store is currently started.
    fn is_running(&self) -> bool;

    // ============================================================
    // TOPIC CATALOGUE
    // ============================================================

    /// Create a new topic with the given partition count.
    ///
    /// # Errors
    ///
    /// - `TopicAlreadyExists`: a topic with this name already exists
    /// - `InvalidArgument`: `partitions` is zero
    async fn create_topic(&self, name: &str, partitions: u32) -> Result<()>;

    /// List every known topic.
    async fn get_topics(&self) -> Result<Vec<Topic>>;

    // ============================================================
    // RECORD OPERATIONS
    // ============================================================

    /// Persist a batch of records in one transaction.
    ///
    /// `post_tx` is invoked exactly once after the transaction resolves,
    /// with [`TxOutcome::Committed`] or [`TxOutcome::RolledBack`], whether
    /// or not the write succeeded. A rollback leaves no partial batch
    /// behind.
    async fn write_records(&self, records: Vec<RecordEntry>, post_tx: PostTxFn) -> Result<()>;

    /// Read up to `limit` records per window, ascending by offset.
    ///
    /// Each [`FetchWindow`] is an inclusive `[start_offset, end_offset]`
    /// range for one partition of `topic`. Callers may rely on ascending
    /// offset order within a window; no ordering holds across windows.
    async fn read_records(&self, topic: &str, windows: &[FetchWindow])
        -> Result<Vec<RecordEntry>>;

    /// Point lookup of a single record; `None` if absent.
    async fn get_record(
        &self,
        topic: &str,
        partition: u32,
        offset: i64,
    ) -> Result<Option<RecordEntry>>;

    // ============================================================
    // CONSUMER OFFSET OPERATIONS
    // ============================================================

    /// Commit one offset per partition for a consumer group, atomically.
    ///
    /// The batch is all-or-nothing: if any offset in the call collides with
    /// a value already committed for the same `(topic, group, partition)`,
    /// the whole transaction rolls back and
    /// [`StoreError::OffsetsAlreadyCommitted`] is returned.
    async fn write_offsets(
        &self,
        topic: &str,
        group: &str,
        offsets: &HashMap<u32, i64>,
    ) -> Result<()>;

    /// Persist records and commit offsets in a single transaction.
    ///
    /// This is the primitive a "commit what I just processed" consumer loop
    /// uses for exactly-once bookkeeping per poll cycle: either both the
    /// offsets and the records persist, or neither does. An offset conflict
    /// rolls back record writes issued earlier in the same call. `post_tx`
    /// behaves as in [`RecordStore::write_records`].
    async fn write_offsets_and_records(
        &self,
        topic: &str,
        group: &str,
        offsets: &HashMap<u32, i64>,
        records: Vec<RecordEntry>,
        post_tx: PostTxFn,
    ) -> Result<()>;

    /// The highest committed offset per requested partition, `None` where
    /// the group has never committed.
    async fn get_max_committed_offsets(
        &self,
        topic: &str,
        group: &str,
        partitions: &[u32],
    ) -> Result<HashMap<u32, Option<i64>>>;

    /// For every known topic, the maximum record offset per partition
    /// (`None` for partitions with no records). Used to warm a consumer's
    /// starting position.
    async fn get_max_offsets_per_topic(&self)
        -> Result<HashMap<String, HashMap<u32, Option<i64>>>>;

    // ============================================================
    // RETENTION
    // ============================================================

    /// Delete records of `topic` written before `older_than_ms`
    /// (milliseconds since epoch). Returns the number of rows removed.
    async fn delete_records_older_than(&self, topic: &str, older_than_ms: i64) -> Result<u64>;

    /// Delete committed offsets of `topic` written before `older_than_ms`.
    /// Returns the number of rows removed.
    async fn delete_offsets_older_than(&self, topic: &str, older_than_ms: i64) -> Result<u64>;
}
