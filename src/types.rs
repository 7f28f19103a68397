//! Core Data Types
//!
//! This module defines the data structures shared by every `RecordStore`
//! implementation.
//!
//! ## Types Overview
//!
//! ### Topic
//! A named, partitioned log. The partition count is fixed at creation time
//! and never changes for the lifetime of the topic.
//!
//! ### RecordEntry
//! A single record addressed by `(topic, partition, offset)`. The payload is
//! an opaque byte boundary: `key` is always present, `value` may be `None`,
//! which callers using compacted semantics treat as a tombstone. Equality and
//! hashing are by value, including byte contents, so records can be used as
//! map keys and compared in tests.
//!
//! ### FetchWindow
//! One bounded range-read request for one partition: `[start_offset,
//! end_offset]` inclusive on both ends, capped at `limit` records.
//!
//! ### TxOutcome
//! Delivered to the caller-supplied post-transaction callback after every
//! write, whether the transaction committed or rolled back. This is what lets
//! a caller chain cache population or publish acknowledgement exactly once
//! per attempted write.
//!
//! ## Design Decisions
//!
//! - Payloads use `bytes::Bytes` for cheap clones between the database layer
//!   and the in-memory cache.
//! - Offsets are i64 (BIGINT in SQL); they are assigned by the caller and
//!   this crate never generates them.
//! - All types are Serialize/Deserialize so callers can ship them over their
//!   own API surfaces.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A named, partitioned log of records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    /// Topic name (unique identifier)
    pub name: String,

    /// Number of partitions (immutable after creation, always > 0)
    pub partitions: u32,
}

/// A single record in a topic partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordEntry {
    /// Topic this record belongs to
    pub topic: String,

    /// Partition within the topic (0-indexed)
    pub partition: u32,

    /// Caller-assigned position within the partition
    pub offset: i64,

    /// Record key (opaque bytes)
    pub key: Bytes,

    /// Record payload; `None` is a tombstone marker for compacted usage
    pub value: Option<Bytes>,
}

impl RecordEntry {
    pub fn new(
        topic: impl Into<String>,
        partition: u32,
        offset: i64,
        key: impl Into<Bytes>,
        value: Option<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: key.into(),
            value,
        }
    }
}

/// A bounded range-read request for one partition.
///
/// Both offset bounds are inclusive: a window of `(0, 2, 10)` asks for
/// offsets 0, 1 and 2, returning at most 10 records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    /// Partition to read from
    pub partition: u32,

    /// First offset of the range (inclusive)
    pub start_offset: i64,

    /// Last offset of the range (inclusive)
    pub end_offset: i64,

    /// Maximum number of records to return
    pub limit: usize,
}

impl FetchWindow {
    pub fn new(partition: u32, start_offset: i64, end_offset: i64, limit: usize) -> Self {
        Self {
            partition,
            start_offset,
            end_offset,
            limit,
        }
    }
}

/// The resolution of a write transaction, passed to the post-transaction
/// callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxOutcome {
    /// The transaction committed; all writes in the call are durable.
    Committed,
    /// The transaction rolled back; none of the writes in the call persisted.
    RolledBack,
}

/// Caller-supplied continuation invoked exactly once after every write
/// operation, with the outcome of the enclosing transaction.
pub type PostTxFn = Box<dyn FnOnce(TxOutcome) + Send>;
