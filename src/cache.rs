//! Bounded in-memory cache of recently written records.
//!
//! Records live in one bucket per `(topic, partition)`, keyed by offset.
//! Each bucket holds at most `entries_per_partition` records; when the
//! bound is exceeded the lowest offsets are evicted first, so a bucket
//! always retains the most recent contiguous tail of its partition.
//!
//! The cache is deliberately conservative on reads: a window is served
//! only when the cache can prove it holds everything from the window's
//! start onward. If the requested start offset precedes the lowest
//! retained offset the lookup returns nothing, and the caller falls back
//! to the database. Serving a partial window that skips evicted records
//! would silently lose data for the consumer.

use crate::error::{Result, StoreError};
use crate::types::{FetchWindow, RecordEntry};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// One partition's retained records, ordered by offset.
type PartitionBucket = BTreeMap<i64, RecordEntry>;

/// In-memory record cache, bounded per partition.
///
/// Thread safe: topic registration takes a write lock on the outer map,
/// while inserts and lookups take a read lock plus the per-partition
/// mutex, so traffic on distinct partitions never contends.
pub struct RecordsCache {
    /// topic name -> one bucket per partition index.
    topics: RwLock<HashMap<String, Vec<Arc<Mutex<PartitionBucket>>>>>,
    /// Maximum records retained per partition bucket.
    entries_per_partition: usize,
}

impl RecordsCache {
    /// Create an empty cache retaining up to `entries_per_partition`
    /// records in each partition bucket.
    pub fn new(entries_per_partition: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            entries_per_partition,
        }
    }

    /// Register a topic so its records become cacheable.
    ///
    /// # Errors
    ///
    /// - `TopicAlreadyExists`: the topic is already registered
    /// - `InvalidArgument`: `partitions` is zero
    pub async fn add_topic(&self, name: &str, partitions: u32) -> Result<()> {
        if partitions == 0 {
            return Err(StoreError::InvalidArgument(format!(
                "topic '{}' must have at least one partition",
                name
            )));
        }
        let mut topics = self.topics.write().await;
        if topics.contains_key(name) {
            return Err(StoreError::TopicAlreadyExists(name.to_string()));
        }
        let buckets = (0..partitions)
            .map(|_| Arc::new(Mutex::new(BTreeMap::new())))
            .collect();
        topics.insert(name.to_string(), buckets);
        debug!("Registered topic '{}' with {} partitions in cache", name, partitions);
        Ok(())
    }

    /// Insert a batch of records, evicting the lowest offsets of any bucket
    /// that exceeds its bound.
    ///
    /// Records addressed to an unregistered topic or an out-of-range
    /// partition are skipped with a debug log rather than rejected; the
    /// database already holds them, the cache just cannot serve them.
    pub async fn insert(&self, records: &[RecordEntry]) {
        let topics = self.topics.read().await;
        for record in records {
            let Some(buckets) = topics.get(&record.topic) else {
                debug!(
                    "Skipping cache insert for unregistered topic '{}'",
                    record.topic
                );
                continue;
            };
            let Some(bucket) = buckets.get(record.partition as usize) else {
                debug!(
                    "Skipping cache insert for out-of-range partition {} of topic '{}'",
                    record.partition, record.topic
                );
                continue;
            };
            let mut bucket = bucket.lock().await;
            bucket.insert(record.offset, record.clone());
            while bucket.len() > self.entries_per_partition {
                bucket.pop_first();
            }
        }
    }

    /// Fetch a window of records, ascending by offset.
    ///
    /// Returns an empty vec when the bucket is empty, when the window's
    /// start offset precedes the lowest retained offset, or when the topic
    /// or partition is unknown. An empty result means "go to the database",
    /// never "those records do not exist".
    pub async fn get_window(&self, topic: &str, window: &FetchWindow) -> Vec<RecordEntry> {
        // An inverted range is an empty range, matching SQL BETWEEN; it must
        // not reach BTreeMap::range, which panics on start > end.
        if window.start_offset > window.end_offset {
            return Vec::new();
        }
        let topics = self.topics.read().await;
        let Some(bucket) = topics
            .get(topic)
            .and_then(|buckets| buckets.get(window.partition as usize))
        else {
            return Vec::new();
        };
        let bucket = bucket.lock().await;
        let Some((&lowest, _)) = bucket.first_key_value() else {
            return Vec::new();
        };
        if window.start_offset < lowest {
            // Everything below `lowest` was evicted (or predates the cache);
            // serving from here would skip records.
            return Vec::new();
        }
        bucket
            .range(window.start_offset..=window.end_offset)
            .take(window.limit)
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Point lookup of a single cached record.
    pub async fn get_record(&self, topic: &str, partition: u32, offset: i64) -> Option<RecordEntry> {
        let topics = self.topics.read().await;
        let bucket = topics.get(topic)?.get(partition as usize)?;
        let bucket = bucket.lock().await;
        bucket.get(&offset).cloned()
    }

    /// Number of records currently retained for one partition.
    pub async fn entry_count(&self, topic: &str, partition: u32) -> usize {
        let topics = self.topics.read().await;
        match topics
            .get(topic)
            .and_then(|buckets| buckets.get(partition as usize))
        {
            Some(bucket) => bucket.lock().await.len(),
            None => 0,
        }
    }

    /// Drop every cached record and topic registration.
    pub async fn clear(&self) {
        self.topics.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FetchWindow;

    fn record(topic: &str, partition: u32, offset: i64) -> RecordEntry {
        RecordEntry::new(
            topic,
            partition,
            offset,
            format!("k{}", offset).into_bytes(),
            Some(format!("v{}", offset).into_bytes().into()),
        )
    }

    #[tokio::test]
    async fn window_served_when_start_is_retained() {
        let cache = RecordsCache::new(100);
        cache.add_topic("orders", 1).await.unwrap();
        cache
            .insert(&[record("orders", 0, 0), record("orders", 0, 1), record("orders", 0, 2)])
            .await;

        let got = cache
            .get_window("orders", &FetchWindow::new(0, 0, 2, 100))
            .await;
        assert_eq!(got.len(), 3);
        assert!(got.windows(2).all(|w| w[0].offset < w[1].offset));
    }

    #[tokio::test]
    async fn window_starting_below_lowest_retained_is_a_miss() {
        let cache = RecordsCache::new(100);
        cache.add_topic("orders", 1).await.unwrap();
        cache
            .insert(&[record("orders", 0, 5), record("orders", 0, 6)])
            .await;

        // Start offset 3 precedes the lowest retained offset 5.
        let got = cache
            .get_window("orders", &FetchWindow::new(0, 3, 6, 100))
            .await;
        assert!(got.is_empty());

        // Starting at the lowest retained offset is fine.
        let got = cache
            .get_window("orders", &FetchWindow::new(0, 5, 6, 100))
            .await;
        assert_eq!(got.len(), 2);
    }

    #[tokio::test]
    async fn inverted_window_is_empty() {
        let cache = RecordsCache::new(100);
        cache.add_topic("orders", 1).await.unwrap();
        cache
            .insert(&[record("orders", 0, 5), record("orders", 0, 6)])
            .await;

        // end < start arises when a consumer derives `end` from a max offset
        // trailing its position; like SQL BETWEEN, it selects nothing.
        let got = cache
            .get_window("orders", &FetchWindow::new(0, 7, 6, 10))
            .await;
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn eviction_keeps_highest_offsets() {
        let cache = RecordsCache::new(3);
        cache.add_topic("orders", 1).await.unwrap();
        for offset in 0..5 {
            cache.insert(&[record("orders", 0, offset)]).await;
        }

        assert_eq!(cache.entry_count("orders", 0).await, 3);
        assert!(cache.get_record("orders", 0, 0).await.is_none());
        assert!(cache.get_record("orders", 0, 1).await.is_none());
        assert!(cache.get_record("orders", 0, 2).await.is_some());
        assert!(cache.get_record("orders", 0, 4).await.is_some());

        // A window reaching into the evicted range misses entirely.
        let got = cache
            .get_window("orders", &FetchWindow::new(0, 0, 4, 100))
            .await;
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn limit_caps_window_size() {
        let cache = RecordsCache::new(100);
        cache.add_topic("orders", 1).await.unwrap();
        for offset in 0..10 {
            cache.insert(&[record("orders", 0, offset)]).await;
        }

        let got = cache
            .get_window("orders", &FetchWindow::new(0, 0, 9, 4))
            .await;
        assert_eq!(got.len(), 4);
        assert_eq!(got[0].offset, 0);
        assert_eq!(got[3].offset, 3);
    }

    #[tokio::test]
    async fn duplicate_topic_registration_fails() {
        let cache = RecordsCache::new(10);
        cache.add_topic("orders", 2).await.unwrap();
        let err = cache.add_topic("orders", 2).await.unwrap_err();
        assert!(matches!(err, StoreError::TopicAlreadyExists(_)));
    }

    #[tokio::test]
    async fn zero_partition_topic_rejected() {
        let cache = RecordsCache::new(10);
        let err = cache.add_topic("orders", 0).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn partitions_are_independent() {
        let cache = RecordsCache::new(2);
        cache.add_topic("orders", 2).await.unwrap();
        for offset in 0..5 {
            cache.insert(&[record("orders", 0, offset)]).await;
        }
        cache.insert(&[record("orders", 1, 0)]).await;

        // Eviction on partition 0 does not touch partition 1.
        assert_eq!(cache.entry_count("orders", 0).await, 2);
        assert_eq!(cache.entry_count("orders", 1).await, 1);
        assert!(cache.get_record("orders", 1, 0).await.is_some());
    }

    #[tokio::test]
    async fn unregistered_topic_records_are_skipped() {
        let cache = RecordsCache::new(10);
        cache.add_topic("orders", 1).await.unwrap();
        cache
            .insert(&[record("orders", 0, 0), record("invoices", 0, 0), record("orders", 3, 0)])
            .await;

        assert_eq!(cache.entry_count("orders", 0).await, 1);
        assert_eq!(cache.entry_count("invoices", 0).await, 0);
    }
}
