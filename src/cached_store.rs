//! Cached Record Store
//!
//! Decorator that layers a [`RecordsCache`] over any [`RecordStore`]
//! implementation. Reads try the cache first; writes go through the inner
//! store and populate the cache only after the transaction committed, so the
//! cache never holds records that were rolled back.
//!
//! ## Caching Strategy
//!
//! - **Write-through on commit**: every record of a successful
//!   `write_records` / `write_offsets_and_records` call is inserted into the
//!   cache after the inner store reports success.
//! - **Whole windows only**: each fetch window is served entirely from the
//!   cache or entirely from the database, never stitched from both. The
//!   cache already guarantees it only answers when it holds the window's
//!   start, so a cache answer can never skip records.
//! - **No invalidation on delete**: retention deletes records the single
//!   writer will never append again and consumers have long passed. Serving
//!   them from the cache until they age out is acceptable staleness; see
//!   the retention methods.
//!
//! ## Usage
//!
//! ```ignore
//! use sqlbus::{CachedRecordStore, RecordStore, SqliteRecordStore};
//!
//! let store = CachedRecordStore::new(SqliteRecordStore::new("bus.db").await?);
//! store.start().await?; // seeds topic registrations from the inner store
//! ```

use crate::{
    cache::RecordsCache,
    error::{Result, StoreError},
    types::{FetchWindow, PostTxFn, RecordEntry, Topic},
    RecordStore,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Configuration for the record cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum records retained per topic partition.
    pub entries_per_partition: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entries_per_partition: 10_000,
        }
    }
}

/// Caching decorator around any record store.
pub struct CachedRecordStore<S: RecordStore> {
    inner: Arc<S>,
    cache: RecordsCache,
    /// Serializes start/stop so a stop can never interleave with a start
    /// that is still seeding topic registrations.
    lifecycle: Mutex<()>,
}

impl<S: RecordStore> CachedRecordStore<S> {
    /// Wrap a store with the default cache configuration.
    pub fn new(inner: S) -> Self {
        Self::with_config(inner, CacheConfig::default())
    }

    /// Wrap a store with an explicit cache configuration.
    pub fn with_config(inner: S, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(inner),
            cache: RecordsCache::new(config.entries_per_partition),
            lifecycle: Mutex::new(()),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }
}

#[async_trait]
impl<S: RecordStore> RecordStore for CachedRecordStore<S> {
    async fn start(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.inner.start().await?;

        // Register every existing topic so its records become cacheable.
        // `start` is idempotent, so already-registered topics are fine.
        for topic in self.inner.get_topics().await? {
            match self.cache.add_topic(&topic.name, topic.partitions).await {
                Ok(()) | Err(StoreError::TopicAlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.inner.stop().await?;
        self.cache.clear().await;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    async fn create_topic(&self, name: &str, partitions: u32) -> Result<()> {
        self.inner.create_topic(name, partitions).await?;
        self.cache.add_topic(name, partitions).await
    }

    async fn get_topics(&self) -> Result<Vec<Topic>> {
        self.inner.get_topics().await
    }

    async fn write_records(&self, records: Vec<RecordEntry>, post_tx: PostTxFn) -> Result<()> {
        self.inner.write_records(records.clone(), post_tx).await?;
        // Only reached on commit; rolled-back batches never enter the cache.
        self.cache.insert(&records).await;
        Ok(())
    }

    async fn read_records(
        &self,
        topic: &str,
        windows: &[FetchWindow],
    ) -> Result<Vec<RecordEntry>> {
        let mut records = Vec::new();
        for window in windows {
            let cached = self.cache.get_window(topic, window).await;
            if cached.is_empty() {
                debug!(
                    "Cache miss for topic '{}' partition {} offsets [{}, {}]",
                    topic, window.partition, window.start_offset, window.end_offset
                );
                records.extend(
                    self.inner
                        .read_records(topic, std::slice::from_ref(window))
                        .await?,
                );
            } else {
                records.extend(cached);
            }
        }
        Ok(records)
    }

    async fn get_record(
        &self,
        topic: &str,
        partition: u32,
        offset: i64,
    ) -> Result<Option<RecordEntry>> {
        if let Some(record) = self.cache.get_record(topic, partition, offset).await {
            return Ok(Some(record));
        }
        self.inner.get_record(topic, partition, offset).await
    }

    async fn write_offsets(
        &self,
        topic: &str,
        group: &str,
        offsets: &HashMap<u32, i64>,
    ) -> Result<()> {
        self.inner.write_offsets(topic, group, offsets).await
    }

    async fn write_offsets_and_records(
        &self,
        topic: &str,
        group: &str,
        offsets: &HashMap<u32, i64>,
        records: Vec<RecordEntry>,
        post_tx: PostTxFn,
    ) -> Result<()> {
        self.inner
            .write_offsets_and_records(topic, group, offsets, records.clone(), post_tx)
            .await?;
        self.cache.insert(&records).await;
        Ok(())
    }

    async fn get_max_committed_offsets(
        &self,
        topic: &str,
        group: &str,
        partitions: &[u32],
    ) -> Result<HashMap<u32, Option<i64>>> {
        self.inner
            .get_max_committed_offsets(topic, group, partitions)
            .await
    }

    async fn get_max_offsets_per_topic(
        &self,
    ) -> Result<HashMap<String, HashMap<u32, Option<i64>>>> {
        self.inner.get_max_offsets_per_topic().await
    }

    /// Deletes from the database only; cached copies age out by eviction.
    async fn delete_records_older_than(&self, topic: &str, older_than_ms: i64) -> Result<u64> {
        self.inner.delete_records_older_than(topic, older_than_ms).await
    }

    async fn delete_offsets_older_than(&self, topic: &str, older_than_ms: i64) -> Result<u64> {
        self.inner.delete_offsets_older_than(topic, older_than_ms).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteRecordStore;
    use crate::types::TxOutcome;
    use bytes::Bytes;

    async fn started(config: CacheConfig) -> CachedRecordStore<SqliteRecordStore> {
        let inner = SqliteRecordStore::new_in_memory().await.unwrap();
        let store = CachedRecordStore::with_config(inner, config);
        store.start().await.unwrap();
        store
    }

    fn record(topic: &str, partition: u32, offset: i64) -> RecordEntry {
        RecordEntry::new(
            topic,
            partition,
            offset,
            format!("k{}", offset).into_bytes(),
            Some(Bytes::from(format!("v{}", offset))),
        )
    }

    fn no_op() -> PostTxFn {
        Box::new(|_| {})
    }

    #[tokio::test]
    async fn reads_hit_cache_after_write() {
        let store = started(CacheConfig::default()).await;
        store.create_topic("orders", 1).await.unwrap();
        store
            .write_records((0..3).map(|o| record("orders", 0, o)).collect(), no_op())
            .await
            .unwrap();

        // Delete the database rows; the cached copies must still serve.
        let future = chrono::Utc::now().timestamp_millis() + 60_000;
        assert_eq!(
            store.delete_records_older_than("orders", future).await.unwrap(),
            3
        );

        let got = store
            .read_records("orders", &[FetchWindow::new(0, 0, 2, 100)])
            .await
            .unwrap();
        assert_eq!(got.len(), 3);
        assert!(store.get_record("orders", 0, 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn window_below_retained_range_falls_back_to_database() {
        let store = started(CacheConfig { entries_per_partition: 2 }).await;
        store.create_topic("orders", 1).await.unwrap();
        store
            .write_records((0..5).map(|o| record("orders", 0, o)).collect(), no_op())
            .await
            .unwrap();

        // The cache retains offsets 3..=4 only; a read from 0 must come
        // from the database and still see every record.
        let got = store
            .read_records("orders", &[FetchWindow::new(0, 0, 4, 100)])
            .await
            .unwrap();
        assert_eq!(
            got.iter().map(|r| r.offset).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4]
        );
    }

    #[tokio::test]
    async fn rolled_back_write_does_not_populate_cache() {
        let store = started(CacheConfig::default()).await;
        store.create_topic("orders", 1).await.unwrap();
        store
            .write_records(vec![record("orders", 0, 0)], no_op())
            .await
            .unwrap();

        let err = store
            .write_records(
                vec![record("orders", 0, 5), record("orders", 0, 0)],
                Box::new(|o| assert_eq!(o, TxOutcome::RolledBack)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));

        // A cached offset 5 would make this return Some.
        assert!(store.get_record("orders", 0, 5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn combined_write_populates_cache_on_commit_only() {
        let store = started(CacheConfig::default()).await;
        store.create_topic("orders", 1).await.unwrap();

        store
            .write_offsets_and_records(
                "orders",
                "g1",
                &HashMap::from([(0, 0i64)]),
                vec![record("orders", 0, 0)],
                no_op(),
            )
            .await
            .unwrap();

        let err = store
            .write_offsets_and_records(
                "orders",
                "g1",
                &HashMap::from([(0, 0i64)]),
                vec![record("orders", 0, 1)],
                no_op(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::OffsetsAlreadyCommitted { .. }));
        assert!(store.get_record("orders", 0, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn restart_reseeds_topic_registrations() {
        let inner = SqliteRecordStore::new_in_memory().await.unwrap();
        inner.start().await.unwrap();
        inner.create_topic("orders", 1).await.unwrap();
        inner
            .write_records(vec![record("orders", 0, 0)], no_op())
            .await
            .unwrap();
        inner.stop().await.unwrap();

        // Wrap the pre-populated store; start() must pick up the existing
        // topic so fresh writes become cacheable.
        let store = CachedRecordStore::new(inner);
        store.start().await.unwrap();
        store
            .write_records(vec![record("orders", 0, 1)], no_op())
            .await
            .unwrap();

        // Offset 0 predates the cache, so the full window comes from the
        // database; the point lookup of offset 1 is served from the cache.
        let got = store
            .read_records("orders", &[FetchWindow::new(0, 0, 1, 100)])
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
        assert!(store.get_record("orders", 0, 1).await.unwrap().is_some());

        // stop() clears the cache; start() again must not fail on the
        // already-known topic.
        store.stop().await.unwrap();
        store.start().await.unwrap();
    }

    #[tokio::test]
    async fn inverted_window_matches_database_semantics() {
        let store = started(CacheConfig::default()).await;
        store.create_topic("orders", 1).await.unwrap();
        store
            .write_records(vec![record("orders", 0, 5), record("orders", 0, 6)], no_op())
            .await
            .unwrap();

        // end < start selects nothing, cached partition or not, matching
        // the SQL BETWEEN semantics of the plain store.
        let inverted = FetchWindow::new(0, 7, 6, 10);
        let got = store.read_records("orders", &[inverted.clone()]).await.unwrap();
        assert!(got.is_empty());
        let got = store.inner().read_records("orders", &[inverted]).await.unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn concurrent_start_and_stop_settle_cleanly() {
        let inner = SqliteRecordStore::new_in_memory().await.unwrap();
        let store = Arc::new(CachedRecordStore::new(inner));
        store.start().await.unwrap();
        store.create_topic("orders", 1).await.unwrap();

        for _ in 0..20 {
            let a = store.clone();
            let b = store.clone();
            let starting = tokio::spawn(async move { a.start().await });
            let stopping = tokio::spawn(async move { b.stop().await });
            starting.await.unwrap().unwrap();
            stopping.await.unwrap().unwrap();
        }

        // Whichever order each race resolved in, a final start must leave
        // the store fully usable, with the topic registered so new writes
        // are served from the cache.
        store.start().await.unwrap();
        store
            .write_records(vec![record("orders", 0, 0)], no_op())
            .await
            .unwrap();
        let future = chrono::Utc::now().timestamp_millis() + 60_000;
        store.delete_records_older_than("orders", future).await.unwrap();
        assert!(store.get_record("orders", 0, 0).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delegated_queries_reach_inner_store() {
        let store = started(CacheConfig::default()).await;
        store.create_topic("orders", 2).await.unwrap();
        store
            .write_offsets("orders", "g1", &HashMap::from([(0, 3i64)]))
            .await
            .unwrap();

        let max = store
            .get_max_committed_offsets("orders", "g1", &[0, 1])
            .await
            .unwrap();
        assert_eq!(max.get(&0), Some(&Some(3)));
        assert_eq!(max.get(&1), Some(&None));

        let topics = store.get_topics().await.unwrap();
        assert_eq!(topics.len(), 1);

        let all = store.get_max_offsets_per_topic().await.unwrap();
        assert_eq!(all["orders"].get(&0), Some(&None));
    }
}
