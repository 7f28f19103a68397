//! PostgreSQL Record Store Implementation
//!
//! Production backend for multi-node deployments using PostgreSQL 14+.
//!
//! ## When to Use This Backend
//!
//! Use PostgreSQL instead of SQLite when you need:
//!
//! - **Multiple processes** sharing one record store
//! - **High availability**: PostgreSQL replication for durability
//! - **Larger retained logs**: better concurrent write throughput than a
//!   single SQLite file under many producers
//!
//! ## Runtime Queries vs Compile-Time Macros
//!
//! This implementation uses **runtime queries** (`sqlx::query`) instead of
//! compile-time macros (`sqlx::query!`) to avoid a DATABASE_URL dependency
//! during compilation. This allows building the SQLite and PostgreSQL
//! backends together behind one feature flag.
//!
//! ## Connection Pooling
//!
//! Uses `sqlx::PgPool` with:
//! - Default: 20 connections
//! - Configurable via [`PostgresRecordStore::with_pool_options`]
//! - Thread-safe, shareable via `Arc<PostgresRecordStore>`
//!
//! ## Migrations
//!
//! Run automatically in the constructor via
//! `sqlx::migrate!("./migrations-postgres")`.
//!
//! ## Implementation Notes
//!
//! - All timestamps are **milliseconds since Unix epoch** (i64)
//! - Offsets are **BIGINT**, assigned by the caller
//! - Unique violations on `committed_offsets` map to
//!   [`StoreError::OffsetsAlreadyCommitted`], detected by Postgres error
//!   text ("duplicate key value")
//! - Transactions ensure atomicity of record batches and offset commits

use crate::{
    error::{Result, StoreError},
    types::{FetchWindow, PostTxFn, RecordEntry, Topic, TxOutcome},
    RecordStore,
};
use async_trait::async_trait;
use bytes::Bytes;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, Postgres};
use sqlx::{Row, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// PostgreSQL-based record store implementation
pub struct PostgresRecordStore {
    pool: PgPool,
    running: AtomicBool,
}

impl PostgresRecordStore {
    /// Connect to PostgreSQL and run migrations.
    pub async fn new(url: &str) -> Result<Self> {
        let options = PgConnectOptions::from_str(url)?;
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations-postgres").run(&pool).await?;

        Ok(Self {
            pool,
            running: AtomicBool::new(false),
        })
    }

    /// Connect with caller-supplied pool options.
    pub async fn with_pool_options(url: &str, pool_options: PgPoolOptions) -> Result<Self> {
        let options = PgConnectOptions::from_str(url)?;
        let pool = pool_options.connect_with(options).await?;
        sqlx::migrate!("./migrations-postgres").run(&pool).await?;
        Ok(Self {
            pool,
            running: AtomicBool::new(false),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn ensure_running(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(StoreError::NotStarted);
        }
        Ok(())
    }

    async fn insert_records(
        tx: &mut Transaction<'_, Postgres>,
        records: &[RecordEntry],
        now: i64,
    ) -> Result<()> {
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO records (topic, partition_no, record_offset, record_key, record_value, record_timestamp)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(&record.topic)
            .bind(record.partition as i64)
            .bind(record.offset)
            .bind(record.key.as_ref())
            .bind(record.value.as_deref())
            .bind(now)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn insert_offsets(
        tx: &mut Transaction<'_, Postgres>,
        topic: &str,
        group: &str,
        offsets: &HashMap<u32, i64>,
        now: i64,
    ) -> Result<()> {
        for (&partition, &offset) in offsets {
            let result = sqlx::query(
                r#"
                INSERT INTO committed_offsets (topic, consumer_group_name, partition_no, committed_offset, commit_timestamp)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(topic)
            .bind(group)
            .bind(partition as i64)
            .bind(offset)
            .bind(now)
            .execute(&mut **tx)
            .await;

            if let Err(e) = result {
                if e.to_string().contains("duplicate key") {
                    return Err(StoreError::OffsetsAlreadyCommitted {
                        topic: topic.to_string(),
                        group: group.to_string(),
                        partition,
                        offset,
                    });
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> RecordEntry {
        RecordEntry {
            topic: row.get::<String, _>("topic"),
            partition: row.get::<i64, _>("partition_no") as u32,
            offset: row.get::<i64, _>("record_offset"),
            key: Bytes::from(row.get::<Vec<u8>, _>("record_key")),
            value: row.get::<Option<Vec<u8>>, _>("record_value").map(Bytes::from),
        }
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn start(&self) -> Result<()> {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("PostgreSQL record store started");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("PostgreSQL record store stopped");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn create_topic(&self, name: &str, partitions: u32) -> Result<()> {
        self.ensure_running()?;
        if partitions == 0 {
            return Err(StoreError::InvalidArgument(format!(
                "topic '{}' must have at least one partition",
                name
            )));
        }

        let result =
            sqlx::query("INSERT INTO topics (topic_name, partitions_number) VALUES ($1, $2)")
                .bind(name)
                .bind(partitions as i64)
                .execute(&self.pool)
                .await;

        if let Err(e) = result {
            if e.to_string().contains("duplicate key") {
                return Err(StoreError::TopicAlreadyExists(name.to_string()));
            }
            return Err(e.into());
        }

        Ok(())
    }

    async fn get_topics(&self) -> Result<Vec<Topic>> {
        self.ensure_running()?;

        let rows =
            sqlx::query("SELECT topic_name, partitions_number FROM topics ORDER BY topic_name")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .iter()
            .map(|row| Topic {
                name: row.get::<String, _>("topic_name"),
                partitions: row.get::<i64, _>("partitions_number") as u32,
            })
            .collect())
    }

    async fn write_records(&self, records: Vec<RecordEntry>, post_tx: PostTxFn) -> Result<()> {
        self.ensure_running()?;

        let result = async {
            let mut tx = self.pool.begin().await?;
            Self::insert_records(&mut tx, &records, Self::now_ms()).await?;
            tx.commit().await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                post_tx(TxOutcome::Committed);
                Ok(())
            }
            Err(e) => {
                post_tx(TxOutcome::RolledBack);
                Err(e)
            }
        }
    }

    async fn read_records(
        &self,
        topic: &str,
        windows: &[FetchWindow],
    ) -> Result<Vec<RecordEntry>> {
        self.ensure_running()?;

        let mut records = Vec::new();
        for window in windows {
            let rows = sqlx::query(
                r#"
                SELECT topic, partition_no, record_offset, record_key, record_value
                FROM records
                WHERE topic = $1 AND partition_no = $2 AND record_offset BETWEEN $3 AND $4
                ORDER BY record_offset ASC
                LIMIT $5
                "#,
            )
            .bind(topic)
            .bind(window.partition as i64)
            .bind(window.start_offset)
            .bind(window.end_offset)
            .bind(window.limit as i64)
            .fetch_all(&self.pool)
            .await?;

            records.extend(rows.iter().map(Self::row_to_record));
        }

        Ok(records)
    }

    async fn get_record(
        &self,
        topic: &str,
        partition: u32,
        offset: i64,
    ) -> Result<Option<RecordEntry>> {
        self.ensure_running()?;

        let row = sqlx::query(
            r#"
            SELECT topic, partition_no, record_offset, record_key, record_value
            FROM records
            WHERE topic = $1 AND partition_no = $2 AND record_offset = $3
            "#,
        )
        .bind(topic)
        .bind(partition as i64)
        .bind(offset)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_record))
    }

    async fn write_offsets(
        &self,
        topic: &str,
        group: &str,
        offsets: &HashMap<u32, i64>,
    ) -> Result<()> {
        self.ensure_running()?;

        let mut tx = self.pool.begin().await?;
        Self::insert_offsets(&mut tx, topic, group, offsets, Self::now_ms()).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn write_offsets_and_records(
        &self,
        topic: &str,
        group: &str,
        offsets: &HashMap<u32, i64>,
        records: Vec<RecordEntry>,
        post_tx: PostTxFn,
    ) -> Result<()> {
        self.ensure_running()?;

        let result = async {
            let mut tx = self.pool.begin().await?;
            let now = Self::now_ms();
            // Records first: an offset conflict then rolls both back.
            Self::insert_records(&mut tx, &records, now).await?;
            Self::insert_offsets(&mut tx, topic, group, offsets, now).await?;
            tx.commit().await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                post_tx(TxOutcome::Committed);
                Ok(())
            }
            Err(e) => {
                post_tx(TxOutcome::RolledBack);
                Err(e)
            }
        }
    }

    async fn get_max_committed_offsets(
        &self,
        topic: &str,
        group: &str,
        partitions: &[u32],
    ) -> Result<HashMap<u32, Option<i64>>> {
        self.ensure_running()?;

        let rows = sqlx::query(
            r#"
            SELECT partition_no, MAX(committed_offset) AS max_offset
            FROM committed_offsets
            WHERE topic = $1 AND consumer_group_name = $2
            GROUP BY partition_no
            "#,
        )
        .bind(topic)
        .bind(group)
        .fetch_all(&self.pool)
        .await?;

        let mut result: HashMap<u32, Option<i64>> =
            partitions.iter().map(|&p| (p, None)).collect();
        for row in rows {
            let partition = row.get::<i64, _>("partition_no") as u32;
            if let Some(slot) = result.get_mut(&partition) {
                *slot = Some(row.get::<i64, _>("max_offset"));
            }
        }

        Ok(result)
    }

    async fn get_max_offsets_per_topic(
        &self,
    ) -> Result<HashMap<String, HashMap<u32, Option<i64>>>> {
        self.ensure_running()?;

        let topics = self.get_topics().await?;
        let mut result: HashMap<String, HashMap<u32, Option<i64>>> = topics
            .into_iter()
            .map(|t| (t.name, (0..t.partitions).map(|p| (p, None)).collect()))
            .collect();

        let rows = sqlx::query(
            r#"
            SELECT topic, partition_no, MAX(record_offset) AS max_offset
            FROM records
            GROUP BY topic, partition_no
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let topic = row.get::<String, _>("topic");
            let partition = row.get::<i64, _>("partition_no") as u32;
            if let Some(slot) = result.get_mut(&topic).and_then(|m| m.get_mut(&partition)) {
                *slot = Some(row.get::<i64, _>("max_offset"));
            }
        }

        Ok(result)
    }

    async fn delete_records_older_than(&self, topic: &str, older_than_ms: i64) -> Result<u64> {
        self.ensure_running()?;

        let rows_affected =
            sqlx::query("DELETE FROM records WHERE topic = $1 AND record_timestamp < $2")
                .bind(topic)
                .bind(older_than_ms)
                .execute(&self.pool)
                .await?
                .rows_affected();

        Ok(rows_affected)
    }

    async fn delete_offsets_older_than(&self, topic: &str, older_than_ms: i64) -> Result<u64> {
        self.ensure_running()?;

        let rows_affected =
            sqlx::query("DELETE FROM committed_offsets WHERE topic = $1 AND commit_timestamp < $2")
                .bind(topic)
                .bind(older_than_ms)
                .execute(&self.pool)
                .await?
                .rows_affected();

        Ok(rows_affected)
    }
}
