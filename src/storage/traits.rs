// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backend seams.
//!
//! Every pipeline talks to the relational database through [`Database`] and
//! to Redis through [`RedisSource`]. The sqlx and redis-rs implementations
//! live in [`super::sql`] and [`super::redis`]; [`super::memory`] provides
//! in-process doubles for tests.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::ha::decision::Decision;
use crate::types::{Binary, TableRows};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Connection lost: {0}")]
    Connection(String),
    /// One event of a history batch could not be written; the batch was
    /// rolled back and may be retried without it.
    #[error("Event {index} of batch rejected: {message}")]
    Rejected { index: usize, message: String },
}

// ═══════════════════════════════════════════════════════════════════════════
// HA instance rows
// ═══════════════════════════════════════════════════════════════════════════

/// A row of `icingadb_instance`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRow {
    pub id: Uuid,
    pub environment_id: Binary,
    /// Unix seconds.
    pub heartbeat: i64,
    pub responsible: bool,
}

/// What this process asserts about itself when arbitrating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceClaim {
    pub instance_id: Uuid,
    pub environment_id: Binary,
    /// Unix seconds of the heartbeat being processed.
    pub heartbeat: i64,
}

// ═══════════════════════════════════════════════════════════════════════════
// Retention
// ═══════════════════════════════════════════════════════════════════════════

/// One bounded cleanup DELETE.
///
/// Rows qualify when `time_column < threshold` and, if `end_column` is
/// set, that column is non-NULL and also before `threshold`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionDelete {
    pub table: String,
    pub environment_id: Binary,
    pub time_column: &'static str,
    pub end_column: Option<&'static str>,
    /// Milliseconds since the epoch.
    pub threshold: i64,
    pub limit: u64,
}

/// Rows one history event expands to, written atomically with the rest of
/// its batch.
pub type EventRows = Vec<TableRows>;

#[async_trait]
pub trait Database: Send + Sync {
    async fn ping(&self) -> Result<(), StorageError>;

    /// Distinct non-zero values of `column` in `table` for the environment.
    async fn fetch_ids(
        &self,
        table: &str,
        column: &str,
        environment_id: Binary,
    ) -> Result<Vec<Binary>, StorageError>;

    /// `id → properties_checksum` for the given ids.
    async fn fetch_checksums(
        &self,
        table: &str,
        ids: &[Binary],
    ) -> Result<HashMap<Binary, Binary>, StorageError>;

    /// Bulk `REPLACE INTO`. Serves both insert and update paths.
    async fn replace_rows(&self, rows: &TableRows) -> Result<u64, StorageError>;

    /// Bulk `DELETE ... WHERE column IN (...)`.
    async fn delete_rows(
        &self,
        table: &str,
        column: &str,
        ids: &[Binary],
    ) -> Result<u64, StorageError>;

    /// Replace every row whose `column` is in `ids` with `rows`, in one
    /// transaction. Rows of an id that no longer appear in `rows` are gone
    /// afterwards.
    async fn rewrite_rows(
        &self,
        column: &str,
        ids: &[Binary],
        rows: &TableRows,
    ) -> Result<u64, StorageError>;

    /// Insert rows, ignoring duplicate keys. Used for null rows.
    async fn insert_ignore(&self, rows: &TableRows) -> Result<u64, StorageError>;

    /// Read the responsible row, decide, and write the outcome inside one
    /// serializable transaction.
    async fn arbitrate(
        &self,
        claim: &InstanceClaim,
        stale_after: Duration,
    ) -> Result<Decision, StorageError>;

    /// Bump the heartbeat of our own row if it is still the responsible one.
    ///
    /// Returns `false` when another instance has taken over meanwhile; the
    /// caller must arbitrate again instead of carrying on as active.
    async fn refresh_instance(&self, claim: &InstanceClaim) -> Result<bool, StorageError>;

    /// Remove instance rows whose heartbeat is older than `before` (unix seconds).
    async fn delete_stale_instances(&self, before: i64) -> Result<u64, StorageError>;

    /// Write a batch of history events in one serializable transaction.
    ///
    /// Fails with [`StorageError::Rejected`] naming the first event whose
    /// rows could not be written; nothing of the batch is committed then.
    async fn write_history(&self, events: &[EventRows]) -> Result<(), StorageError>;

    /// One bounded retention DELETE; returns the number of rows removed.
    async fn delete_expired(&self, rule: &RetentionDelete) -> Result<u64, StorageError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// Redis
// ═══════════════════════════════════════════════════════════════════════════

/// One stream entry as returned by `XREAD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// A pub/sub message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: String,
}

/// Values of one field from `icinga:config:<family>` and `icinga:checksum:<family>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigPair {
    pub config: Option<String>,
    pub checksum: Option<String>,
}

#[async_trait]
pub trait RedisSource: Send + Sync {
    async fn ping(&self) -> Result<(), StorageError>;

    async fn hkeys(&self, key: &str) -> Result<Vec<String>, StorageError>;

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>, StorageError>;

    /// Pipelined `HMGET config_key fields` + `HMGET checksum_key fields`.
    async fn hmget_pair(
        &self,
        config_key: &str,
        checksum_key: &str,
        fields: &[String],
    ) -> Result<Vec<ConfigPair>, StorageError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StorageError>;

    /// Entries after `last_id`, oldest first, waiting up to `block` for data.
    async fn xread(
        &self,
        stream: &str,
        last_id: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StorageError>;

    async fn xdel(&self, stream: &str, ids: &[String]) -> Result<u64, StorageError>;

    /// Subscribe to channels. The stream ends when the subscription is lost.
    async fn subscribe(
        &self,
        channels: &[&str],
    ) -> Result<BoxStream<'static, PubSubMessage>, StorageError>;
}
