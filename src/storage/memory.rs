// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process backends.
//!
//! [`MemoryDatabase`] and [`MemoryRedis`] implement the backend traits
//! with plain collections so the pipelines, the arbiter and the history
//! workers can run end-to-end without servers. They follow the same
//! semantics as the real wrappers: `REPLACE` by primary key, distinct
//! non-zero id listing, all-or-nothing history batches, ordered stream ids.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use super::traits::{
    ConfigPair, Database, EventRows, InstanceClaim, InstanceRow, PubSubMessage, RedisSource,
    RetentionDelete, StorageError, StreamEntry,
};
use crate::ha::decision::{decide, Decision};
use crate::types::{Binary, SqlValue, TableRows};

/// A stored row: column → value.
pub type Row = HashMap<String, SqlValue>;

type Table = BTreeMap<Vec<u8>, Row>;

const INSTANCE_TABLE: &str = "icingadb_instance";

fn key_of(values: impl IntoIterator<Item = SqlValue>) -> Vec<u8> {
    let mut key = Vec::new();
    for value in values {
        match value {
            SqlValue::Null => key.push(0),
            SqlValue::Int(i) => key.extend_from_slice(&i.to_be_bytes()),
            SqlValue::Float(f) => key.extend_from_slice(&f.to_be_bytes()),
            SqlValue::Text(s) => key.extend_from_slice(s.as_bytes()),
            SqlValue::Bytes(b) => key.extend_from_slice(&b),
        }
        key.push(0xff);
    }
    key
}

fn to_rows(rows: &TableRows) -> impl Iterator<Item = (Vec<u8>, Row)> + '_ {
    rows.rows.iter().map(move |values| {
        let row: Row = rows
            .columns
            .iter()
            .map(|c| c.to_string())
            .zip(values.iter().cloned())
            .collect();
        let key = key_of(rows.key.iter().map(|k| row.get(*k).cloned().unwrap_or(SqlValue::Null)));
        (key, row)
    })
}

fn bytes_of(row: &Row, column: &str) -> Option<Vec<u8>> {
    row.get(column).and_then(|v| v.as_bytes()).map(<[u8]>::to_vec)
}

/// Rule that makes writes of matching rows fail, for poison-event tests.
#[derive(Debug, Clone)]
struct Rejection {
    table: String,
    column: String,
    value: SqlValue,
}

#[derive(Default)]
pub struct MemoryDatabase {
    tables: Mutex<HashMap<String, Table>>,
    rejections: Mutex<Vec<Rejection>>,
    fail_next: Mutex<Option<String>>,
    statements: AtomicU64,
}

impl MemoryDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows of a table in key order.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn count(&self, table: &str) -> usize {
        self.tables.lock().get(table).map_or(0, BTreeMap::len)
    }

    /// Find the row whose `column` holds `id`.
    #[must_use]
    pub fn find(&self, table: &str, column: &str, id: &Binary) -> Option<Row> {
        self.tables.lock().get(table).and_then(|t| {
            t.values()
                .find(|row| bytes_of(row, column).as_deref() == Some(id.as_bytes().as_slice()))
                .cloned()
        })
    }

    /// Seed rows directly, bypassing statement accounting.
    pub fn seed(&self, rows: &TableRows) {
        let mut tables = self.tables.lock();
        let table = tables.entry(rows.table.to_string()).or_default();
        for (key, row) in to_rows(rows) {
            table.insert(key, row);
        }
    }

    /// Make every write of a row with `column == value` into `table` fail.
    pub fn reject(&self, table: &str, column: &str, value: SqlValue) {
        self.rejections.lock().push(Rejection {
            table: table.to_string(),
            column: column.to_string(),
            value,
        });
    }

    /// Fail the next write with a non-transient error.
    pub fn fail_next_write(&self, message: &str) {
        *self.fail_next.lock() = Some(message.to_string());
    }

    /// Number of DML statements executed so far.
    #[must_use]
    pub fn statement_count(&self) -> u64 {
        self.statements.load(Ordering::SeqCst)
    }

    /// Responsible instance rows for an environment.
    #[must_use]
    pub fn responsible_instances(&self, environment_id: &Binary) -> Vec<InstanceRow> {
        self.rows(INSTANCE_TABLE)
            .iter()
            .filter_map(instance_from_row)
            .filter(|r| r.responsible && r.environment_id == *environment_id)
            .collect()
    }

    fn take_failure(&self) -> Result<(), StorageError> {
        match self.fail_next.lock().take() {
            Some(message) => Err(StorageError::Backend(message)),
            None => Ok(()),
        }
    }

    fn check_rejections(&self, rows: &TableRows) -> Result<(), String> {
        let rejections = self.rejections.lock();
        for rule in rejections.iter().filter(|r| r.table == rows.table) {
            if let Some(pos) = rows.position(&rule.column) {
                if rows.rows.iter().any(|values| values.get(pos) == Some(&rule.value)) {
                    return Err(format!("{}: row rejected on {}", rows.table, rule.column));
                }
            }
        }
        Ok(())
    }

    fn count_statement(&self) {
        self.statements.fetch_add(1, Ordering::SeqCst);
    }
}

fn instance_from_row(row: &Row) -> Option<InstanceRow> {
    Some(InstanceRow {
        id: Uuid::from_slice(row.get("id")?.as_bytes()?).ok()?,
        environment_id: Binary::from_bytes(row.get("environment_id")?.as_bytes()?).ok()?,
        heartbeat: row.get("heartbeat")?.as_int()?,
        responsible: row.get("responsible")?.as_text()? == "y",
    })
}

fn instance_row(claim: &InstanceClaim, responsible: bool) -> (Vec<u8>, Row) {
    let id = SqlValue::Bytes(claim.instance_id.as_bytes().to_vec());
    let mut row = Row::new();
    row.insert("id".into(), id.clone());
    row.insert("environment_id".into(), claim.environment_id.into());
    row.insert("heartbeat".into(), SqlValue::Int(claim.heartbeat));
    row.insert("responsible".into(), SqlValue::Text(if responsible { "y" } else { "n" }.into()));
    (key_of([id]), row)
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn fetch_ids(
        &self,
        table: &str,
        column: &str,
        environment_id: Binary,
    ) -> Result<Vec<Binary>, StorageError> {
        let env = environment_id.to_vec();
        let tables = self.tables.lock();
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        if let Some(t) = tables.get(table) {
            for row in t.values() {
                if bytes_of(row, "environment_id").as_deref() != Some(env.as_slice()) {
                    continue;
                }
                if let Some(id) = bytes_of(row, column).and_then(|b| Binary::from_bytes(&b).ok()) {
                    if !id.is_zero() && seen.insert(id) {
                        ids.push(id);
                    }
                }
            }
        }
        Ok(ids)
    }

    async fn fetch_checksums(
        &self,
        table: &str,
        ids: &[Binary],
    ) -> Result<HashMap<Binary, Binary>, StorageError> {
        let wanted: HashSet<&Binary> = ids.iter().collect();
        let tables = self.tables.lock();
        let mut out = HashMap::new();
        if let Some(t) = tables.get(table) {
            for row in t.values() {
                let id = bytes_of(row, "id").and_then(|b| Binary::from_bytes(&b).ok());
                let checksum = bytes_of(row, "properties_checksum").and_then(|b| Binary::from_bytes(&b).ok());
                if let (Some(id), Some(checksum)) = (id, checksum) {
                    if wanted.contains(&id) {
                        out.insert(id, checksum);
                    }
                }
            }
        }
        Ok(out)
    }

    async fn replace_rows(&self, rows: &TableRows) -> Result<u64, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.take_failure()?;
        self.check_rejections(rows).map_err(StorageError::Backend)?;
        self.count_statement();
        let mut tables = self.tables.lock();
        let table = tables.entry(rows.table.to_string()).or_default();
        for (key, row) in to_rows(rows) {
            table.insert(key, row);
        }
        Ok(rows.len() as u64)
    }

    async fn delete_rows(
        &self,
        table: &str,
        column: &str,
        ids: &[Binary],
    ) -> Result<u64, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.take_failure()?;
        self.count_statement();
        let doomed: HashSet<Vec<u8>> = ids.iter().map(Binary::to_vec).collect();
        let mut tables = self.tables.lock();
        let Some(t) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = t.len();
        t.retain(|_, row| !bytes_of(row, column).is_some_and(|b| doomed.contains(&b)));
        Ok((before - t.len()) as u64)
    }

    async fn rewrite_rows(
        &self,
        column: &str,
        ids: &[Binary],
        rows: &TableRows,
    ) -> Result<u64, StorageError> {
        self.take_failure()?;
        self.check_rejections(rows).map_err(StorageError::Backend)?;
        self.count_statement();
        let doomed: HashSet<Vec<u8>> = ids.iter().map(Binary::to_vec).collect();
        let mut tables = self.tables.lock();
        let table = tables.entry(rows.table.to_string()).or_default();
        table.retain(|_, row| !bytes_of(row, column).is_some_and(|b| doomed.contains(&b)));
        for (key, row) in to_rows(rows) {
            table.insert(key, row);
        }
        Ok(rows.len() as u64)
    }

    async fn insert_ignore(&self, rows: &TableRows) -> Result<u64, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.count_statement();
        let mut tables = self.tables.lock();
        let table = tables.entry(rows.table.to_string()).or_default();
        let mut inserted = 0;
        for (key, row) in to_rows(rows) {
            if let std::collections::btree_map::Entry::Vacant(slot) = table.entry(key) {
                slot.insert(row);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn arbitrate(
        &self,
        claim: &InstanceClaim,
        stale_after: Duration,
    ) -> Result<Decision, StorageError> {
        self.count_statement();
        let mut tables = self.tables.lock();
        let table = tables.entry(INSTANCE_TABLE.to_string()).or_default();

        let current = table
            .values()
            .filter_map(instance_from_row)
            .find(|r| r.responsible && r.environment_id == claim.environment_id);
        let decision = decide(current.as_ref(), claim, stale_after);

        match &decision {
            Decision::TakeOver => {
                if let Some(previous) = current {
                    table.remove(&key_of([SqlValue::Bytes(previous.id.as_bytes().to_vec())]));
                }
                let (key, row) = instance_row(claim, true);
                table.insert(key, row);
            }
            Decision::Refresh => {
                let (key, _) = instance_row(claim, true);
                if let Some(row) = table.get_mut(&key) {
                    row.insert("heartbeat".into(), SqlValue::Int(claim.heartbeat));
                }
            }
            Decision::Passive { .. } => {
                let (key, row) = instance_row(claim, false);
                table.insert(key, row);
            }
        }
        Ok(decision)
    }

    async fn refresh_instance(&self, claim: &InstanceClaim) -> Result<bool, StorageError> {
        self.count_statement();
        let (key, _) = instance_row(claim, true);
        let mut tables = self.tables.lock();
        let row = tables
            .get_mut(INSTANCE_TABLE)
            .and_then(|t| t.get_mut(&key))
            .filter(|row| row.get("responsible") == Some(&SqlValue::Text("y".into())));
        match row {
            Some(row) => {
                row.insert("heartbeat".into(), SqlValue::Int(claim.heartbeat));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_stale_instances(&self, before: i64) -> Result<u64, StorageError> {
        self.count_statement();
        let mut tables = self.tables.lock();
        let Some(t) = tables.get_mut(INSTANCE_TABLE) else {
            return Ok(0);
        };
        let len = t.len();
        t.retain(|_, row| row.get("heartbeat").and_then(SqlValue::as_int).is_some_and(|hb| hb >= before));
        Ok((len - t.len()) as u64)
    }

    async fn write_history(&self, events: &[EventRows]) -> Result<(), StorageError> {
        if events.is_empty() {
            return Ok(());
        }
        self.take_failure()?;
        for (index, event) in events.iter().enumerate() {
            for rows in event {
                self.check_rejections(rows)
                    .map_err(|message| StorageError::Rejected { index, message })?;
            }
        }
        self.count_statement();
        let mut tables = self.tables.lock();
        for rows in events.iter().flatten() {
            let table = tables.entry(rows.table.to_string()).or_default();
            for (key, row) in to_rows(rows) {
                table.insert(key, row);
            }
        }
        Ok(())
    }

    async fn delete_expired(&self, rule: &RetentionDelete) -> Result<u64, StorageError> {
        self.count_statement();
        let env = rule.environment_id.to_vec();
        let before = |row: &Row, column: &str| {
            row.get(column)
                .and_then(SqlValue::as_int)
                .is_some_and(|t| t < rule.threshold)
        };

        let mut tables = self.tables.lock();
        let Some(t) = tables.get_mut(&rule.table) else {
            return Ok(0);
        };
        let doomed: Vec<Vec<u8>> = t
            .iter()
            .filter(|(_, row)| {
                bytes_of(row, "environment_id").as_deref() == Some(env.as_slice())
                    && before(row, rule.time_column)
                    && rule.end_column.map_or(true, |end| before(row, end))
            })
            .map(|(key, _)| key.clone())
            .take(usize::try_from(rule.limit).unwrap_or(usize::MAX))
            .collect();
        for key in &doomed {
            t.remove(key);
        }
        Ok(doomed.len() as u64)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Redis
// ═══════════════════════════════════════════════════════════════════════════

fn parse_stream_id(id: &str) -> (u64, u64) {
    let (ms, seq) = id.split_once('-').unwrap_or((id, "0"));
    (ms.parse().unwrap_or(0), seq.parse().unwrap_or(0))
}

type Stream = BTreeMap<(u64, u64), HashMap<String, String>>;

pub struct MemoryRedis {
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    streams: Mutex<HashMap<String, Stream>>,
    next_stream_id: AtomicU64,
    stream_version: watch::Sender<u64>,
    pubsub: broadcast::Sender<PubSubMessage>,
}

impl Default for MemoryRedis {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRedis {
    #[must_use]
    pub fn new() -> Self {
        let (stream_version, _) = watch::channel(0);
        let (pubsub, _) = broadcast::channel(1024);
        Self {
            hashes: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            next_stream_id: AtomicU64::new(1),
            stream_version,
            pubsub,
        }
    }

    pub fn hset(&self, key: &str, field: &str, value: &str) {
        self.hashes
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    pub fn hdel(&self, key: &str, field: &str) {
        if let Some(hash) = self.hashes.lock().get_mut(key) {
            hash.remove(field);
        }
    }

    /// Append an entry and return its id.
    pub fn xadd(&self, stream: &str, fields: &[(&str, &str)]) -> String {
        let ms = self.next_stream_id.fetch_add(1, Ordering::SeqCst);
        let entry = fields
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        self.streams
            .lock()
            .entry(stream.to_string())
            .or_default()
            .insert((ms, 0), entry);
        self.stream_version.send_modify(|v| *v += 1);
        format!("{}-0", ms)
    }

    #[must_use]
    pub fn xlen(&self, stream: &str) -> usize {
        self.streams.lock().get(stream).map_or(0, BTreeMap::len)
    }

    /// Publish to subscribers; returns how many received it.
    pub fn publish(&self, channel: &str, payload: &str) -> usize {
        self.pubsub
            .send(PubSubMessage {
                channel: channel.to_string(),
                payload: payload.to_string(),
            })
            .unwrap_or(0)
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.pubsub.receiver_count()
    }

    fn entries_after(&self, stream: &str, last_id: &str, count: usize) -> Vec<StreamEntry> {
        let after = parse_stream_id(last_id);
        self.streams
            .lock()
            .get(stream)
            .map(|s| {
                s.range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
                    .take(count)
                    .map(|((ms, seq), fields)| StreamEntry {
                        id: format!("{}-{}", ms, seq),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl RedisSource for MemoryRedis {
    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .hashes
            .lock()
            .get(key)
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>, StorageError> {
        let hashes = self.hashes.lock();
        let hash = hashes.get(key);
        Ok(fields
            .iter()
            .map(|f| hash.and_then(|h| h.get(f)).cloned())
            .collect())
    }

    async fn hmget_pair(
        &self,
        config_key: &str,
        checksum_key: &str,
        fields: &[String],
    ) -> Result<Vec<ConfigPair>, StorageError> {
        let configs = self.hmget(config_key, fields).await?;
        let checksums = self.hmget(checksum_key, fields).await?;
        Ok(configs
            .into_iter()
            .zip(checksums)
            .map(|(config, checksum)| ConfigPair { config, checksum })
            .collect())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StorageError> {
        Ok(self.hashes.lock().get(key).cloned().unwrap_or_default())
    }

    async fn xread(
        &self,
        stream: &str,
        last_id: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StorageError> {
        let deadline = tokio::time::Instant::now() + block;
        let mut version = self.stream_version.subscribe();
        loop {
            version.borrow_and_update();
            let entries = self.entries_after(stream, last_id, count);
            if !entries.is_empty() {
                return Ok(entries);
            }
            if tokio::time::timeout_at(deadline, version.changed()).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn xdel(&self, stream: &str, ids: &[String]) -> Result<u64, StorageError> {
        let mut streams = self.streams.lock();
        let Some(s) = streams.get_mut(stream) else {
            return Ok(0);
        };
        Ok(ids
            .iter()
            .filter(|id| s.remove(&parse_stream_id(id)).is_some())
            .count() as u64)
    }

    async fn subscribe(
        &self,
        channels: &[&str],
    ) -> Result<BoxStream<'static, PubSubMessage>, StorageError> {
        let wanted: HashSet<String> = channels.iter().map(|c| (*c).to_string()).collect();
        let rx = self.pubsub.subscribe();
        Ok(stream::unfold((rx, wanted), |(mut rx, wanted)| async move {
            loop {
                match rx.recv().await {
                    Ok(msg) if wanted.contains(&msg.channel) => return Some((msg, (rx, wanted))),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> Binary {
        Binary::from([n; 20])
    }

    fn host_rows(env: Binary, ids: &[Binary]) -> TableRows {
        let mut rows = TableRows::new("host", vec!["id", "environment_id", "properties_checksum"], vec!["id"]);
        for i in ids {
            rows.rows.push(vec![(*i).into(), env.into(), id(9).into()]);
        }
        rows
    }

    #[tokio::test]
    async fn test_failed_rewrite_keeps_previous_rows() {
        let db = MemoryDatabase::new();
        let env = id(1);
        db.replace_rows(&host_rows(env, &[id(2), id(3)])).await.unwrap();

        db.fail_next_write("lost connection mid-batch");
        assert!(db.rewrite_rows("environment_id", &[env], &host_rows(env, &[id(2)])).await.is_err());
        assert_eq!(db.count("host"), 2);

        db.rewrite_rows("environment_id", &[env], &host_rows(env, &[id(2)])).await.unwrap();
        assert_eq!(db.count("host"), 1);
    }

    #[tokio::test]
    async fn test_refresh_requires_responsible_row() {
        let db = MemoryDatabase::new();
        let stale = Duration::from_secs(15);
        let claim = |n: u128, heartbeat| InstanceClaim {
            instance_id: Uuid::from_u128(n),
            environment_id: id(1),
            heartbeat,
        };

        db.arbitrate(&claim(1, 100), stale).await.unwrap();
        assert!(db.refresh_instance(&claim(1, 105)).await.unwrap());
        assert_eq!(db.arbitrate(&claim(2, 121), stale).await.unwrap(), Decision::TakeOver);
        assert!(!db.refresh_instance(&claim(1, 106)).await.unwrap());
        assert!(!db.refresh_instance(&claim(3, 106)).await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_and_fetch_ids() {
        let db = MemoryDatabase::new();
        let env = id(1);
        db.replace_rows(&host_rows(env, &[id(2), id(3), Binary::zero()])).await.unwrap();
        db.replace_rows(&host_rows(env, &[id(2)])).await.unwrap();

        let mut ids = db.fetch_ids("host", "id", env).await.unwrap();
        ids.sort();
        assert_eq!(ids, vec![id(2), id(3)]);
        assert_eq!(db.count("host"), 3);
        assert!(db.fetch_ids("host", "id", id(7)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_column() {
        let db = MemoryDatabase::new();
        db.seed(&host_rows(id(1), &[id(2), id(3)]));
        assert_eq!(db.delete_rows("host", "id", &[id(2), id(4)]).await.unwrap(), 1);
        assert_eq!(db.count("host"), 1);
    }

    #[tokio::test]
    async fn test_history_batch_is_atomic() {
        let db = MemoryDatabase::new();
        db.reject("host", "id", id(3).into());
        let events = vec![vec![host_rows(id(1), &[id(2)])], vec![host_rows(id(1), &[id(3)])]];

        let err = db.write_history(&events).await.unwrap_err();
        assert!(matches!(err, StorageError::Rejected { index: 1, .. }));
        assert_eq!(db.count("host"), 0);

        db.write_history(&events[..1]).await.unwrap();
        assert_eq!(db.count("host"), 1);
    }

    #[tokio::test]
    async fn test_stream_read_and_delete() {
        let redis = MemoryRedis::new();
        let a = redis.xadd("s", &[("k", "1")]);
        let b = redis.xadd("s", &[("k", "2")]);

        let all = redis.xread("s", "0-0", 10, Duration::from_millis(1)).await.unwrap();
        assert_eq!(all.iter().map(|e| e.id.clone()).collect::<Vec<_>>(), vec![a.clone(), b.clone()]);

        let after = redis.xread("s", &a, 10, Duration::from_millis(1)).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].fields["k"], "2");

        assert_eq!(redis.xdel("s", &[a, b]).await.unwrap(), 2);
        assert_eq!(redis.xlen("s"), 0);
    }

    #[tokio::test]
    async fn test_xread_wakes_on_append() {
        let redis = std::sync::Arc::new(MemoryRedis::new());
        let reader = {
            let redis = redis.clone();
            tokio::spawn(async move { redis.xread("s", "0-0", 10, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        redis.xadd("s", &[("k", "v")]);
        let entries = reader.await.unwrap().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_pubsub_filters_channels() {
        let redis = MemoryRedis::new();
        let mut sub = redis.subscribe(&["a"]).await.unwrap();
        redis.publish("b", "ignored");
        redis.publish("a", "hello");
        let msg = sub.next().await.unwrap();
        assert_eq!(msg.channel, "a");
        assert_eq!(msg.payload, "hello");
    }
}
