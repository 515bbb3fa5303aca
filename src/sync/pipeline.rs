// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The per-type synchronization pipeline.
//!
//! ```text
//!            ┌──insert──▶ prepare ──▶ decode pool ──insert back──▶ execute (REPLACE)
//!  delta ────┼──compare─▶ compare ──update──┐
//!            │                              ▼
//!  runtime ──┼────────────update──────▶ prepare ──▶ decode pool ──update back──▶ execute (REPLACE)
//!            │                              │ (config vanished)
//!            └──delete───────────────────◀──┘──▶ delete (DELETE … IN)
//! ```
//!
//! All stages run concurrently inside one future; dropping it cancels
//! every stage at its next await. Channels are bounded, so a slow writer
//! throttles Redis reads.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use super::delta::get_delta;
use super::runtime::{FlushPolicy, RuntimeUpdate, RuntimeWorker};
use super::tally::Tally;
use crate::decoder::{DecodeJob, DecodedBatch, RawObject};
use crate::error::SyncError;
use crate::metrics::{self, LatencyTimer};
use crate::objects::{properties_checksum, Expansion, ObjectDescriptor};
use crate::storage::traits::ConfigPair;
use crate::supervisor::Supervisor;
use crate::types::Binary;

type Ids = mpsc::Sender<Vec<Binary>>;
type IdsRx = mpsc::Receiver<Vec<Binary>>;
type Back = mpsc::Sender<Result<DecodedBatch, SyncError>>;
type BackRx = mpsc::Receiver<Result<DecodedBatch, SyncError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Path {
    Insert,
    Update,
}

impl Path {
    fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
        }
    }
}

fn closed(stage: &'static str) -> impl FnOnce(mpsc::error::SendError<Vec<Binary>>) -> SyncError {
    move |_| SyncError::ChannelClosed(stage)
}

pub struct Pipeline {
    supervisor: Supervisor,
    descriptor: &'static ObjectDescriptor,
    environment_id: Binary,
    tally: Arc<Tally>,
    config_key: String,
    checksum_key: String,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        supervisor: Supervisor,
        descriptor: &'static ObjectDescriptor,
        environment_id: Binary,
        tally: Arc<Tally>,
    ) -> Self {
        Self {
            supervisor,
            descriptor,
            environment_id,
            tally,
            config_key: descriptor.config_key(),
            checksum_key: descriptor.checksum_key(),
        }
    }

    /// Run the initial sync, then keep applying runtime updates until the
    /// feed closes. Returns on the first stage error.
    pub async fn run(self, feed: broadcast::Receiver<RuntimeUpdate>) -> Result<(), SyncError> {
        let (insert_tx, insert_rx) = mpsc::channel(1);
        let (compare_tx, compare_rx) = mpsc::channel(1);
        let (update_tx, update_rx) = mpsc::channel(1);
        let (delete_tx, delete_rx) = mpsc::channel(1);
        let (insert_back_tx, insert_back_rx) = mpsc::channel(1);
        let (update_back_tx, update_back_rx) = mpsc::channel(1);

        let sync = &self.supervisor.config.sync;
        let runtime = RuntimeWorker {
            family: self.descriptor.family,
            updates: update_tx.clone(),
            deletes: delete_tx.clone(),
            tally: self.tally.as_ref(),
            policy: FlushPolicy {
                interval: std::time::Duration::from_millis(sync.runtime_flush_ms),
                max_ids: sync.runtime_flush_count,
            },
        };

        tokio::try_join!(
            self.seed(insert_tx, compare_tx, delete_tx.clone()),
            self.prepare(Path::Insert, insert_rx, insert_back_tx, None),
            self.execute(Path::Insert, insert_back_rx),
            self.compare(compare_rx, update_tx),
            self.prepare(Path::Update, update_rx, update_back_tx, Some(delete_tx)),
            self.execute(Path::Update, update_back_rx),
            self.delete(delete_rx),
            runtime.run(feed),
        )?;
        Ok(())
    }

    /// Compute the delta, feed it downstream and wait until it is applied.
    async fn seed(&self, insert: Ids, compare: Ids, delete: Ids) -> Result<(), SyncError> {
        let table = self.descriptor.table;
        let started = Instant::now();
        let delta = get_delta(&self.supervisor, self.descriptor, self.environment_id).await?;
        metrics::record_delta(table, delta.insert.len(), delta.update.len(), delta.delete.len());
        info!(
            table,
            insert = delta.insert.len(),
            compare = delta.update.len(),
            delete = delta.delete.len(),
            "Delta computed"
        );

        self.tally.add(delta.total());
        let chunk = self.supervisor.config.sync.chunk_size.max(1);
        for (ids, tx) in [(delta.insert, insert), (delta.update, compare), (delta.delete, delete)] {
            for ids in ids.chunks(chunk) {
                tx.send(ids.to_vec()).await.map_err(closed("delta"))?;
            }
        }

        self.tally.wait().await;
        metrics::record_sync_latency(table, "initial", started.elapsed());
        info!(table, elapsed = ?started.elapsed(), "Initial sync done");
        Ok(())
    }

    /// Fetch config and checksum documents for a chunk of ids. Ids whose
    /// config is gone are returned separately.
    async fn fetch(&self, ids: Vec<Binary>) -> Result<(Vec<RawObject>, Vec<Binary>), SyncError> {
        let fields: Vec<String> = ids.iter().map(Binary::to_hex).collect();
        let redis = &self.supervisor.redis;
        let pairs = if self.descriptor.checksum {
            redis.hmget_pair(&self.config_key, &self.checksum_key, &fields).await?
        } else {
            redis
                .hmget(&self.config_key, &fields)
                .await?
                .into_iter()
                .map(|config| ConfigPair { config, checksum: None })
                .collect()
        };

        let mut objects = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for (id, pair) in ids.into_iter().zip(pairs) {
            match pair.config {
                Some(config) => objects.push(RawObject {
                    id,
                    config,
                    checksum: pair.checksum,
                }),
                None => missing.push(id),
            }
        }
        Ok((objects, missing))
    }

    /// Read Redis documents in concurrent chunks and hand them to the
    /// decode pool. On the update path, ids without config become deletes.
    async fn prepare(&self, path: Path, mut rx: IdsRx, back: Back, deletes: Option<Ids>) -> Result<(), SyncError> {
        let sync = &self.supervisor.config.sync;
        while let Some(ids) = rx.recv().await {
            let chunks: Vec<Vec<Binary>> = ids.chunks(sync.chunk_size.max(1)).map(<[Binary]>::to_vec).collect();
            let mut fetched = stream::iter(chunks)
                .map(|chunk| self.fetch(chunk))
                .buffer_unordered(sync.fetch_concurrency.max(1));

            while let Some(result) = fetched.next().await {
                let (objects, missing) = result?;
                if !missing.is_empty() {
                    debug!(table = self.descriptor.table, path = path.as_str(), missing = missing.len(), "Objects vanished from Redis");
                    match &deletes {
                        Some(tx) => tx.send(missing).await.map_err(closed("update prepare"))?,
                        None => self.tally.done(missing.len()),
                    }
                }
                if !objects.is_empty() {
                    self.supervisor
                        .decoder
                        .submit(DecodeJob {
                            descriptor: self.descriptor,
                            environment_id: self.environment_id,
                            objects,
                            reply: back.clone(),
                        })
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Write decoded batches.
    async fn execute(&self, path: Path, mut rx: BackRx) -> Result<(), SyncError> {
        let table = self.descriptor.table;
        let db = &self.supervisor.db;
        while let Some(batch) = rx.recv().await {
            let batch = batch?;
            let _permit = self.supervisor.semaphores.acquire(table).await?;
            let _timer = LatencyTimer::new(table, path.as_str());

            // Leaves that disappeared from an updated variable must go too.
            let written = if path == Path::Update && self.descriptor.expansion == Expansion::FlatCustomvar {
                db.rewrite_rows(self.descriptor.delta_column, &batch.ids, &batch.rows).await?
            } else {
                db.replace_rows(&batch.rows).await?
            };
            metrics::record_sync_rows(table, path.as_str(), written as usize);
            debug!(table, path = path.as_str(), ids = batch.ids.len(), rows = batch.rows.len(), "Batch written");
            self.tally.done(batch.ids.len());
        }
        Ok(())
    }

    /// Forward ids whose Redis checksum differs from the stored one.
    async fn compare(&self, mut rx: IdsRx, update: Ids) -> Result<(), SyncError> {
        let sync = &self.supervisor.config.sync;
        while let Some(ids) = rx.recv().await {
            let chunks: Vec<Vec<Binary>> = ids.chunks(sync.chunk_size.max(1)).map(<[Binary]>::to_vec).collect();
            let mut compared = stream::iter(chunks)
                .map(|chunk| self.changed(chunk))
                .buffer_unordered(sync.fetch_concurrency.max(1));

            while let Some(result) = compared.next().await {
                let (changed, unchanged) = result?;
                self.tally.done(unchanged);
                if !changed.is_empty() {
                    update.send(changed).await.map_err(closed("compare"))?;
                }
            }
        }
        Ok(())
    }

    async fn changed(&self, ids: Vec<Binary>) -> Result<(Vec<Binary>, usize), SyncError> {
        let fields: Vec<String> = ids.iter().map(Binary::to_hex).collect();
        let (redis_sums, db_sums) = tokio::try_join!(
            self.supervisor.redis.hmget(&self.checksum_key, &fields),
            self.supervisor.db.fetch_checksums(self.descriptor.table, &ids),
        )?;

        let mut changed = Vec::new();
        let mut unchanged = 0;
        for (id, raw) in ids.into_iter().zip(redis_sums) {
            let current = raw.as_deref().and_then(|raw| properties_checksum(raw).ok());
            match (current, db_sums.get(&id)) {
                (Some(current), Some(stored)) if current == *stored => unchanged += 1,
                _ => changed.push(id),
            }
        }
        Ok((changed, unchanged))
    }

    async fn delete(&self, mut rx: IdsRx) -> Result<(), SyncError> {
        let table = self.descriptor.table;
        let chunk = self.supervisor.config.sync.delete_chunk_size.max(1);
        while let Some(ids) = rx.recv().await {
            for ids in ids.chunks(chunk) {
                let _permit = self.supervisor.semaphores.acquire(table).await?;
                let _timer = LatencyTimer::new(table, "delete");
                let deleted = self
                    .supervisor
                    .db
                    .delete_rows(table, self.descriptor.delta_column, ids)
                    .await?;
                metrics::record_sync_rows(table, "delete", deleted as usize);
                self.tally.done(ids.len());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::decoder::DecodePool;
    use crate::objects::find;
    use crate::storage::memory::{MemoryDatabase, MemoryRedis};
    use crate::supervisor::ErrorSink;
    use crate::sync::runtime::RuntimeKind;
    use crate::types::{SqlValue, TableRows};
    use serde_json::json;

    fn env() -> Binary {
        Binary::from([1; 20])
    }

    fn id(n: u8) -> Binary {
        Binary::from([n; 20])
    }

    fn supervisor(db: Arc<MemoryDatabase>, redis: Arc<MemoryRedis>) -> Supervisor {
        let (errors, _rx) = ErrorSink::new(4);
        Supervisor::new(db, redis, DecodePool::new(2, 4).handle(), errors, Arc::new(Config::default()))
    }

    fn put_host(redis: &MemoryRedis, n: u8, name: &str, checksum: u8) {
        let field = id(n).to_hex();
        redis.hset("icinga:config:host", &field, &json!({ "name": name }).to_string());
        redis.hset(
            "icinga:checksum:host",
            &field,
            &json!({ "checksum": Binary::from([checksum; 20]).to_hex() }).to_string(),
        );
    }

    fn seed_host(db: &MemoryDatabase, n: u8, name: &str, checksum: u8) {
        let mut rows = TableRows::new("host", vec!["id", "environment_id", "properties_checksum", "name"], vec!["id"]);
        rows.rows.push(vec![
            id(n).into(),
            env().into(),
            Binary::from([checksum; 20]).into(),
            name.into(),
        ]);
        db.seed(&rows);
    }

    fn host_pipeline(supervisor: Supervisor) -> Pipeline {
        let host = find("host").unwrap();
        Pipeline::new(supervisor, host, env(), Arc::new(Tally::new()))
    }

    /// Initial sync with no runtime updates; returns once everything drained.
    async fn sync_once(supervisor: Supervisor) {
        let (tx, rx) = broadcast::channel(1);
        drop(tx);
        host_pipeline(supervisor).run(rx).await.unwrap();
    }

    fn name_of(db: &MemoryDatabase, n: u8) -> Option<SqlValue> {
        db.find("host", "id", &id(n)).and_then(|row| row.get("name").cloned())
    }

    #[tokio::test]
    async fn test_empty_table_receives_every_object() {
        let db = Arc::new(MemoryDatabase::new());
        let redis = Arc::new(MemoryRedis::new());
        for n in 1..=3 {
            put_host(&redis, n, &format!("web{}", n), n);
        }

        sync_once(supervisor(db.clone(), redis.clone())).await;

        assert_eq!(db.count("host"), 3);
        let row = db.find("host", "id", &id(2)).unwrap();
        assert_eq!(row.get("properties_checksum"), Some(&SqlValue::Bytes(vec![2; 20])));
        assert_eq!(row.get("name"), Some(&SqlValue::Text("web2".into())));
    }

    #[tokio::test]
    async fn test_second_pass_writes_nothing() {
        let db = Arc::new(MemoryDatabase::new());
        let redis = Arc::new(MemoryRedis::new());
        put_host(&redis, 1, "web1", 1);
        put_host(&redis, 2, "web2", 2);

        sync_once(supervisor(db.clone(), redis.clone())).await;
        let after_first = db.statement_count();
        sync_once(supervisor(db.clone(), redis.clone())).await;
        assert_eq!(db.statement_count(), after_first);
    }

    #[tokio::test]
    async fn test_empty_redis_deletes_every_row() {
        let db = Arc::new(MemoryDatabase::new());
        let redis = Arc::new(MemoryRedis::new());
        seed_host(&db, 1, "orphan", 1);
        seed_host(&db, 2, "orphan", 2);

        sync_once(supervisor(db.clone(), redis)).await;
        assert_eq!(db.count("host"), 0);
    }

    #[tokio::test]
    async fn test_changed_checksum_updates_row() {
        let db = Arc::new(MemoryDatabase::new());
        let redis = Arc::new(MemoryRedis::new());
        seed_host(&db, 1, "old", 1);
        seed_host(&db, 2, "same", 2);
        put_host(&redis, 1, "new", 9);
        put_host(&redis, 2, "ignored", 2);

        sync_once(supervisor(db.clone(), redis)).await;

        assert_eq!(name_of(&db, 1), Some(SqlValue::Text("new".into())));
        // Equal checksums are trusted, the stale name stays.
        assert_eq!(name_of(&db, 2), Some(SqlValue::Text("same".into())));
    }

    #[tokio::test]
    async fn test_runtime_create_then_delete_leaves_nothing() {
        let db = Arc::new(MemoryDatabase::new());
        let redis = Arc::new(MemoryRedis::new());
        let (tx, rx) = broadcast::channel(16);

        put_host(&redis, 3, "kept", 3);
        let send = |n: u8, kind: RuntimeKind| {
            tx.send(RuntimeUpdate { family: "host".into(), id: id(n), kind }).unwrap();
        };
        send(2, RuntimeKind::Update);
        send(2, RuntimeKind::Delete);
        send(3, RuntimeKind::Update);
        drop(send);
        drop(tx);

        host_pipeline(supervisor(db.clone(), redis)).run(rx).await.unwrap();

        assert!(db.find("host", "id", &id(2)).is_none());
        assert_eq!(name_of(&db, 3), Some(SqlValue::Text("kept".into())));
    }
}
