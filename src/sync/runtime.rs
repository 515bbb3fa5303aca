// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Runtime updates from `icinga:config:update` / `icinga:config:delete`.
//!
//! One subscription feeds a broadcast; every object type's worker filters
//! its family, buffers ids and flushes them into the update and delete
//! stages on a count or time trigger, like a hybrid batcher.

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::tally::Tally;
use crate::error::SyncError;
use crate::metrics;
use crate::storage::traits::RedisSource;
use crate::types::values::split_runtime_payload;
use crate::types::Binary;

pub const UPDATE_CHANNEL: &str = "icinga:config:update";
pub const DELETE_CHANNEL: &str = "icinga:config:delete";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Update,
    Delete,
}

impl RuntimeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeUpdate {
    pub family: String,
    pub id: Binary,
    pub kind: RuntimeKind,
}

/// Parse a `<family>:<id>` payload received on `channel`.
pub fn parse_runtime_update(channel: &str, payload: &str) -> Option<RuntimeUpdate> {
    let kind = match channel {
        UPDATE_CHANNEL => RuntimeKind::Update,
        DELETE_CHANNEL => RuntimeKind::Delete,
        _ => return None,
    };
    let (family, id) = split_runtime_payload(payload)?;
    Some(RuntimeUpdate {
        family: family.to_string(),
        id: Binary::from_hex(id).ok()?,
        kind,
    })
}

/// Publish runtime updates to `tx` until every receiver is gone.
pub async fn feed(redis: Arc<dyn RedisSource>, tx: broadcast::Sender<RuntimeUpdate>) -> Result<(), SyncError> {
    loop {
        let mut messages = redis.subscribe(&[UPDATE_CHANNEL, DELETE_CHANNEL]).await?;
        while let Some(message) = messages.next().await {
            match parse_runtime_update(&message.channel, &message.payload) {
                Some(update) => {
                    // No receivers just means no pipeline is running.
                    let _ = tx.send(update);
                }
                None => warn!(channel = %message.channel, payload = %message.payload, "Ignoring malformed runtime update"),
            }
        }
        debug!("Runtime update subscription ended, resubscribing");
    }
}

/// Pending ids of one family. The latest signal for an id wins, so a
/// create followed by a delete collapses into the delete.
#[derive(Debug, Default)]
pub struct RuntimeBuffer {
    pending: HashMap<Binary, RuntimeKind>,
}

impl RuntimeBuffer {
    pub fn push(&mut self, id: Binary, kind: RuntimeKind) {
        self.pending.insert(id, kind);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drain into `(updates, deletes)`.
    pub fn take(&mut self) -> (Vec<Binary>, Vec<Binary>) {
        let mut updates = Vec::new();
        let mut deletes = Vec::new();
        for (id, kind) in self.pending.drain() {
            match kind {
                RuntimeKind::Update => updates.push(id),
                RuntimeKind::Delete => deletes.push(id),
            }
        }
        (updates, deletes)
    }
}

/// Flush trigger settings.
#[derive(Debug, Clone, Copy)]
pub struct FlushPolicy {
    pub interval: Duration,
    pub max_ids: usize,
}

pub struct RuntimeWorker<'a> {
    pub family: &'static str,
    pub updates: mpsc::Sender<Vec<Binary>>,
    pub deletes: mpsc::Sender<Vec<Binary>>,
    pub tally: &'a Tally,
    pub policy: FlushPolicy,
}

impl RuntimeWorker<'_> {
    /// Buffer and flush until the feed closes. The stage senders drop
    /// with the worker, letting downstream stages finish.
    pub async fn run(self, mut feed: broadcast::Receiver<RuntimeUpdate>) -> Result<(), SyncError> {
        let mut buffer = RuntimeBuffer::default();
        let mut ticker = tokio::time::interval(self.policy.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = feed.recv() => match received {
                    Ok(update) if update.family == self.family => {
                        buffer.push(update.id, update.kind);
                        if buffer.len() >= self.policy.max_ids {
                            self.flush(&mut buffer).await?;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(family = self.family, missed, "Runtime updates dropped, next full sync repairs them");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.flush(&mut buffer).await?;
                        return Ok(());
                    }
                },
                _ = ticker.tick() => self.flush(&mut buffer).await?,
            }
        }
    }

    async fn flush(&self, buffer: &mut RuntimeBuffer) -> Result<(), SyncError> {
        if buffer.is_empty() {
            return Ok(());
        }
        let (updates, deletes) = buffer.take();
        debug!(family = self.family, updates = updates.len(), deletes = deletes.len(), "Flushing runtime updates");

        for (ids, tx, kind) in [
            (deletes, &self.deletes, RuntimeKind::Delete),
            (updates, &self.updates, RuntimeKind::Update),
        ] {
            if ids.is_empty() {
                continue;
            }
            metrics::record_runtime_updates(self.family, kind.as_str(), ids.len());
            self.tally.add(ids.len());
            tx.send(ids)
                .await
                .map_err(|_| SyncError::ChannelClosed("runtime flush"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryRedis;

    fn id(n: u8) -> Binary {
        Binary::from([n; 20])
    }

    #[test]
    fn test_parse_payloads() {
        let hex = id(1).to_hex();
        let update = parse_runtime_update(UPDATE_CHANNEL, &format!("host:{}", hex)).unwrap();
        assert_eq!(update.family, "host");
        assert_eq!(update.kind, RuntimeKind::Update);

        let nested = parse_runtime_update(DELETE_CHANNEL, &format!("host:customvar:{}", hex)).unwrap();
        assert_eq!(nested.family, "host:customvar");
        assert_eq!(nested.kind, RuntimeKind::Delete);

        assert!(parse_runtime_update(UPDATE_CHANNEL, "host:nothex").is_none());
        assert!(parse_runtime_update("other", &format!("host:{}", hex)).is_none());
    }

    #[test]
    fn test_create_then_delete_collapses() {
        let mut buffer = RuntimeBuffer::default();
        buffer.push(id(1), RuntimeKind::Update);
        buffer.push(id(2), RuntimeKind::Update);
        buffer.push(id(1), RuntimeKind::Delete);
        let (updates, deletes) = buffer.take();
        assert_eq!(updates, vec![id(2)]);
        assert_eq!(deletes, vec![id(1)]);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_worker_flushes_on_count() {
        let (feed_tx, feed_rx) = broadcast::channel(16);
        let (up_tx, mut up_rx) = mpsc::channel(4);
        let (del_tx, _del_rx) = mpsc::channel(4);
        let tally = Tally::new();
        let worker = RuntimeWorker {
            family: "host",
            updates: up_tx,
            deletes: del_tx,
            tally: &tally,
            policy: FlushPolicy { interval: Duration::from_secs(3600), max_ids: 2 },
        };

        for (family, n) in [("service", 9), ("host", 1), ("host", 2)] {
            feed_tx
                .send(RuntimeUpdate { family: family.into(), id: id(n), kind: RuntimeKind::Update })
                .unwrap();
        }

        let run = worker.run(feed_rx);
        tokio::pin!(run);
        let mut flushed = tokio::select! {
            ids = up_rx.recv() => ids.unwrap(),
            _ = &mut run => panic!("worker stopped"),
        };
        flushed.sort();
        assert_eq!(flushed, vec![id(1), id(2)]);
        assert_eq!(tally.pending(), 2);
    }

    #[tokio::test]
    async fn test_feed_broadcasts_parsed_updates() {
        let redis = Arc::new(MemoryRedis::new());
        let (tx, mut rx) = broadcast::channel(4);
        let feed_task = tokio::spawn(feed(redis.clone(), tx));
        while redis.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
        redis.publish(DELETE_CHANNEL, &format!("host:{}", id(3).to_hex()));
        let update = rx.recv().await.unwrap();
        assert_eq!(update.id, id(3));
        assert_eq!(update.kind, RuntimeKind::Delete);
        feed_task.abort();
    }
}
