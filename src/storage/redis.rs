// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis wrapper.
//!
//! Reads the keys Icinga 2 maintains:
//!
//! ```text
//! icinga:config:<family>            HASH   id → JSON config
//! icinga:checksum:<family>          HASH   id → JSON checksums
//! icinga:dump                       STREAM type, state
//! icinga:history:stream:<ot>:<cat>  STREAM history events
//! icinga:stats                      PUBSUB heartbeat
//! icinga:config:update / :delete    PUBSUB <family>:<id>
//! ```
//!
//! Regular commands share one multiplexed [`ConnectionManager`]. Blocking
//! `XREAD`s would stall that pipeline, so they borrow a dedicated
//! connection from a small pool instead. The only mutation ever sent is
//! `XDEL` on history streams.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{cmd, pipe, AsyncCommands, Client, RedisError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::traits::{ConfigPair, PubSubMessage, RedisSource, StorageError, StreamEntry};
use crate::config::RedisConfig;
use crate::resilience::classify::{classify_redis, ErrorClass};
use crate::resilience::connection::{ConnectionGuard, ProbeSchedule};
use crate::resilience::retry::{retry, RetryConfig};

pub struct RedisClient {
    client: Client,
    connection: ConnectionManager,
    /// Idle dedicated connections for blocking reads.
    blocking: Mutex<Vec<MultiplexedConnection>>,
    guard: Arc<ConnectionGuard>,
}

impl RedisClient {
    pub async fn connect(config: &RedisConfig) -> Result<Self, StorageError> {
        Self::connect_with(&config.connection_url(), ProbeSchedule::default()).await
    }

    pub async fn connect_with(url: &str, schedule: ProbeSchedule) -> Result<Self, StorageError> {
        let client = Client::open(url).map_err(|e| StorageError::Backend(e.to_string()))?;

        // Use startup config: fast-fail, don't hang forever
        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: RedisError| StorageError::Backend(e.to_string()))?;

        info!("Connected to Redis");

        Ok(Self {
            client,
            connection,
            blocking: Mutex::new(Vec::new()),
            guard: ConnectionGuard::new("redis", schedule),
        })
    }

    pub fn guard(&self) -> Arc<ConnectionGuard> {
        Arc::clone(&self.guard)
    }

    /// Dedicated blocking-read connections currently idle.
    pub fn idle_blocking_connections(&self) -> usize {
        self.blocking.lock().len()
    }

    /// Get a clone of the connection manager.
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    async fn call<T, F, Fut>(&self, mut operation: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RedisError>>,
    {
        loop {
            self.guard.wait_for_connection().await?;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if classify_redis(&e) == ErrorClass::Connection => {
                    let probe_conn = self.connection.clone();
                    self.guard.mark_lost(&e.to_string(), move || {
                        let mut conn = probe_conn.clone();
                        async move {
                            cmd("PING")
                                .query_async::<String>(&mut conn)
                                .await
                                .map(|_| ())
                                .map_err(|e| e.to_string())
                        }
                    });
                }
                Err(e) => return Err(StorageError::Backend(e.to_string())),
            }
        }
    }

    async fn take_blocking(&self) -> Result<BlockingLease<'_>, RedisError> {
        let idle = self.blocking.lock().pop();
        let conn = match idle {
            Some(conn) => conn,
            None => self.client.get_multiplexed_async_connection().await?,
        };
        Ok(BlockingLease {
            conn,
            idle: Some(&self.blocking),
        })
    }
}

/// A dedicated connection borrowed for one blocking read.
///
/// Goes back to the idle list on drop, including when the read future is
/// cancelled. A multiplexed connection discards the reply of an abandoned
/// request, so the next borrower only waits out the remaining block time.
/// Connections that failed are discarded instead.
struct BlockingLease<'a> {
    conn: MultiplexedConnection,
    idle: Option<&'a Mutex<Vec<MultiplexedConnection>>>,
}

impl BlockingLease<'_> {
    fn discard(mut self) {
        self.idle = None;
    }
}

impl Drop for BlockingLease<'_> {
    fn drop(&mut self) {
        if let Some(idle) = self.idle {
            // Cloning only copies the handle to the shared connection.
            idle.lock().push(self.conn.clone());
        }
    }
}

fn stream_entries(reply: Option<StreamReadReply>) -> Result<Vec<StreamEntry>, RedisError> {
    let mut out = Vec::new();
    let Some(reply) = reply else {
        return Ok(out);
    };
    for key in reply.keys {
        for entry in key.ids {
            let mut fields = HashMap::with_capacity(entry.map.len());
            for (name, value) in &entry.map {
                fields.insert(name.clone(), redis::from_redis_value::<String>(value)?);
            }
            out.push(StreamEntry { id: entry.id, fields });
        }
    }
    Ok(out)
}

#[async_trait]
impl RedisSource for RedisClient {
    async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>, StorageError> {
        self.call(|| async {
            let mut conn = self.connection.clone();
            conn.hkeys::<_, Vec<String>>(key).await
        })
        .await
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>, StorageError> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        self.call(|| async {
            let mut conn = self.connection.clone();
            cmd("HMGET")
                .arg(key)
                .arg(fields)
                .query_async::<Vec<Option<String>>>(&mut conn)
                .await
        })
        .await
    }

    async fn hmget_pair(
        &self,
        config_key: &str,
        checksum_key: &str,
        fields: &[String],
    ) -> Result<Vec<ConfigPair>, StorageError> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let (configs, checksums) = self
            .call(|| async {
                let mut conn = self.connection.clone();
                pipe()
                    .cmd("HMGET")
                    .arg(config_key)
                    .arg(fields)
                    .cmd("HMGET")
                    .arg(checksum_key)
                    .arg(fields)
                    .query_async::<(Vec<Option<String>>, Vec<Option<String>>)>(&mut conn)
                    .await
            })
            .await?;

        Ok(configs
            .into_iter()
            .zip(checksums)
            .map(|(config, checksum)| ConfigPair { config, checksum })
            .collect())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StorageError> {
        self.call(|| async {
            let mut conn = self.connection.clone();
            conn.hgetall::<_, HashMap<String, String>>(key).await
        })
        .await
    }

    async fn xread(
        &self,
        stream: &str,
        last_id: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StorageError> {
        let block_ms = usize::try_from(block.as_millis()).unwrap_or(usize::MAX).max(1);
        self.call(|| async {
            let mut lease = self.take_blocking().await?;
            let opts = StreamReadOptions::default().count(count).block(block_ms);
            let read: Result<Option<StreamReadReply>, RedisError> =
                lease.conn.xread_options(&[stream], &[last_id], &opts).await;
            match read {
                Ok(reply) => stream_entries(reply),
                Err(e) => {
                    if classify_redis(&e) == ErrorClass::Connection {
                        lease.discard();
                    }
                    Err(e)
                }
            }
        })
        .await
    }

    async fn xdel(&self, stream: &str, ids: &[String]) -> Result<u64, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.call(|| async {
            let mut conn = self.connection.clone();
            conn.xdel::<_, _, u64>(stream, ids).await
        })
        .await
    }

    async fn subscribe(
        &self,
        channels: &[&str],
    ) -> Result<BoxStream<'static, PubSubMessage>, StorageError> {
        let pubsub = self
            .call(|| async {
                let mut pubsub = self.client.get_async_pubsub().await?;
                for channel in channels {
                    pubsub.subscribe(*channel).await?;
                }
                Ok(pubsub)
            })
            .await?;

        Ok(pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                let payload = msg.get_payload::<String>().ok()?;
                Some(PubSubMessage {
                    channel: msg.get_channel_name().to_string(),
                    payload,
                })
            })
            .boxed())
    }
}
