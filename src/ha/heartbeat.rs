// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Heartbeat listener on `icinga:stats`.

use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::storage::traits::RedisSource;
use crate::types::Binary;

pub const STATS_CHANNEL: &str = "icinga:stats";

/// One heartbeat of the monitoring core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub environment_id: Binary,
    pub environment: String,
    pub node_name: String,
    /// Unix seconds at which the heartbeat was received.
    pub time: i64,
}

impl Heartbeat {
    #[must_use]
    pub fn new(environment: &str, node_name: &str, time: i64) -> Self {
        Self {
            environment_id: Binary::sha1([environment]),
            environment: environment.to_string(),
            node_name: node_name.to_string(),
            time,
        }
    }
}

#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Extract environment and node name from an `icinga:stats` payload.
///
/// `IcingaApplication` may be an object or a JSON document encoded as a
/// string.
pub fn parse_heartbeat(payload: &str, time: i64) -> Result<Heartbeat, SyncError> {
    let malformed = |message: &str| SyncError::decode("heartbeat", STATS_CHANNEL, message);

    let doc: Value = serde_json::from_str(payload).map_err(|e| malformed(&e.to_string()))?;
    let app = match doc.get("IcingaApplication") {
        Some(Value::String(encoded)) => serde_json::from_str(encoded).map_err(|e| malformed(&e.to_string()))?,
        Some(other) => other.clone(),
        None => return Err(malformed("no IcingaApplication key")),
    };
    let app = app
        .pointer("/status/icingaapplication/app")
        .ok_or_else(|| malformed("no status.icingaapplication.app"))?;

    let environment = app.get("environment").and_then(Value::as_str).unwrap_or_default();
    if environment.is_empty() {
        return Err(SyncError::EmptyEnvironment);
    }
    let node_name = app.get("node_name").and_then(Value::as_str).unwrap_or_default();
    Ok(Heartbeat::new(environment, node_name, time))
}

/// Forward parsed heartbeats until the receiver goes away.
///
/// Malformed payloads are skipped; an empty environment is fatal. The
/// subscription is re-established if the pub/sub stream ends.
pub async fn listen(redis: Arc<dyn RedisSource>, tx: mpsc::Sender<Heartbeat>) -> Result<(), SyncError> {
    loop {
        let mut messages = redis.subscribe(&[STATS_CHANNEL]).await?;
        while let Some(message) = messages.next().await {
            match parse_heartbeat(&message.payload, unix_now()) {
                Ok(heartbeat) => {
                    if tx.send(heartbeat).await.is_err() {
                        return Ok(());
                    }
                }
                Err(SyncError::EmptyEnvironment) => return Err(SyncError::EmptyEnvironment),
                Err(e) => warn!(error = %e, "Ignoring malformed heartbeat"),
            }
        }
        debug!("Heartbeat subscription ended, resubscribing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(app: Value) -> String {
        json!({ "IcingaApplication": app }).to_string()
    }

    fn app(environment: &str) -> Value {
        json!({ "status": { "icingaapplication": { "app": {
            "environment": environment, "node_name": "master-1"
        }}}})
    }

    #[test]
    fn test_parse_object_payload() {
        let hb = parse_heartbeat(&payload(app("prod")), 42).unwrap();
        assert_eq!(hb.environment, "prod");
        assert_eq!(hb.node_name, "master-1");
        assert_eq!(hb.environment_id, Binary::sha1(["prod"]));
        assert_eq!(hb.time, 42);
    }

    #[test]
    fn test_parse_string_encoded_payload() {
        let encoded = Value::String(app("prod").to_string());
        let hb = parse_heartbeat(&payload(encoded), 0).unwrap();
        assert_eq!(hb.environment, "prod");
    }

    #[test]
    fn test_empty_environment_is_fatal() {
        assert!(matches!(
            parse_heartbeat(&payload(app("")), 0),
            Err(SyncError::EmptyEnvironment)
        ));
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(parse_heartbeat("nope", 0), Err(SyncError::Decode { .. })));
        assert!(matches!(parse_heartbeat("{}", 0), Err(SyncError::Decode { .. })));
        assert!(matches!(
            parse_heartbeat(&payload(json!({"status": {}})), 0),
            Err(SyncError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn test_listen_forwards_heartbeats() {
        let redis = Arc::new(crate::storage::memory::MemoryRedis::new());
        let (tx, mut rx) = mpsc::channel(4);
        let listener = tokio::spawn(listen(redis.clone(), tx));

        while redis.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
        redis.publish(STATS_CHANNEL, "garbage");
        redis.publish(STATS_CHANNEL, &payload(app("prod")));

        let hb = rx.recv().await.unwrap();
        assert_eq!(hb.environment, "prod");

        redis.publish(STATS_CHANNEL, &payload(app("")));
        assert!(matches!(listener.await.unwrap(), Err(SyncError::EmptyEnvironment)));
    }
}
