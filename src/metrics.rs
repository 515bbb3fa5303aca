// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for icingadb.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding process is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `icingadb_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `table`: relational table name
//! - `operation`: insert, update, delete
//! - `stream`: history stream key
//! - `backend`: database, redis

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// CONFIG SYNC
// ═══════════════════════════════════════════════════════════════════════════

/// Record rows written or deleted by the config pipeline
pub fn record_sync_rows(table: &str, operation: &str, count: usize) {
    counter!(
        "icingadb_sync_rows_total",
        "table" => table.to_string(),
        "operation" => operation.to_string()
    )
    .increment(count as u64);
}

/// Record statement latency
pub fn record_sync_latency(table: &str, operation: &str, duration: Duration) {
    histogram!(
        "icingadb_sync_seconds",
        "table" => table.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record the size of an initial delta
pub fn record_delta(table: &str, insert: usize, update: usize, delete: usize) {
    gauge!("icingadb_delta_ids", "table" => table.to_string(), "set" => "insert").set(insert as f64);
    gauge!("icingadb_delta_ids", "table" => table.to_string(), "set" => "update").set(update as f64);
    gauge!("icingadb_delta_ids", "table" => table.to_string(), "set" => "delete").set(delete as f64);
}

/// Record runtime update ids flushed into the pipeline
pub fn record_runtime_updates(family: &str, kind: &str, count: usize) {
    counter!(
        "icingadb_runtime_updates_total",
        "family" => family.to_string(),
        "kind" => kind.to_string()
    )
    .increment(count as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// HISTORY
// ═══════════════════════════════════════════════════════════════════════════

/// Record history events by outcome (written, skipped)
pub fn record_history_events(stream: &str, status: &str, count: usize) {
    counter!(
        "icingadb_history_events_total",
        "stream" => stream.to_string(),
        "status" => status.to_string()
    )
    .increment(count as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// HA
// ═══════════════════════════════════════════════════════════════════════════

/// Set whether this instance is responsible (1) or passive (0)
pub fn set_responsible(active: bool) {
    gauge!("icingadb_ha_responsible").set(if active { 1.0 } else { 0.0 });
}

/// Record a responsibility handover observed by this instance
pub fn record_ha_transition(to: &str) {
    counter!("icingadb_ha_transitions_total", "to" => to.to_string()).increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// RETENTION
// ═══════════════════════════════════════════════════════════════════════════

/// Record rows removed by retention
pub fn record_retention_deleted(table: &str, count: u64) {
    counter!(
        "icingadb_retention_deleted_total",
        "table" => table.to_string()
    )
    .increment(count);
}

// ═══════════════════════════════════════════════════════════════════════════
// BACKEND HEALTH - Connection status
// ═══════════════════════════════════════════════════════════════════════════

/// Set backend health status (1 = healthy, 0 = unhealthy)
pub fn set_backend_healthy(backend: &str, healthy: bool) {
    gauge!(
        "icingadb_backend_healthy",
        "backend" => backend.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

/// Record a connection/backend error
pub fn record_connection_error(backend: &str) {
    counter!(
        "icingadb_connection_errors_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Record a transaction retried after a serialization failure or deadlock
pub fn record_transaction_retry(operation: &str) {
    counter!(
        "icingadb_transaction_retries_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// STARTUP
// ═══════════════════════════════════════════════════════════════════════════

/// Record startup phase duration
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "icingadb_startup_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A timing guard that records statement latency on drop
pub struct LatencyTimer {
    table: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(table: &'static str, operation: &'static str) -> Self {
        Self {
            table,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_sync_latency(self.table, self.operation, self.start.elapsed());
    }
}
