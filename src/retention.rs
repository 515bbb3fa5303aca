// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! History retention.
//!
//! Every cleanup tick walks the history tables with a configured retention
//! and deletes expired rows in bounded batches until a batch comes back
//! short. A batch that takes longer than [`SLOW_BATCH`] halves the next
//! one; a fast batch restores the configured size.

use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use crate::config::RetentionConfig;
use crate::error::SyncError;
use crate::history::{Category, ObjectKind};
use crate::metrics;
use crate::storage::traits::{Database, RetentionDelete};
use crate::supervisor::Supervisor;
use crate::types::Binary;

pub const SLOW_BATCH: Duration = Duration::from_secs(1);

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Retention key of the SLA projection tables.
pub const SLA_OPTION: &str = "sla";

/// One table the cleanup loop looks after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionTarget {
    pub table: &'static str,
    pub time_column: &'static str,
    pub end_column: Option<&'static str>,
    pub days: u64,
}

impl RetentionTarget {
    fn rule(&self, environment_id: Binary, now_ms: i64, limit: u64) -> RetentionDelete {
        let age = i64::try_from(self.days).unwrap_or(i64::MAX / DAY_MS).saturating_mul(DAY_MS);
        RetentionDelete {
            table: self.table.to_string(),
            environment_id,
            time_column: self.time_column,
            end_column: self.end_column,
            threshold: now_ms.saturating_sub(age),
            limit,
        }
    }
}

/// Tables with a non-zero retention.
#[must_use]
pub fn targets(config: &RetentionConfig) -> Vec<RetentionTarget> {
    let mut out = Vec::new();
    for category in Category::ALL {
        let (time_column, end_column) = category.retention_columns();
        for object in ObjectKind::ALL {
            let table = category.table(object);
            out.push(RetentionTarget {
                table,
                time_column,
                end_column,
                days: config.days_for_table(table, category.as_str()),
            });
        }
    }
    out.push(RetentionTarget {
        table: "sla_history_state",
        time_column: "event_time",
        end_column: None,
        days: config.days_for_table("sla_history_state", SLA_OPTION),
    });
    out.push(RetentionTarget {
        table: "sla_history_downtime",
        time_column: "downtime_start",
        end_column: Some("downtime_end"),
        days: config.days_for_table("sla_history_downtime", SLA_OPTION),
    });
    out.retain(|t| t.days > 0);
    out
}

/// Delete everything expired in one table. Returns the rows removed.
pub async fn clean_table(
    db: &dyn Database,
    target: &RetentionTarget,
    environment_id: Binary,
    now_ms: i64,
    batch: u64,
) -> Result<u64, SyncError> {
    let batch = batch.max(1);
    let mut limit = batch;
    let mut removed = 0;
    loop {
        let started = Instant::now();
        let deleted = db.delete_expired(&target.rule(environment_id, now_ms, limit)).await?;
        removed += deleted;
        if deleted < limit {
            break;
        }
        limit = if started.elapsed() > SLOW_BATCH { (limit / 2).max(1) } else { batch };
    }
    if removed > 0 {
        metrics::record_retention_deleted(target.table, removed);
    }
    Ok(removed)
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

pub struct Retention {
    supervisor: Supervisor,
    targets: Vec<RetentionTarget>,
}

impl Retention {
    #[must_use]
    pub fn new(supervisor: Supervisor) -> Self {
        let targets = targets(&supervisor.config.retention);
        Self { supervisor, targets }
    }

    /// Clean on every tick while this instance is responsible.
    #[instrument(skip_all)]
    pub async fn run(self, active: watch::Receiver<bool>) -> Result<(), SyncError> {
        if self.targets.is_empty() {
            info!("History retention disabled");
            return Ok(());
        }
        let environment_id = self.supervisor.environment.wait().await;
        let config = &self.supervisor.config.retention;
        let mut ticker = tokio::time::interval(config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !*active.borrow() {
                debug!("Skipping retention, not responsible");
                continue;
            }
            let now = now_ms();
            for target in &self.targets {
                let removed = clean_table(self.supervisor.db.as_ref(), target, environment_id, now, config.count).await?;
                if removed > 0 {
                    info!(table = target.table, removed, "Removed expired history");
                }
            }
        }
    }
}
