// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Stream consumer for one `(object type, category)` history stream.

use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, instrument};

use super::category::{Category, ObjectKind};
use super::event::event_rows;
use crate::error::SyncError;
use crate::metrics;
use crate::storage::traits::{EventRows, StorageError, StreamEntry};
use crate::supervisor::Supervisor;
use crate::types::Binary;

const DEFAULT_BLOCK: Duration = Duration::from_secs(1);

pub struct HistoryWorker {
    supervisor: Supervisor,
    object: ObjectKind,
    category: Category,
    stream: String,
    block: Duration,
}

impl HistoryWorker {
    #[must_use]
    pub fn new(supervisor: Supervisor, object: ObjectKind, category: Category) -> Self {
        Self {
            supervisor,
            object,
            category,
            stream: category.stream(object),
            block: DEFAULT_BLOCK,
        }
    }

    /// How long one `XREAD` waits before the responsibility flag is
    /// checked again.
    #[must_use]
    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    /// Drain the stream while this instance is responsible.
    ///
    /// Entries are removed only after their batch committed, so a crash
    /// replays them (REPLACE keeps that idempotent). Entries that cannot
    /// be written are logged and left behind; the in-memory cursor moves
    /// past them until responsibility is lost.
    #[instrument(skip_all, fields(stream = %self.stream))]
    pub async fn run(self, mut active: watch::Receiver<bool>) -> Result<(), SyncError> {
        let environment_id = self.supervisor.environment.wait().await;
        let batch = self.supervisor.config.sync.history_batch.max(1);
        let mut cursor = String::from("0-0");

        loop {
            if !*active.borrow_and_update() {
                cursor = String::from("0-0");
                if active.changed().await.is_err() {
                    return Ok(());
                }
                continue;
            }

            let entries = self
                .supervisor
                .redis
                .xread(&self.stream, &cursor, batch, self.block)
                .await?;
            let Some(last) = entries.last() else {
                continue;
            };
            cursor = last.id.clone();
            self.write(environment_id, entries).await?;
        }
    }

    async fn write(&self, environment_id: Binary, entries: Vec<StreamEntry>) -> Result<(), SyncError> {
        let mut ids = Vec::with_capacity(entries.len());
        let mut events: Vec<EventRows> = Vec::with_capacity(entries.len());
        for entry in entries {
            match event_rows(self.object, self.category, environment_id, &entry.fields) {
                Ok(rows) => {
                    ids.push(entry.id);
                    events.push(rows);
                }
                Err(reason) => {
                    error!(id = %entry.id, %reason, "Skipping malformed history event");
                    metrics::record_history_events(&self.stream, "skipped", 1);
                }
            }
        }

        while !events.is_empty() {
            match self.supervisor.db.write_history(&events).await {
                Ok(()) => break,
                Err(StorageError::Rejected { index, message }) if index < events.len() => {
                    let id = ids.remove(index);
                    events.remove(index);
                    error!(%id, %message, "Skipping history event the database rejected");
                    metrics::record_history_events(&self.stream, "skipped", 1);
                }
                Err(err) => return Err(err.into()),
            }
        }

        if !ids.is_empty() {
            self.supervisor.redis.xdel(&self.stream, &ids).await?;
            metrics::record_history_events(&self.stream, "written", ids.len());
            debug!(events = ids.len(), "History batch committed");
        }
        Ok(())
    }
}
