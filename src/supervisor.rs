// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Process-wide context.
//!
//! [`Supervisor`] is cloned into every long-running task. It bundles the
//! two backends, the decode pool, the fatal error sink, the latched
//! environment id and the per-table write semaphores.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tracing::error;

use crate::config::Config;
use crate::decoder::DecodeHandle;
use crate::error::SyncError;
use crate::storage::traits::{Database, RedisSource};
use crate::types::Binary;

/// The environment id, set once from the first heartbeat.
pub struct EnvironmentLatch {
    tx: watch::Sender<Option<Binary>>,
}

impl Default for EnvironmentLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentLatch {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Latch `id`. Setting the same id again is a no-op; a different id is
    /// fatal.
    pub fn set(&self, id: Binary) -> Result<(), SyncError> {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|current| match current {
            None => {
                *current = Some(id);
                true
            }
            Some(latched) if *latched == id => false,
            Some(latched) => {
                outcome = Err(SyncError::EnvironmentChanged {
                    latched: *latched,
                    received: id,
                });
                false
            }
        });
        outcome
    }

    #[must_use]
    pub fn get(&self) -> Option<Binary> {
        *self.tx.borrow()
    }

    /// Wait until the environment is known.
    pub async fn wait(&self) -> Binary {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(id) = *rx.borrow_and_update() {
                return id;
            }
            if rx.changed().await.is_err() {
                // Sender lives as long as self; unreachable in practice.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Fan-in for fatal errors; the daemon shuts down on the first one.
#[derive(Clone)]
pub struct ErrorSink {
    tx: mpsc::Sender<SyncError>,
}

impl ErrorSink {
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SyncError>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub async fn report(&self, err: SyncError) {
        error!(error = %err, "Fatal error");
        // Daemon already shutting down if the receiver is gone.
        let _ = self.tx.send(err).await;
    }
}

/// Counting semaphore per table capping concurrent writers.
pub struct TableSemaphores {
    permits: usize,
    tables: DashMap<&'static str, Arc<Semaphore>>,
}

impl TableSemaphores {
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            permits: permits.max(1),
            tables: DashMap::new(),
        }
    }

    pub async fn acquire(&self, table: &'static str) -> Result<OwnedSemaphorePermit, SyncError> {
        let semaphore = self
            .tables
            .entry(table)
            .or_insert_with(|| Arc::new(Semaphore::new(self.permits)))
            .clone();
        semaphore
            .acquire_owned()
            .await
            .map_err(|_| SyncError::ChannelClosed("table semaphore"))
    }
}

#[derive(Clone)]
pub struct Supervisor {
    pub db: Arc<dyn Database>,
    pub redis: Arc<dyn RedisSource>,
    pub decoder: DecodeHandle,
    pub errors: ErrorSink,
    pub environment: Arc<EnvironmentLatch>,
    pub semaphores: Arc<TableSemaphores>,
    pub config: Arc<Config>,
}

impl Supervisor {
    #[must_use]
    pub fn new(
        db: Arc<dyn Database>,
        redis: Arc<dyn RedisSource>,
        decoder: DecodeHandle,
        errors: ErrorSink,
        config: Arc<Config>,
    ) -> Self {
        Self {
            db,
            redis,
            decoder,
            errors,
            environment: Arc::new(EnvironmentLatch::new()),
            semaphores: Arc::new(TableSemaphores::new(config.database.max_connections_per_table)),
            config,
        }
    }
}
