// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Orchestrator: wires every component together and owns their tasks.
//!
//! Start order is decode pool, operators, history workers, retention,
//! null rows, runtime feed, heartbeat listener, arbiter. Operators
//! subscribe to the signal broadcast before the arbiter can emit
//! anything. The first error any task reports ends the run; shutdown
//! happens in reverse order.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::config::{Config, DatabaseType};
use crate::decoder::DecodePool;
use crate::error::SyncError;
use crate::ha::{heartbeat, Arbiter, HaTimings};
use crate::history::{Category, HistoryWorker, ObjectKind};
use crate::metrics;
use crate::nullrows::insert_null_rows;
use crate::objects::CATALOG;
use crate::resilience::connection::{ConnectionGuard, ConnectionState};
use crate::retention::Retention;
use crate::storage::traits::{Database, RedisSource};
use crate::storage::{RedisClient, SqlDatabase};
use crate::supervisor::{ErrorSink, Supervisor};
use crate::sync::{runtime, Operator};

const ERROR_CAPACITY: usize = 64;
const HEARTBEAT_CAPACITY: usize = 16;
const RUNTIME_CAPACITY: usize = 8192;
const ARBITER_GRACE: Duration = Duration::from_secs(5);

pub struct Daemon {
    db: Arc<dyn Database>,
    redis: Arc<dyn RedisSource>,
    guards: Vec<Arc<ConnectionGuard>>,
    config: Arc<Config>,
    timings: HaTimings,
    history_block: Duration,
}

impl Daemon {
    /// Connect both backends from the configuration.
    pub async fn connect(config: Config) -> Result<Self, SyncError> {
        if config.database.kind == DatabaseType::Pgsql {
            return Err(SyncError::Config("database type 'pgsql' is not supported, use 'mysql'".into()));
        }
        let started = Instant::now();
        let db = SqlDatabase::connect(&config.database).await?;
        let redis = RedisClient::connect(&config.redis).await?;
        metrics::record_startup_phase("connect", started.elapsed());

        let guards = vec![db.guard(), redis.guard()];
        let mut daemon = Self::with_backends(Arc::new(db), Arc::new(redis), config);
        daemon.guards = guards;
        Ok(daemon)
    }

    /// Run against already constructed backends.
    #[must_use]
    pub fn with_backends(db: Arc<dyn Database>, redis: Arc<dyn RedisSource>, config: Config) -> Self {
        Self {
            db,
            redis,
            guards: Vec::new(),
            config: Arc::new(config),
            timings: HaTimings::default(),
            history_block: Duration::from_secs(1),
        }
    }

    #[must_use]
    pub fn with_timings(mut self, timings: HaTimings) -> Self {
        self.timings = timings;
        self
    }

    #[must_use]
    pub fn with_history_block(mut self, block: Duration) -> Self {
        self.history_block = block;
        self
    }

    /// Run until `shutdown` flips or a component fails. Returns the first
    /// fatal error.
    #[instrument(skip_all)]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), SyncError> {
        let started = Instant::now();
        let sync = &self.config.sync;
        let pool = DecodePool::new(sync.decode_workers, sync.decode_workers.max(1) * 2);
        let (errors, mut fatal) = ErrorSink::new(ERROR_CAPACITY);
        let supervisor = Supervisor::new(
            Arc::clone(&self.db),
            Arc::clone(&self.redis),
            pool.handle(),
            errors.clone(),
            Arc::clone(&self.config),
        );

        let arbiter = Arbiter::new(supervisor.clone(), self.timings);
        let active = arbiter.active();
        let signals = arbiter.signals();
        let (runtime_tx, _) = broadcast::channel(RUNTIME_CAPACITY);
        let mut tasks = JoinSet::new();

        for descriptor in CATALOG.iter() {
            let operator = Operator::new(supervisor.clone(), descriptor, signals.subscribe(), runtime_tx.clone());
            spawn(&mut tasks, &errors, "operator", operator.run());
        }

        for object in ObjectKind::ALL {
            for category in Category::ALL {
                let worker = HistoryWorker::new(supervisor.clone(), object, category).with_block(self.history_block);
                spawn(&mut tasks, &errors, "history", worker.run(active.clone()));
            }
        }

        spawn(&mut tasks, &errors, "retention", Retention::new(supervisor.clone()).run(active.clone()));

        let nulls = supervisor.clone();
        let mut responsible = active.clone();
        spawn(&mut tasks, &errors, "null rows", async move {
            let environment_id = nulls.environment.wait().await;
            if responsible.wait_for(|active| *active).await.is_err() {
                return Ok(());
            }
            insert_null_rows(nulls.db.as_ref(), environment_id).await.map(|_| ())
        });

        spawn(&mut tasks, &errors, "runtime feed", runtime::feed(Arc::clone(&self.redis), runtime_tx));

        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(HEARTBEAT_CAPACITY);
        spawn(&mut tasks, &errors, "heartbeat", heartbeat::listen(Arc::clone(&self.redis), heartbeat_tx));

        for guard in &self.guards {
            spawn(&mut tasks, &errors, "connection watch", watch_guard(guard.subscribe(), guard.backend()));
        }

        let arbiter_errors = errors.clone();
        let arbiter_shutdown = shutdown.clone();
        let arbiter_task = tokio::spawn(async move {
            if let Err(err) = arbiter.run(heartbeat_rx, arbiter_shutdown).await {
                error!(task = "arbiter", error = %err, "Task failed");
                arbiter_errors.report(err).await;
            }
        });

        metrics::record_startup_phase("start", started.elapsed());
        info!(operators = CATALOG.len(), "Daemon running");

        let outcome = tokio::select! {
            err = fatal.recv() => match err {
                Some(err) => Err(err),
                None => Ok(()),
            },
            _ = shutdown.changed() => {
                info!("Shutdown requested");
                Ok(())
            }
        };

        // Reverse order: the arbiter stops the pipelines first, then the
        // remaining tasks and the decode pool go.
        if outcome.is_err() {
            arbiter_task.abort();
        }
        if tokio::time::timeout(ARBITER_GRACE, arbiter_task).await.is_err() {
            warn!("Arbiter did not stop in time");
        }
        tasks.shutdown().await;
        pool.shutdown().await;
        info!("Daemon stopped");
        outcome
    }
}

fn spawn<F>(tasks: &mut JoinSet<()>, errors: &ErrorSink, name: &'static str, task: F)
where
    F: Future<Output = Result<(), SyncError>> + Send + 'static,
{
    let errors = errors.clone();
    tasks.spawn(async move {
        if let Err(err) = task.await {
            error!(task = name, error = %err, "Task failed");
            errors.report(err).await;
        }
    });
}

/// Resolve with an error once the backend's outage budget is spent.
async fn watch_guard(mut state: watch::Receiver<ConnectionState>, backend: &'static str) -> Result<(), SyncError> {
    loop {
        if let ConnectionState::Failed { elapsed } = *state.borrow_and_update() {
            return Err(SyncError::BackendUnavailable {
                backend: backend.to_string(),
                elapsed,
            });
        }
        if state.changed().await.is_err() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::connection::ProbeSchedule;

    #[tokio::test]
    async fn test_watch_guard_reports_failure() {
        let guard = ConnectionGuard::new("database", ProbeSchedule::fast(Duration::from_millis(30)));
        let watcher = tokio::spawn(watch_guard(guard.subscribe(), "database"));
        guard.mark_lost("connection refused", || async { Err("still down".to_string()) });

        let result = tokio::time::timeout(Duration::from_secs(5), watcher).await.unwrap().unwrap();
        assert!(matches!(result, Err(SyncError::BackendUnavailable { .. })));
    }
}
