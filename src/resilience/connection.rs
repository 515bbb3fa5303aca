// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connect-state machine shared by the database and Redis wrappers.
//!
//! ```text
//!            call fails with a connection error
//!   Connected ────────────────────────────────► Disconnected ──┐
//!       ▲          (single prober spawned)           │  probe   │
//!       │                                            │  fails   │
//!       └──────────── probe succeeds ◄───────────────┘◄─────────┘
//!                                                    │
//!                                  outage > budget   ▼
//!                                                  Failed (fatal)
//! ```
//!
//! Callers block in [`ConnectionGuard::wait_for_connection`] while the
//! backend is down. Only the caller that flips the flag from connected to
//! disconnected starts the prober, so an outage seen by a hundred workers
//! still produces one probe loop. Probes back off 5 s, 5 s, 5 s, 5 s,
//! 10 s, 30 s, then every 60 s; after five minutes the guard publishes
//! [`ConnectionState::Failed`] and every waiter returns an error.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::metrics;
use crate::storage::traits::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected { since: Instant },
    Failed { elapsed: Duration },
}

/// Probe back-off and the outage budget.
#[derive(Debug, Clone)]
pub struct ProbeSchedule {
    pub delays: Vec<Duration>,
    /// Delay used once `delays` is exhausted.
    pub steady: Duration,
    pub budget: Duration,
}

impl Default for ProbeSchedule {
    fn default() -> Self {
        let five = Duration::from_secs(5);
        Self {
            delays: vec![five, five, five, five, Duration::from_secs(10), Duration::from_secs(30)],
            steady: Duration::from_secs(60),
            budget: Duration::from_secs(300),
        }
    }
}

impl ProbeSchedule {
    /// Fast schedule for tests.
    #[must_use]
    pub fn fast(budget: Duration) -> Self {
        Self {
            delays: vec![Duration::from_millis(5)],
            steady: Duration::from_millis(10),
            budget,
        }
    }

    #[must_use]
    pub fn delay(&self, attempt: usize) -> Duration {
        self.delays.get(attempt).copied().unwrap_or(self.steady)
    }
}

pub struct ConnectionGuard {
    backend: &'static str,
    connected: AtomicBool,
    state: watch::Sender<ConnectionState>,
    schedule: ProbeSchedule,
}

impl ConnectionGuard {
    #[must_use]
    pub fn new(backend: &'static str, schedule: ProbeSchedule) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Connected);
        metrics::set_backend_healthy(backend, true);
        Arc::new(Self {
            backend,
            connected: AtomicBool::new(true),
            state,
            schedule,
        })
    }

    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Observe state transitions (the orchestrator watches for `Failed`).
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Block until the backend is reachable. Errors once the outage
    /// budget has been exhausted.
    pub async fn wait_for_connection(&self) -> Result<(), StorageError> {
        let mut rx = self.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Failed { elapsed } => {
                    return Err(StorageError::Connection(format!(
                        "{} unreachable for {:?}",
                        self.backend, elapsed
                    )));
                }
                ConnectionState::Disconnected { .. } => {}
            }
            if rx.changed().await.is_err() {
                return Err(StorageError::Connection(format!("{} guard dropped", self.backend)));
            }
        }
    }

    /// Report a connection-class failure. The first reporter of an outage
    /// spawns the prober; later reporters just wait.
    pub fn mark_lost<P, Fut>(self: &Arc<Self>, reason: &str, probe: P)
    where
        P: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send,
    {
        if self
            .connected
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let since = Instant::now();
        warn!(backend = self.backend, reason, "Connection lost, waiting for backend");
        metrics::record_connection_error(self.backend);
        metrics::set_backend_healthy(self.backend, false);
        self.state.send_replace(ConnectionState::Disconnected { since });

        let guard = Arc::clone(self);
        tokio::spawn(async move {
            let mut attempt = 0;
            loop {
                tokio::time::sleep(guard.schedule.delay(attempt)).await;
                attempt += 1;

                match probe().await {
                    Ok(()) => {
                        info!(
                            backend = guard.backend,
                            attempts = attempt,
                            downtime = ?since.elapsed(),
                            "Connection re-established"
                        );
                        guard.connected.store(true, Ordering::Release);
                        metrics::set_backend_healthy(guard.backend, true);
                        guard.state.send_replace(ConnectionState::Connected);
                        return;
                    }
                    Err(e) => {
                        let elapsed = since.elapsed();
                        if elapsed >= guard.schedule.budget {
                            error!(backend = guard.backend, ?elapsed, error = %e, "Giving up on backend");
                            guard.state.send_replace(ConnectionState::Failed { elapsed });
                            return;
                        }
                        warn!(
                            backend = guard.backend,
                            attempt,
                            error = %e,
                            next_in = ?guard.schedule.delay(attempt),
                            "Backend still unreachable"
                        );
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_default_schedule() {
        let schedule = ProbeSchedule::default();
        let secs: Vec<u64> = (0..8).map(|i| schedule.delay(i).as_secs()).collect();
        assert_eq!(secs, vec![5, 5, 5, 5, 10, 30, 60, 60]);
        assert_eq!(schedule.budget, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_connected_guard_does_not_block() {
        let guard = ConnectionGuard::new("test", ProbeSchedule::fast(Duration::from_secs(1)));
        assert!(guard.is_connected());
        guard.wait_for_connection().await.unwrap();
    }

    #[tokio::test]
    async fn test_recovers_after_probe_succeeds() {
        let guard = ConnectionGuard::new("test", ProbeSchedule::fast(Duration::from_secs(5)));
        let probes = Arc::new(AtomicUsize::new(0));

        let p = probes.clone();
        guard.mark_lost("reset by peer", move || {
            let p = p.clone();
            async move {
                if p.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("still down".to_string())
                } else {
                    Ok(())
                }
            }
        });
        assert!(!guard.is_connected());

        guard.wait_for_connection().await.unwrap();
        assert!(guard.is_connected());
        assert_eq!(probes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_single_prober_per_outage() {
        let guard = ConnectionGuard::new("test", ProbeSchedule::fast(Duration::from_secs(5)));
        let spawned = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let s = spawned.clone();
            guard.mark_lost("gone away", move || {
                s.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            });
        }

        guard.wait_for_connection().await.unwrap();
        assert_eq!(spawned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let guard = ConnectionGuard::new("test", ProbeSchedule::fast(Duration::from_millis(30)));
        let mut states = guard.subscribe();

        guard.mark_lost("refused", || async { Err("refused".to_string()) });

        let err = guard.wait_for_connection().await.unwrap_err();
        assert!(matches!(err, StorageError::Connection(_)));

        states.changed().await.ok();
        let final_state = *states.borrow();
        assert!(matches!(final_state, ConnectionState::Failed { .. }));
    }
}
