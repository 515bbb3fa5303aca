// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! High-availability arbiter.
//!
//! ```text
//!  icinga:stats ──▶ heartbeat ──▶ Arbiter ──arbitrate──▶ icingadb_instance
//!                                   │
//!                         is_active (watch)
//!                                   │
//!  icinga:dump ──XREAD──▶ dump reader ──▶ SyncSignal (broadcast) ──▶ operators
//! ```
//!
//! Responsibility is decided inside a database transaction on the shared
//! `icingadb_instance` table. While active, the dump reader turns
//! `icinga:dump` progress into start/stop signals. Losing heartbeats for
//! the watchdog period drops responsibility and stops every pipeline.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::decision::Decision;
use super::heartbeat::Heartbeat;
use crate::error::SyncError;
use crate::metrics;
use crate::storage::traits::{InstanceClaim, RedisSource};
use crate::supervisor::Supervisor;

pub const DUMP_STREAM: &str = "icinga:dump";

/// Start or stop the pipelines of a family (`None` = every family).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncSignal {
    Start { family: Option<String> },
    Stop { family: Option<String> },
}

impl SyncSignal {
    #[must_use]
    pub fn applies_to(&self, family: &str) -> bool {
        let target = match self {
            Self::Start { family } | Self::Stop { family } => family,
        };
        target.as_deref().map_or(true, |f| f == family)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HaTimings {
    /// Responsible rows older than this are taken over.
    pub stale_after: Duration,
    /// While active, heartbeats closer than this only refresh our row.
    pub refresh_window: Duration,
    /// Without a heartbeat for this long, responsibility is dropped.
    pub watchdog: Duration,
    pub cleanup_interval: Duration,
    /// Instance rows older than this are removed by cleanup.
    pub cleanup_age: Duration,
    /// Block time of a single `XREAD` on the dump stream.
    pub dump_block: Duration,
}

impl Default for HaTimings {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(15),
            refresh_window: Duration::from_secs(10),
            watchdog: Duration::from_secs(15),
            cleanup_interval: Duration::from_secs(300),
            cleanup_age: Duration::from_secs(30),
            dump_block: Duration::from_secs(1),
        }
    }
}

pub struct Arbiter {
    supervisor: Supervisor,
    timings: HaTimings,
    instance_id: Uuid,
    active: watch::Sender<bool>,
    signals: broadcast::Sender<SyncSignal>,
    /// Time of the last processed heartbeat, unix seconds.
    last_heartbeat: Option<i64>,
}

impl Arbiter {
    #[must_use]
    pub fn new(supervisor: Supervisor, timings: HaTimings) -> Self {
        let (active, _) = watch::channel(false);
        let (signals, _) = broadcast::channel(256);
        Self {
            supervisor,
            timings,
            instance_id: Uuid::new_v4(),
            active,
            signals,
            last_heartbeat: None,
        }
    }

    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Observe responsibility.
    #[must_use]
    pub fn active(&self) -> watch::Receiver<bool> {
        self.active.subscribe()
    }

    /// Sender side of the signal broadcast; operators call `subscribe()`.
    #[must_use]
    pub fn signals(&self) -> broadcast::Sender<SyncSignal> {
        self.signals.clone()
    }

    /// Run until shutdown or a fatal error.
    #[instrument(skip_all, fields(instance = %self.instance_id))]
    pub async fn run(
        mut self,
        mut heartbeats: mpsc::Receiver<Heartbeat>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SyncError> {
        let dump = read_dump(
            Arc::clone(&self.supervisor.redis),
            self.active.subscribe(),
            self.signals.clone(),
            self.timings.dump_block,
        );
        tokio::pin!(dump);

        let mut cleanup = tokio::time::interval(self.timings.cleanup_interval);
        cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut watchdog: Option<Instant> = None;

        let result = loop {
            let deadline = watchdog;
            tokio::select! {
                heartbeat = heartbeats.recv() => {
                    let Some(heartbeat) = heartbeat else {
                        break Err(SyncError::ChannelClosed("heartbeat"));
                    };
                    watchdog = Some(Instant::now() + self.timings.watchdog);
                    if let Err(e) = self.on_heartbeat(&heartbeat).await {
                        break Err(e);
                    }
                }
                _ = sleep_until(deadline) => {
                    watchdog = None;
                    self.on_heartbeat_lost();
                }
                _ = cleanup.tick() => {
                    if let Err(e) = self.cleanup().await {
                        break Err(e);
                    }
                }
                result = &mut dump => break result,
                _ = shutdown.changed() => break Ok(()),
            }
        };

        if *self.active.borrow() {
            self.set_active(false);
            let _ = self.signals.send(SyncSignal::Stop { family: None });
        }
        result
    }

    async fn on_heartbeat(&mut self, heartbeat: &Heartbeat) -> Result<(), SyncError> {
        self.supervisor.environment.set(heartbeat.environment_id)?;

        let claim = InstanceClaim {
            instance_id: self.instance_id,
            environment_id: heartbeat.environment_id,
            heartbeat: heartbeat.time,
        };
        let recent = self
            .last_heartbeat
            .is_some_and(|last| heartbeat.time - last < self.timings.refresh_window.as_secs() as i64);
        self.last_heartbeat = Some(heartbeat.time);

        if *self.active.borrow() && recent {
            if self.supervisor.db.refresh_instance(&claim).await? {
                return Ok(());
            }
            warn!("Responsible row was taken over, arbitrating again");
        }

        let decision = self.supervisor.db.arbitrate(&claim, self.timings.stale_after).await?;
        match &decision {
            Decision::TakeOver => info!(environment = %heartbeat.environment, node = %heartbeat.node_name, "Taking over responsibility"),
            Decision::Refresh => debug!("Still responsible"),
            Decision::Passive { holder } => {
                debug!(holder = %holder.id, heartbeat = holder.heartbeat, "Other instance is active")
            }
        }

        let was_active = *self.active.borrow();
        let now_active = decision.is_active();
        if was_active && !now_active {
            warn!("Lost responsibility to another instance");
            let _ = self.signals.send(SyncSignal::Stop { family: None });
        }
        self.set_active(now_active);
        Ok(())
    }

    fn on_heartbeat_lost(&mut self) {
        self.last_heartbeat = None;
        if *self.active.borrow() {
            warn!(after = ?self.timings.watchdog, "Heartbeat lost, dropping responsibility");
            self.set_active(false);
            let _ = self.signals.send(SyncSignal::Stop { family: None });
        }
    }

    async fn cleanup(&self) -> Result<(), SyncError> {
        let (Some(last), true) = (self.last_heartbeat, *self.active.borrow()) else {
            return Ok(());
        };
        let before = last - self.timings.cleanup_age.as_secs() as i64;
        let removed = self.supervisor.db.delete_stale_instances(before).await?;
        if removed > 0 {
            info!(removed, "Removed stale instance rows");
        }
        Ok(())
    }

    fn set_active(&self, active: bool) {
        let changed = self.active.send_if_modified(|current| {
            let changed = *current != active;
            *current = active;
            changed
        });
        if changed {
            metrics::set_responsible(active);
            metrics::record_ha_transition(if active { "active" } else { "passive" });
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn dump_signal(fields: &std::collections::HashMap<String, String>) -> Option<SyncSignal> {
    let kind = fields.get("type")?;
    let family = (kind != "*").then(|| kind.clone());
    Some(match fields.get("state").map(String::as_str) {
        Some("done") => SyncSignal::Start { family },
        _ => SyncSignal::Stop { family },
    })
}

/// Follow `icinga:dump` while active, starting from `0-0` each time
/// responsibility is (re)gained.
pub async fn read_dump(
    redis: Arc<dyn RedisSource>,
    mut active: watch::Receiver<bool>,
    signals: broadcast::Sender<SyncSignal>,
    block: Duration,
) -> Result<(), SyncError> {
    loop {
        if active.wait_for(|a| *a).await.is_err() {
            return Ok(());
        }
        let mut last_id = "0-0".to_string();
        debug!("Reading dump progress");

        loop {
            if !*active.borrow_and_update() {
                break;
            }
            let entries = tokio::select! {
                entries = redis.xread(DUMP_STREAM, &last_id, 100, block) => entries?,
                _ = active.changed() => continue,
            };
            for entry in entries {
                last_id = entry.id;
                if let Some(signal) = dump_signal(&entry.fields) {
                    debug!(?signal, "Dump progress");
                    let _ = signals.send(signal);
                }
            }
        }
    }
}
