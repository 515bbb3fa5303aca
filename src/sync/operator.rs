// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-type operator: starts and stops the pipeline on arbiter signals.

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use super::pipeline::Pipeline;
use super::runtime::RuntimeUpdate;
use super::tally::Tally;
use crate::error::SyncError;
use crate::ha::SyncSignal;
use crate::objects::ObjectDescriptor;
use crate::supervisor::Supervisor;

type Running = BoxFuture<'static, Result<(), SyncError>>;

async fn drive(pipeline: &mut Option<Running>) -> Result<(), SyncError> {
    match pipeline {
        Some(running) => running.await,
        None => std::future::pending().await,
    }
}

pub struct Operator {
    supervisor: Supervisor,
    descriptor: &'static ObjectDescriptor,
    signals: broadcast::Receiver<SyncSignal>,
    runtime: broadcast::Sender<RuntimeUpdate>,
    tally: Arc<Tally>,
}

impl Operator {
    #[must_use]
    pub fn new(
        supervisor: Supervisor,
        descriptor: &'static ObjectDescriptor,
        signals: broadcast::Receiver<SyncSignal>,
        runtime: broadcast::Sender<RuntimeUpdate>,
    ) -> Self {
        Self {
            supervisor,
            descriptor,
            signals,
            runtime,
            tally: Arc::new(Tally::new()),
        }
    }

    /// In-flight ids of the current pipeline.
    #[must_use]
    pub fn tally(&self) -> Arc<Tally> {
        Arc::clone(&self.tally)
    }

    /// Process signals until the arbiter goes away or a pipeline fails.
    #[instrument(skip_all, fields(table = self.descriptor.table))]
    pub async fn run(mut self) -> Result<(), SyncError> {
        let mut pipeline: Option<Running> = None;
        loop {
            tokio::select! {
                signal = self.signals.recv() => match signal {
                    Ok(signal) if signal.applies_to(self.descriptor.family) => {
                        pipeline = self.apply(&signal);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Missed sync signals");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
                result = drive(&mut pipeline) => {
                    pipeline = None;
                    result?;
                    debug!("Pipeline finished");
                }
            }
        }
    }

    /// Build a fresh pipeline on start, drop the running one on stop.
    fn apply(&self, signal: &SyncSignal) -> Option<Running> {
        self.tally.reset();
        match signal {
            SyncSignal::Stop { .. } => {
                info!("Stopping sync");
                None
            }
            SyncSignal::Start { .. } => {
                let Some(environment_id) = self.supervisor.environment.get() else {
                    warn!("Start requested before the environment is known");
                    return None;
                };
                info!("Starting sync");
                let pipeline = Pipeline::new(
                    self.supervisor.clone(),
                    self.descriptor,
                    environment_id,
                    Arc::clone(&self.tally),
                );
                Some(Box::pin(pipeline.run(self.runtime.subscribe())))
            }
        }
    }
}
