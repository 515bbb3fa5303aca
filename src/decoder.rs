// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! JSON decode pool.
//!
//! A fixed set of workers share one bounded job queue. Each job carries a
//! chunk of raw Redis objects for one descriptor plus the channel the
//! finished [`DecodedBatch`] goes back to, so every pipeline stage gets its
//! own results without knowing about the pool.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::objects::{decode_object, ObjectDescriptor};
use crate::types::{Binary, TableRows};

/// One object as read from Redis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObject {
    pub id: Binary,
    pub config: String,
    pub checksum: Option<String>,
}

/// Decoded rows for a chunk of ids.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBatch {
    /// Ids the batch was built from (one id may yield many rows).
    pub ids: Vec<Binary>,
    pub rows: TableRows,
}

pub type DecodeReply = mpsc::Sender<Result<DecodedBatch, SyncError>>;

pub struct DecodeJob {
    pub descriptor: &'static ObjectDescriptor,
    pub environment_id: Binary,
    pub objects: Vec<RawObject>,
    pub reply: DecodeReply,
}

/// Decode a job synchronously.
pub fn decode_batch(job: &DecodeJob) -> Result<DecodedBatch, SyncError> {
    let mut rows = job.descriptor.rows();
    let mut ids = Vec::with_capacity(job.objects.len());
    for object in &job.objects {
        let decoded = decode_object(
            job.descriptor,
            job.environment_id,
            object.id,
            &object.config,
            object.checksum.as_deref(),
        )?;
        rows.rows.extend(decoded);
        ids.push(object.id);
    }
    Ok(DecodedBatch { ids, rows })
}

/// Cloneable submission side of the pool.
#[derive(Clone)]
pub struct DecodeHandle {
    jobs: mpsc::Sender<DecodeJob>,
}

impl DecodeHandle {
    pub async fn submit(&self, job: DecodeJob) -> Result<(), SyncError> {
        self.jobs
            .send(job)
            .await
            .map_err(|_| SyncError::ChannelClosed("decode"))
    }
}

pub struct DecodePool {
    handle: DecodeHandle,
    workers: Vec<JoinHandle<()>>,
}

impl DecodePool {
    /// Spawn `workers` decoders sharing a queue of `capacity` jobs.
    #[must_use]
    pub fn new(workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<DecodeJob>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    loop {
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else {
                            debug!(worker, "Decode queue closed");
                            break;
                        };
                        let result = decode_batch(&job);
                        if let Err(e) = &result {
                            warn!(worker, table = job.descriptor.table, error = %e, "Decode failed");
                        }
                        // Receiver gone means the pipeline was cancelled.
                        let _ = job.reply.send(result).await;
                    }
                })
            })
            .collect();

        Self {
            handle: DecodeHandle { jobs: tx },
            workers,
        }
    }

    #[must_use]
    pub fn handle(&self) -> DecodeHandle {
        self.handle.clone()
    }

    /// Stop all workers, dropping queued jobs.
    pub async fn shutdown(self) {
        for worker in &self.workers {
            worker.abort();
        }
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}
