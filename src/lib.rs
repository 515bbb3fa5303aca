// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # icingadb
//!
//! Projects the configuration and history Icinga 2 publishes into Redis
//! onto a relational schema, one writer per environment.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Redis                               │
//! │  • icinga:config:* / icinga:checksum:* hashes               │
//! │  • icinga:stats heartbeats, icinga:config:update|delete     │
//! │  • icinga:dump and icinga:history:stream:* streams          │
//! └─────────────────────────────────────────────────────────────┘
//!            │ heartbeat                │ config             │ history
//!            ▼                          ▼                    ▼
//! ┌──────────────────┐  SyncSignal  ┌────────────────┐  ┌────────────────┐
//! │    HA arbiter    │─────────────▶│ 46 operators   │  │ 12 history     │
//! │  • responsible?  │              │  • delta       │  │   workers      │
//! │  • dump state    │   is_active  │  • 7 stages    │  │  • SLA fan-out │
//! │  • row cleanup   │─────────────▶│  • runtime buf │  │  • XDEL        │
//! └──────────────────┘              └────────────────┘  └────────────────┘
//!            │                          │                    │
//!            ▼                          ▼                    ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  MySQL / MariaDB (SQLite in tests)          │
//! │  • icingadb_instance, object tables, history + SLA tables   │
//! │  • retention deletes in bounded batches                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use icingadb::{Config, Daemon};
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), icingadb::SyncError> {
//!     let config: Config = serde_yaml::from_str("database: {host: db, user: icingadb}")
//!         .expect("valid config");
//!     let (_stop, shutdown) = watch::channel(false);
//!
//!     Daemon::connect(config).await?.run(shutdown).await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`daemon`]: The orchestrator owning every task
//! - [`ha`]: Heartbeats, responsibility arbitration, dump state
//! - [`sync`]: Configuration delta and the per-type pipeline
//! - [`history`]: History stream ingestion and SLA rows
//! - [`objects`]: Declarative descriptors of every object type
//! - [`decoder`]: JSON decode worker pool
//! - [`storage`]: Database and Redis seams (sqlx, redis-rs, in-memory)
//! - [`resilience`]: Connection state machine, error classes, retry
//! - [`retention`], [`nullrows`], [`sla`]: Housekeeping and reporting

pub mod config;
pub mod daemon;
pub mod decoder;
pub mod error;
pub mod ha;
pub mod history;
pub mod metrics;
pub mod nullrows;
pub mod objects;
pub mod resilience;
pub mod retention;
pub mod sla;
pub mod storage;
pub mod supervisor;
pub mod sync;
pub mod types;

pub use config::{Config, DatabaseConfig, DatabaseType, RedisConfig, RetentionConfig, SyncConfig};
pub use daemon::Daemon;
pub use error::SyncError;
pub use ha::{Arbiter, HaTimings, Heartbeat, SyncSignal};
pub use history::{Category, HistoryWorker, ObjectKind};
pub use metrics::LatencyTimer;
pub use objects::{ObjectDescriptor, CATALOG};
pub use resilience::retry::RetryConfig;
pub use storage::traits::{Database, RedisSource, StorageError};
pub use storage::{MemoryDatabase, MemoryRedis, RedisClient, SqlDatabase};
pub use supervisor::Supervisor;
pub use sync::{Delta, Operator, Tally};
pub use types::{Binary, SqlValue, TableRows};
