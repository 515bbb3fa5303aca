// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL database wrapper.
//!
//! One sqlx `Any` pool shared by every pipeline. Each outward call runs
//! through [`SqlDatabase::call`]:
//!
//! ```text
//!   wait_for_connection ──► run ──► Ok ──────────────────────► return
//!          ▲                  │
//!          │                  ├─ connection error ─► mark lost ─┐
//!          │                  ├─ 1205 / 1213 / deadlock ─► back off
//!          └──────────────────┴──────────────────────────────────┘
//!                             └─ anything else ──────────────► Backend error
//! ```
//!
//! ## Dialects
//!
//! MySQL/MariaDB is the production target. Every MySQL connection gets the
//! strict `sql_mode` (with `ANSI_QUOTES`), `innodb_strict_mode = 1` and,
//! on Galera, `wsrep_sync_wait = 4`. SQLite is supported for local runs and
//! tests: no session setup, no isolation levels, no `FOR UPDATE`, and
//! bounded deletes go through a `rowid` sub-select.
//!
//! The schema itself is not created here.

use async_trait::async_trait;
use sqlx::any::{AnyArguments, AnyPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{Any, AnyConnection, AnyPool, Connection, Row};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::statements::{self, Dialect, KEY_CHUNK};
use super::traits::{
    Database, EventRows, InstanceClaim, InstanceRow, RetentionDelete, StorageError,
};
use crate::config::DatabaseConfig;
use crate::ha::decision::{decide, Decision};
use crate::metrics;
use crate::resilience::classify::{classify_sql, ErrorClass};
use crate::resilience::connection::{ConnectionGuard, ProbeSchedule};
use crate::resilience::retry::{retry, RetryConfig};
use crate::types::{Binary, SqlValue, TableRows};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

type AnyQuery<'q> = Query<'q, Any, AnyArguments<'q>>;

fn bind_value<'q>(query: AnyQuery<'q>, value: &SqlValue) -> AnyQuery<'q> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Bytes(b) => query.bind(b.clone()),
    }
}

fn decode_err<E: std::error::Error + Send + Sync + 'static>(e: E) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Isolation {
    Serializable,
    ReadCommitted,
}

async fn setup_mysql_session(conn: &mut AnyConnection) -> Result<(), sqlx::Error> {
    sqlx::query(statements::MYSQL_SQL_MODE).execute(&mut *conn).await?;
    sqlx::query(statements::MYSQL_INNODB_STRICT).execute(&mut *conn).await?;
    if let Err(e) = sqlx::query(statements::MYSQL_WSREP_SYNC_WAIT).execute(&mut *conn).await {
        if classify_sql(&e) != ErrorClass::UnknownSystemVariable {
            return Err(e);
        }
    }
    Ok(())
}

pub struct SqlDatabase {
    pool: AnyPool,
    dialect: Dialect,
    guard: Arc<ConnectionGuard>,
    max_placeholders: usize,
    max_rows_per_transaction: usize,
}

impl SqlDatabase {
    /// Connect using the configured URL, with startup-mode retry.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StorageError> {
        let url = config
            .connection_url()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Self::connect_with(&url, config, ProbeSchedule::default()).await
    }

    pub async fn connect_with(
        url: &str,
        config: &DatabaseConfig,
        schedule: ProbeSchedule,
    ) -> Result<Self, StorageError> {
        install_drivers();

        let dialect = Dialect::from_url(url);
        // SQLite serializes writers anyway; one connection avoids "database is locked".
        let max_connections = match dialect {
            Dialect::MySql => config.max_connections.max(1),
            Dialect::Sqlite => 1,
        };

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            let mut options = AnyPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(10));
            if dialect == Dialect::MySql {
                options = options.after_connect(|conn, _meta| Box::pin(async move { setup_mysql_session(conn).await }));
            }
            options
                .connect(url)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        if dialect == Dialect::Sqlite && !url.contains(":memory:") {
            sqlx::query("PRAGMA journal_mode = WAL")
                .execute(&pool)
                .await
                .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;
        }

        info!(?dialect, max_connections, "Connected to database");

        Ok(Self {
            pool,
            dialect,
            guard: ConnectionGuard::new("database", schedule),
            max_placeholders: config.max_placeholders_per_statement.max(1),
            max_rows_per_transaction: config.max_rows_per_transaction.max(1),
        })
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn guard(&self) -> Arc<ConnectionGuard> {
        Arc::clone(&self.guard)
    }

    /// Run `operation` until it succeeds or fails with a non-transient error.
    async fn call<T, F, Fut>(&self, name: &'static str, mut operation: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut backoff = RetryConfig::transaction().backoff();
        loop {
            self.guard.wait_for_connection().await?;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => match classify_sql(&e) {
                    ErrorClass::Connection => {
                        let pool = self.pool.clone();
                        self.guard.mark_lost(&e.to_string(), move || {
                            let pool = pool.clone();
                            async move {
                                sqlx::query("SELECT 1")
                                    .execute(&pool)
                                    .await
                                    .map(|_| ())
                                    .map_err(|e| e.to_string())
                            }
                        });
                    }
                    ErrorClass::Retryable => {
                        let delay = backoff.next().unwrap_or(Duration::from_secs(1));
                        debug!(operation = name, error = %e, ?delay, "Retrying transaction");
                        metrics::record_transaction_retry(name);
                        tokio::time::sleep(delay).await;
                    }
                    ErrorClass::UnknownSystemVariable | ErrorClass::Fatal => {
                        return Err(StorageError::Backend(format!("{}: {}", name, e)));
                    }
                },
            }
        }
    }

    async fn acquire(&self, isolation: Isolation) -> Result<PoolConnection<Any>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        if self.dialect == Dialect::MySql {
            let stmt = match isolation {
                Isolation::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
                Isolation::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            };
            sqlx::query(stmt).execute(&mut *conn).await?;
        }
        Ok(conn)
    }

    /// REPLACE all rows on `conn`, chunked by the placeholder budget.
    async fn exec_replace(&self, conn: &mut AnyConnection, rows: &TableRows, data: &[Vec<SqlValue>]) -> Result<u64, sqlx::Error> {
        let per_stmt = statements::rows_per_statement(rows.columns.len(), self.max_placeholders, self.max_rows_per_transaction);
        let mut affected = 0;
        for chunk in data.chunks(per_stmt) {
            let sql = statements::bulk_insert_stmt(rows.table, &rows.columns, chunk.len());
            let mut query = sqlx::query(&sql);
            for row in chunk {
                for value in row {
                    query = bind_value(query, value);
                }
            }
            affected += query.execute(&mut *conn).await?.rows_affected();
        }
        Ok(affected)
    }

    async fn read_responsible(
        &self,
        conn: &mut AnyConnection,
        environment_id: Binary,
    ) -> Result<Option<InstanceRow>, sqlx::Error> {
        let row = sqlx::query(statements::select_responsible_stmt(self.dialect))
            .bind(environment_id.to_vec())
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => {
                let id: Vec<u8> = row.try_get(0)?;
                Ok(Some(InstanceRow {
                    id: Uuid::from_slice(&id).map_err(decode_err)?,
                    environment_id,
                    heartbeat: row.try_get(1)?,
                    responsible: true,
                }))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Database for SqlDatabase {
    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    async fn fetch_ids(
        &self,
        table: &str,
        column: &str,
        environment_id: Binary,
    ) -> Result<Vec<Binary>, StorageError> {
        let sql = statements::select_ids_stmt(table, column);
        let rows = self
            .call("fetch_ids", || async {
                sqlx::query(&sql)
                    .bind(environment_id.to_vec())
                    .fetch_all(&self.pool)
                    .await
            })
            .await?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let bytes: Vec<u8> = row
                .try_get(0)
                .map_err(|e| StorageError::Backend(format!("{}.{}: {}", table, column, e)))?;
            let id = Binary::from_bytes(&bytes).map_err(|e| StorageError::Backend(e.to_string()))?;
            if !id.is_zero() {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn fetch_checksums(
        &self,
        table: &str,
        ids: &[Binary],
    ) -> Result<HashMap<Binary, Binary>, StorageError> {
        let mut out = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(KEY_CHUNK) {
            let sql = statements::select_checksums_stmt(table, chunk.len());
            let rows = self
                .call("fetch_checksums", || async {
                    let mut query = sqlx::query(&sql);
                    for id in chunk {
                        query = query.bind(id.to_vec());
                    }
                    query.fetch_all(&self.pool).await
                })
                .await?;
            for row in rows {
                let id: Vec<u8> = row.try_get(0).map_err(|e| StorageError::Backend(e.to_string()))?;
                let checksum: Vec<u8> = row.try_get(1).map_err(|e| StorageError::Backend(e.to_string()))?;
                let id = Binary::from_bytes(&id).map_err(|e| StorageError::Backend(e.to_string()))?;
                let checksum = Binary::from_bytes(&checksum).map_err(|e| StorageError::Backend(e.to_string()))?;
                out.insert(id, checksum);
            }
        }
        Ok(out)
    }

    async fn replace_rows(&self, rows: &TableRows) -> Result<u64, StorageError> {
        let mut affected = 0;
        for batch in rows.rows.chunks(self.max_rows_per_transaction) {
            affected += self
                .call("replace_rows", || async {
                    let mut conn = self.acquire(Isolation::ReadCommitted).await?;
                    let mut tx = conn.begin().await?;
                    let n = self.exec_replace(&mut tx, rows, batch).await?;
                    tx.commit().await?;
                    Ok(n)
                })
                .await?;
        }
        Ok(affected)
    }

    async fn delete_rows(
        &self,
        table: &str,
        column: &str,
        ids: &[Binary],
    ) -> Result<u64, StorageError> {
        let mut affected = 0;
        for chunk in ids.chunks(KEY_CHUNK) {
            let sql = statements::bulk_delete_stmt(table, column, chunk.len());
            affected += self
                .call("delete_rows", || async {
                    let mut query = sqlx::query(&sql);
                    for id in chunk {
                        query = query.bind(id.to_vec());
                    }
                    Ok(query.execute(&self.pool).await?.rows_affected())
                })
                .await?;
        }
        Ok(affected)
    }

    async fn rewrite_rows(
        &self,
        column: &str,
        ids: &[Binary],
        rows: &TableRows,
    ) -> Result<u64, StorageError> {
        let deletes: Vec<(String, &[Binary])> = ids
            .chunks(KEY_CHUNK)
            .map(|chunk| (statements::bulk_delete_stmt(rows.table, column, chunk.len()), chunk))
            .collect();
        self.call("rewrite_rows", || async {
            let mut conn = self.acquire(Isolation::ReadCommitted).await?;
            let mut tx = conn.begin().await?;
            for (sql, chunk) in &deletes {
                let mut query = sqlx::query(sql);
                for id in *chunk {
                    query = query.bind(id.to_vec());
                }
                query.execute(&mut *tx).await?;
            }
            let n = self.exec_replace(&mut tx, rows, &rows.rows).await?;
            tx.commit().await?;
            Ok(n)
        })
        .await
    }

    async fn insert_ignore(&self, rows: &TableRows) -> Result<u64, StorageError> {
        let per_stmt = statements::rows_per_statement(rows.columns.len(), self.max_placeholders, self.max_rows_per_transaction);
        let mut affected = 0;
        for chunk in rows.rows.chunks(per_stmt) {
            let sql = statements::insert_ignore_stmt(self.dialect, rows.table, &rows.columns, chunk.len());
            affected += self
                .call("insert_ignore", || async {
                    let mut query = sqlx::query(&sql);
                    for row in chunk {
                        for value in row {
                            query = bind_value(query, value);
                        }
                    }
                    Ok(query.execute(&self.pool).await?.rows_affected())
                })
                .await?;
        }
        Ok(affected)
    }

    async fn arbitrate(
        &self,
        claim: &InstanceClaim,
        stale_after: Duration,
    ) -> Result<Decision, StorageError> {
        let me = claim.instance_id.as_bytes().to_vec();
        let env = claim.environment_id.to_vec();

        self.call("arbitrate", || async {
            let mut conn = self.acquire(Isolation::Serializable).await?;
            let mut tx = conn.begin().await?;

            let current = self.read_responsible(&mut tx, claim.environment_id).await?;
            let decision = decide(current.as_ref(), claim, stale_after);

            match decision {
                Decision::TakeOver => {
                    sqlx::query(statements::DELETE_OWN_INSTANCE_STMT)
                        .bind(me.clone())
                        .execute(&mut *tx)
                        .await?;
                    let taken = sqlx::query(statements::TAKEOVER_STMT)
                        .bind(me.clone())
                        .bind(claim.heartbeat)
                        .bind(env.clone())
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                    if taken == 0 {
                        sqlx::query(statements::INSERT_INSTANCE_STMT)
                            .bind(me.clone())
                            .bind(env.clone())
                            .bind(claim.heartbeat)
                            .bind("y".to_string())
                            .execute(&mut *tx)
                            .await?;
                    }
                }
                Decision::Refresh => {
                    sqlx::query(statements::REFRESH_INSTANCE_STMT)
                        .bind(claim.heartbeat)
                        .bind(me.clone())
                        .execute(&mut *tx)
                        .await?;
                }
                Decision::Passive { .. } => {
                    sqlx::query(statements::INSERT_INSTANCE_STMT)
                        .bind(me.clone())
                        .bind(env.clone())
                        .bind(claim.heartbeat)
                        .bind("n".to_string())
                        .execute(&mut *tx)
                        .await?;
                }
            }

            tx.commit().await?;
            Ok(decision)
        })
        .await
    }

    async fn refresh_instance(&self, claim: &InstanceClaim) -> Result<bool, StorageError> {
        let me = claim.instance_id.as_bytes().to_vec();
        self.call("refresh_instance", || async {
            let mut conn = self.acquire(Isolation::Serializable).await?;
            let mut tx = conn.begin().await?;
            let held = sqlx::query(statements::OWN_RESPONSIBLE_STMT)
                .bind(me.clone())
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            if held {
                sqlx::query(statements::REFRESH_INSTANCE_STMT)
                    .bind(claim.heartbeat)
                    .bind(me.clone())
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok(held)
        })
        .await
    }

    async fn delete_stale_instances(&self, before: i64) -> Result<u64, StorageError> {
        self.call("delete_stale_instances", || async {
            Ok(sqlx::query(statements::DELETE_STALE_INSTANCES_STMT)
                .bind(before)
                .execute(&self.pool)
                .await?
                .rows_affected())
        })
        .await
    }

    async fn write_history(&self, events: &[EventRows]) -> Result<(), StorageError> {
        let outcome = self
            .call("write_history", || async {
                let mut conn = self.acquire(Isolation::Serializable).await?;
                let mut tx = conn.begin().await?;
                for (index, event) in events.iter().enumerate() {
                    for rows in event {
                        if let Err(e) = self.exec_replace(&mut tx, rows, &rows.rows).await {
                            return match classify_sql(&e) {
                                ErrorClass::Connection | ErrorClass::Retryable => Err(e),
                                _ => Ok(Err((index, format!("{}: {}", rows.table, e)))),
                            };
                        }
                    }
                }
                tx.commit().await?;
                Ok(Ok(()))
            })
            .await?;
        outcome.map_err(|(index, message)| StorageError::Rejected { index, message })
    }

    async fn delete_expired(&self, rule: &RetentionDelete) -> Result<u64, StorageError> {
        let sql = statements::retention_delete_stmt(self.dialect, rule);
        self.call("delete_expired", || async {
            let mut query = sqlx::query(&sql)
                .bind(rule.environment_id.to_vec())
                .bind(rule.threshold);
            if rule.end_column.is_some() {
                query = query.bind(rule.threshold);
            }
            Ok(query.execute(&self.pool).await?.rows_affected())
        })
        .await
    }
}
