// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Daemon configuration.
//!
//! Loading the file is the embedding binary's job; the library consumes
//! the deserialized [`Config`].
//!
//! # Example
//!
//! ```
//! use icingadb::Config;
//!
//! let config: Config = serde_yaml::from_str(r#"
//! database:
//!   host: db.example.com
//!   user: icingadb
//!   password: secret
//!   database: icingadb
//! redis:
//!   address: redis.example.com:6380
//! retention:
//!   days: 365
//!   options:
//!     state: 30
//! "#).unwrap();
//!
//! assert_eq!(config.database.port, 3306);
//! assert_eq!(config.database.max_connections_per_table, 8);
//! assert_eq!(config.retention.days_for("state"), 30);
//! assert_eq!(config.retention.days_for("comment"), 365);
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::SyncError;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Supported database flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    #[default]
    Mysql,
    Pgsql,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub ca: Option<String>,
    #[serde(default)]
    pub cert: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    /// Skip server certificate verification.
    #[serde(default)]
    pub insecure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default, rename = "type")]
    pub kind: DatabaseType,
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_db_name")]
    pub database: String,
    /// Full connection URL; takes precedence over the discrete fields.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_max_connections_per_table")]
    pub max_connections_per_table: usize,
    #[serde(default = "default_max_placeholders_per_statement")]
    pub max_placeholders_per_statement: usize,
    #[serde(default = "default_max_rows_per_transaction")]
    pub max_rows_per_transaction: usize,
}

fn default_db_host() -> String { "localhost".into() }
fn default_db_port() -> u16 { 3306 }
fn default_db_name() -> String { "icingadb".into() }
fn default_max_connections() -> u32 { 16 }
fn default_max_connections_per_table() -> usize { 8 }
fn default_max_placeholders_per_statement() -> usize { 8192 }
fn default_max_rows_per_transaction() -> usize { 8192 }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: DatabaseType::default(),
            host: default_db_host(),
            port: default_db_port(),
            user: String::new(),
            password: String::new(),
            database: default_db_name(),
            url: None,
            tls: TlsConfig::default(),
            max_connections: default_max_connections(),
            max_connections_per_table: default_max_connections_per_table(),
            max_placeholders_per_statement: default_max_placeholders_per_statement(),
            max_rows_per_transaction: default_max_rows_per_transaction(),
        }
    }
}

impl DatabaseConfig {
    /// Build the sqlx connection URL.
    pub fn connection_url(&self) -> Result<String, SyncError> {
        if let Some(ref url) = self.url {
            return Ok(url.clone());
        }
        match self.kind {
            DatabaseType::Mysql => {
                let mut url = format!(
                    "mysql://{}:{}@{}:{}/{}",
                    self.user, self.password, self.host, self.port, self.database
                );
                if self.tls.enabled {
                    let mode = if self.tls.insecure { "required" } else { "verify_identity" };
                    url.push_str(&format!("?ssl-mode={}", mode));
                    if let Some(ref ca) = self.tls.ca {
                        url.push_str(&format!("&ssl-ca={}", ca));
                    }
                    if let Some(ref cert) = self.tls.cert {
                        url.push_str(&format!("&ssl-cert={}", cert));
                    }
                    if let Some(ref key) = self.tls.key {
                        url.push_str(&format!("&ssl-key={}", key));
                    }
                }
                Ok(url)
            }
            DatabaseType::Sqlite => Ok(format!("sqlite://{}?mode=rwc", self.database)),
            DatabaseType::Pgsql => Err(SyncError::Config(
                "database type 'pgsql' is not supported by this build, use 'mysql'".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// `host:port` of the Redis instance Icinga 2 writes to.
    #[serde(default = "default_redis_address")]
    pub address: String,
    /// Full `redis://` URL; takes precedence over `address`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tls: bool,
}

fn default_redis_address() -> String { "localhost:6380".into() }

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            address: default_redis_address(),
            url: None,
            password: None,
            tls: false,
        }
    }
}

impl RedisConfig {
    #[must_use]
    pub fn connection_url(&self) -> String {
        if let Some(ref url) = self.url {
            return url.clone();
        }
        let scheme = if self.tls { "rediss" } else { "redis" };
        match self.password {
            Some(ref password) => format!("{}://:{}@{}", scheme, password, self.address),
            None => format!("{}://{}", scheme, self.address),
        }
    }
}

/// History retention.
///
/// `days` applies to every category not listed in `options`; `0` keeps
/// history forever. `tables` overrides a single table by name.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default)]
    pub days: u64,
    #[serde(default)]
    pub options: HashMap<String, u64>,
    #[serde(default)]
    pub tables: HashMap<String, u64>,
    /// Seconds between cleanup runs.
    #[serde(default = "default_retention_interval_secs")]
    pub interval_secs: u64,
    /// Initial (and restored) DELETE batch size.
    #[serde(default = "default_retention_count")]
    pub count: u64,
}

fn default_retention_interval_secs() -> u64 { 3600 }
fn default_retention_count() -> u64 { 5000 }

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: 0,
            options: HashMap::new(),
            tables: HashMap::new(),
            interval_secs: default_retention_interval_secs(),
            count: default_retention_count(),
        }
    }
}

impl RetentionConfig {
    /// Retention in days for a history category.
    #[must_use]
    pub fn days_for(&self, category: &str) -> u64 {
        self.options.get(category).copied().unwrap_or(self.days)
    }

    /// Retention in days for a concrete table, honouring per-table overrides.
    #[must_use]
    pub fn days_for_table(&self, table: &str, category: &str) -> u64 {
        self.tables.get(table).copied().unwrap_or_else(|| self.days_for(category))
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Pipeline sizing. Defaults are the fixed design parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_decode_workers")]
    pub decode_workers: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default = "default_delete_chunk_size")]
    pub delete_chunk_size: usize,
    #[serde(default = "default_runtime_flush_ms")]
    pub runtime_flush_ms: u64,
    #[serde(default = "default_runtime_flush_count")]
    pub runtime_flush_count: usize,
    #[serde(default = "default_history_batch")]
    pub history_batch: usize,
}

fn default_decode_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}
fn default_chunk_size() -> usize { 500 }
fn default_fetch_concurrency() -> usize { 32 }
fn default_delete_chunk_size() -> usize { 1000 }
fn default_runtime_flush_ms() -> u64 { 1000 }
fn default_runtime_flush_count() -> usize { 1000 }
fn default_history_batch() -> usize { 1000 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            decode_workers: default_decode_workers(),
            chunk_size: default_chunk_size(),
            fetch_concurrency: default_fetch_concurrency(),
            delete_chunk_size: default_delete_chunk_size(),
            runtime_flush_ms: default_runtime_flush_ms(),
            runtime_flush_count: default_runtime_flush_count(),
            history_batch: default_history_batch(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.database.max_placeholders_per_statement, 8192);
        assert_eq!(config.sync.chunk_size, 500);
        assert_eq!(config.sync.runtime_flush_count, 1000);
        assert_eq!(config.retention.count, 5000);
        assert_eq!(config.retention.interval(), Duration::from_secs(3600));
    }

    #[test]
    fn test_mysql_url() {
        let db = DatabaseConfig {
            user: "u".into(),
            password: "p".into(),
            host: "h".into(),
            database: "d".into(),
            ..Default::default()
        };
        assert_eq!(db.connection_url().unwrap(), "mysql://u:p@h:3306/d");
    }

    #[test]
    fn test_url_override_wins() {
        let db = DatabaseConfig {
            url: Some("sqlite::memory:".into()),
            ..Default::default()
        };
        assert_eq!(db.connection_url().unwrap(), "sqlite::memory:");
    }

    #[test]
    fn test_pgsql_rejected() {
        let db = DatabaseConfig {
            kind: DatabaseType::Pgsql,
            ..Default::default()
        };
        assert!(matches!(db.connection_url(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_retention_zero_disables() {
        let retention = RetentionConfig {
            days: 0,
            options: [("state".to_string(), 7)].into_iter().collect(),
            ..Default::default()
        };
        assert_eq!(retention.days_for("state"), 7);
        assert_eq!(retention.days_for("notification"), 0);
    }

    #[test]
    fn test_table_override() {
        let retention = RetentionConfig {
            days: 10,
            tables: [("service_state_history".to_string(), 3)].into_iter().collect(),
            ..Default::default()
        };
        assert_eq!(retention.days_for_table("service_state_history", "state"), 3);
        assert_eq!(retention.days_for_table("host_state_history", "state"), 10);
    }

    #[test]
    fn test_redis_url() {
        let redis = RedisConfig::default();
        assert_eq!(redis.connection_url(), "redis://localhost:6380");
        let redis = RedisConfig {
            password: Some("pw".into()),
            tls: true,
            ..Default::default()
        };
        assert_eq!(redis.connection_url(), "rediss://:pw@localhost:6380");
    }
}
