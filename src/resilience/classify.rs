// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error classification for the backend wrappers.
//!
//! A failed call is either a lost connection (wait for the prober, then
//! repeat), a serialization failure or deadlock (repeat the transaction),
//! or anything else (surface it).

use sqlx::mysql::MySqlDatabaseError;

/// Substrings of driver messages that mean the connection is gone.
pub const CONNECTION_ERRORS: &[&str] = &[
    "server has gone away",
    "lost connection",
    "connection refused",
    "connection reset",
    "reset by peer",
    "broken pipe",
    "bad connection",
    "invalid connection",
    "connection was killed",
    "connection timed out",
    "i/o timeout",
    "no route to host",
    "network is unreachable",
    "unexpected eof",
    "unexpected end of file",
    "can't connect to",
    "too many connections",
    "server shutdown in progress",
    "wsrep has not yet prepared node for application use",
    "the server is shutting down",
    "pool timed out",
    "pool closed",
    "connection closed",
    "not connected",
];

/// MySQL error numbers.
pub const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
pub const ER_LOCK_DEADLOCK: u16 = 1213;
pub const ER_UNKNOWN_SYSTEM_VARIABLE: u16 = 1193;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Backend unreachable; wait for the connection and repeat.
    Connection,
    /// Serialization failure or deadlock; repeat the transaction.
    Retryable,
    /// Galera-only session variable on plain MySQL.
    UnknownSystemVariable,
    Fatal,
}

#[must_use]
pub fn is_connection_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    CONNECTION_ERRORS.iter().any(|needle| lower.contains(needle))
}

fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_ascii_lowercase();
    if lower.contains("deadlock found when trying to get lock")
        || lower.contains("lock wait timeout exceeded")
        || lower.contains("database is locked")
    {
        ErrorClass::Retryable
    } else if lower.contains("unknown system variable") {
        ErrorClass::UnknownSystemVariable
    } else if is_connection_message(&lower) {
        ErrorClass::Connection
    } else {
        ErrorClass::Fatal
    }
}

#[must_use]
pub fn classify_sql(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ErrorClass::Connection,
        sqlx::Error::Database(db) => {
            if let Some(mysql) = db.try_downcast_ref::<MySqlDatabaseError>() {
                match mysql.number() {
                    ER_LOCK_WAIT_TIMEOUT | ER_LOCK_DEADLOCK => return ErrorClass::Retryable,
                    ER_UNKNOWN_SYSTEM_VARIABLE => return ErrorClass::UnknownSystemVariable,
                    _ => {}
                }
            }
            if db.code().as_deref() == Some("40001") {
                return ErrorClass::Retryable;
            }
            classify_message(db.message())
        }
        other => classify_message(&other.to_string()),
    }
}

#[must_use]
pub fn classify_redis(err: &redis::RedisError) -> ErrorClass {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
        ErrorClass::Connection
    } else {
        classify_message(&err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_messages() {
        assert!(is_connection_message("Error 2006: MySQL server has gone away"));
        assert!(is_connection_message("read tcp: connection reset by peer"));
        assert!(is_connection_message("Lost connection to MySQL server during query"));
        assert!(!is_connection_message("Duplicate entry 'x' for key 'PRIMARY'"));
    }

    #[test]
    fn test_message_classes() {
        assert_eq!(
            classify_message("Deadlock found when trying to get lock; try restarting transaction"),
            ErrorClass::Retryable
        );
        assert_eq!(classify_message("Unknown system variable 'wsrep_sync_wait'"), ErrorClass::UnknownSystemVariable);
        assert_eq!(classify_message("Table 'icingadb.host' doesn't exist"), ErrorClass::Fatal);
    }

    #[test]
    fn test_pool_errors_are_connection_class() {
        assert_eq!(classify_sql(&sqlx::Error::PoolTimedOut), ErrorClass::Connection);
        assert_eq!(classify_sql(&sqlx::Error::RowNotFound), ErrorClass::Fatal);
    }

    #[test]
    fn test_redis_io_error_is_connection_class() {
        let err = redis::RedisError::from(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(classify_redis(&err), ErrorClass::Connection);
    }
}
