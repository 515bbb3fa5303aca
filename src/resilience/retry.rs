// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Exponential backoff.
//!
//! Startup connects give up after a handful of attempts so a bad address
//! fails the process early. Transactions that hit a serialization failure
//! or deadlock are repeated without limit, since the competing transaction
//! always finishes.
//!
//! # Example
//!
//! ```
//! use icingadb::RetryConfig;
//!
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, Some(5));
//!
//! let mut backoff = RetryConfig::transaction().backoff();
//! let first = backoff.next().unwrap();
//! assert!(backoff.next().unwrap() > first);
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// `None` retries forever.
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::startup()
    }
}

impl RetryConfig {
    /// Initial connection: 5 attempts, about 5 seconds in total.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Serialization failures and deadlocks.
    #[must_use]
    pub fn transaction() -> Self {
        Self {
            max_retries: None,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            factor: 2.0,
        }
    }

    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.initial_delay,
            max: self.max_delay,
            factor: self.factor,
            remaining: self.max_retries,
        }
    }
}

/// Delays between attempts. Ends once `max_retries` is used up.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    factor: f64,
    remaining: Option<usize>,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if let Some(remaining) = self.remaining.as_mut() {
            // The first attempt is not a retry.
            if *remaining <= 1 {
                return None;
            }
            *remaining -= 1;
        }
        let delay = self.next;
        self.next = self.next.mul_f64(self.factor).min(self.max);
        Some(delay)
    }
}

/// Run `operation` until it succeeds or the backoff runs out.
pub async fn retry<F, Fut, T, E>(operation_name: &str, config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut backoff = config.backoff();
    let mut attempts = 1;
    loop {
        match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    info!(operation = operation_name, attempts, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(err) => {
                let Some(delay) = backoff.next() else {
                    return Err(err);
                };
                warn!(operation = operation_name, attempt = attempts, error = %err, next_in = ?delay, "Attempt failed");
                attempts += 1;
                sleep(delay).await;
            }
        }
    }
}
