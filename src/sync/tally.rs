// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Counting coordinator for in-flight ids.

use tokio::sync::watch;

/// Tracks how many ids are still travelling through a pipeline.
///
/// Stages `add` before handing ids downstream and `done` once the ids are
/// written or dropped. `wait` resolves when the count reaches zero;
/// `reset` discards everything when the pipeline is torn down.
#[derive(Debug)]
pub struct Tally {
    pending: watch::Sender<usize>,
}

impl Default for Tally {
    fn default() -> Self {
        Self::new()
    }
}

impl Tally {
    #[must_use]
    pub fn new() -> Self {
        let (pending, _) = watch::channel(0);
        Self { pending }
    }

    pub fn add(&self, n: usize) {
        if n > 0 {
            self.pending.send_modify(|p| *p += n);
        }
    }

    pub fn done(&self, n: usize) {
        if n > 0 {
            self.pending.send_modify(|p| *p = p.saturating_sub(n));
        }
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    pub fn reset(&self) {
        self.pending.send_replace(0);
    }

    /// Resolve once nothing is pending.
    pub async fn wait(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives in self, so the channel cannot close here.
        let _ = rx.wait_for(|p| *p == 0).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_on_empty_returns() {
        Tally::new().wait().await;
    }

    #[tokio::test]
    async fn test_wait_until_done() {
        let tally = Arc::new(Tally::new());
        tally.add(3);
        let waiter = {
            let tally = Arc::clone(&tally);
            tokio::spawn(async move { tally.wait().await })
        };
        tally.done(2);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        tally.done(1);
        waiter.await.unwrap();
    }

    #[test]
    fn test_done_saturates_and_reset_clears() {
        let tally = Tally::new();
        tally.add(2);
        tally.done(5);
        assert_eq!(tally.pending(), 0);
        tally.add(4);
        tally.reset();
        assert_eq!(tally.pending(), 0);
    }
}
