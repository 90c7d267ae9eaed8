// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Cooperative cancellation for batch runs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared stop flag; the shell sets it, the batch loop polls it
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the running batch stop at its next checkpoint
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is observed, polling every `tick`
    pub async fn cancelled(&self, tick: Duration) {
        let tick = tick.max(Duration::from_millis(1));
        while !self.is_cancelled() {
            tokio::time::sleep(tick).await;
        }
    }

    /// Sleep for `total`, checking for cancellation at least every `tick`
    ///
    /// Returns `false` if cancellation cut the sleep short.
    pub async fn sleep(&self, total: Duration, tick: Duration) -> bool {
        let tick = tick.max(Duration::from_millis(1));
        // No representable deadline: wait until cancelled.
        let deadline = Instant::now().checked_add(total);

        loop {
            if self.is_cancelled() {
                return false;
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    tick.min(deadline - now)
                }
                None => tick,
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let shell_side = token.clone();
        assert!(!token.is_cancelled());
        shell_side.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_sleep_completes_when_not_cancelled() {
        let token = CancelToken::new();
        assert!(token.sleep(Duration::from_millis(20), Duration::from_millis(5)).await);
        assert!(token.sleep(Duration::ZERO, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_sleep_is_interrupted_within_one_tick() {
        let token = CancelToken::new();
        let remote = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            remote.cancel();
        });

        let started = Instant::now();
        let finished = token.sleep(Duration::from_secs(30), Duration::from_millis(10)).await;
        assert!(!finished);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unbounded_sleep_waits_for_cancel() {
        let token = CancelToken::new();
        let remote = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            remote.cancel();
        });

        let finished = token.sleep(Duration::MAX, Duration::from_millis(10)).await;
        assert!(!finished);
    }

    #[tokio::test]
    async fn test_already_cancelled_sleep_returns_immediately() {
        let token = CancelToken::new();
        token.cancel();
        assert!(!token.sleep(Duration::from_secs(60), Duration::from_secs(1)).await);
        token.cancelled(Duration::from_secs(1)).await;
    }
}
