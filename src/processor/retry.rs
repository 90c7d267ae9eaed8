// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Retry decisions after a read timeout

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Multiplier applied to the timeout when retrying
pub const DEFAULT_RETRY_MULTIPLIER: u32 = 2;

/// Decides whether a file whose request timed out gets another attempt
#[async_trait]
pub trait RetryDecider: Send + Sync {
    /// Return the timeout for a retry, or `None` to skip the file
    async fn retry_timeout(&self, file: &Path, timed_out_after: Duration) -> Option<Duration>;
}

/// Headless retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Skip files that time out
    #[default]
    Never,
    /// Retry once with the timeout multiplied
    Auto { multiplier: u32 },
}

impl RetryPolicy {
    pub fn auto() -> Self {
        Self::Auto {
            multiplier: DEFAULT_RETRY_MULTIPLIER,
        }
    }
}

/// `timed_out_after` scaled by `multiplier` (at least 1), saturating at `Duration::MAX`
pub fn extended_timeout(timed_out_after: Duration, multiplier: u32) -> Duration {
    timed_out_after
        .checked_mul(multiplier.max(1))
        .unwrap_or(Duration::MAX)
}

#[async_trait]
impl RetryDecider for RetryPolicy {
    async fn retry_timeout(&self, _file: &Path, timed_out_after: Duration) -> Option<Duration> {
        match *self {
            Self::Never => None,
            Self::Auto { multiplier } => Some(extended_timeout(timed_out_after, multiplier)),
        }
    }
}
