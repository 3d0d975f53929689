//! Engine tuning shared by the loader, the cleanup engine and the
//! orchestrator.
//!
//! Values are normally read from the `[sync]` section of `strata.toml`
//! (see `strata-sync`), falling back to the defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded exponential backoff for transient store failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Retry immediately, without sleeping. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1 = first retry).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Batch loader settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSettings {
    /// Records per transaction.
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl LoadSettings {
    pub fn chunk_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Cleanup engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupSettings {
    /// Maximum deletions per transaction.
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl CleanupSettings {
    pub fn chunk_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            retry: RetryPolicy::default(),
        }
    }
}

pub fn default_batch_size() -> usize {
    1000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(RetryPolicy::immediate(0).attempts(), 1);
        assert_eq!(LoadSettings::default().batch_size, 1000);
        assert_eq!(
            CleanupSettings {
                batch_size: 0,
                retry: RetryPolicy::default()
            }
            .chunk_size(),
            1
        );
    }
}
