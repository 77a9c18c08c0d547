// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Login retry policy and per-call timeouts.

use std::future::Future;
use std::time::Duration;

use brokerlink_config::SessionConfig;
use brokerlink_core::{BrokerKind, BrokerlinkError};

/// Exponential backoff for transient login failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_millis(500),
            max: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base: config.backoff_base(),
            max: config.backoff_max(),
        }
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.max, |d| d.min(self.max))
    }
}

/// Run one adapter call under `limit`. Elapsing maps to `Unreachable`.
pub async fn with_timeout<T, F>(
    broker: BrokerKind,
    limit: Duration,
    call: F,
) -> Result<T, BrokerlinkError>
where
    F: Future<Output = Result<T, BrokerlinkError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| BrokerlinkError::Unreachable {
            broker,
            message: format!("no response within {}s", limit.as_secs_f64()),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=6)
            .map(|n| policy.delay_after(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 8000]);
    }

    #[test]
    fn huge_attempt_numbers_stay_at_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(u32::MAX), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_maps_to_unreachable() {
        let err = with_timeout(BrokerKind::Upstox, Duration::from_secs(10), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, BrokerlinkError>(())
        })
        .await
        .unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("no response within 10s"));
    }
}
