// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-(user, broker) API-call and order quota accounting.
//!
//! The API-call counter is a fixed window that opens at the first call and
//! resets once `api_window` has elapsed. The order counter resets when the
//! market-local calendar day changes. Load, rollover, check, increment and
//! save happen under one per-key async lock, so concurrent consumers at the
//! boundary can never overshoot the limit.

use std::collections::HashMap;
use std::sync::Arc;

use brokerlink_config::QuotaConfig;
use brokerlink_core::{BrokerKind, BrokerlinkError, Clock, QuotaKind, QuotaLimits, UserId};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::store::{QuotaCounter, QuotaStore};

/// Result of a consume attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Allowed,
    QuotaExceeded { kind: QuotaKind, limit: u32 },
}

impl ConsumeOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ConsumeOutcome::Allowed)
    }

    /// Convert into the error taxonomy.
    pub fn into_result(self, broker: BrokerKind) -> Result<(), BrokerlinkError> {
        match self {
            ConsumeOutcome::Allowed => Ok(()),
            ConsumeOutcome::QuotaExceeded { kind, limit } => {
                Err(BrokerlinkError::QuotaExceeded { broker, kind, limit })
            }
        }
    }
}

/// Read-only view of one counter with rollover applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    pub broker: BrokerKind,
    pub api_calls_used: u32,
    pub api_calls_limit: u32,
    /// When the current API-call window closes, if one is open.
    pub window_resets_at: Option<DateTime<Utc>>,
    pub orders_used: u32,
    pub orders_limit: u32,
}

/// Quota tracker with an injected clock and counter store.
pub struct QuotaTracker {
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
    limits: HashMap<BrokerKind, QuotaLimits>,
    market_offset: FixedOffset,
    locks: DashMap<(UserId, BrokerKind), Arc<Mutex<()>>>,
}

impl QuotaTracker {
    /// Build a tracker. Brokers missing from `limits` use the documented defaults.
    pub fn new(
        store: Arc<dyn QuotaStore>,
        clock: Arc<dyn Clock>,
        limits: HashMap<BrokerKind, QuotaLimits>,
        reset_utc_offset_minutes: i32,
    ) -> Result<Self, BrokerlinkError> {
        let market_offset = FixedOffset::east_opt(reset_utc_offset_minutes * 60).ok_or_else(|| {
            BrokerlinkError::Config(format!(
                "quota reset offset {reset_utc_offset_minutes} minutes is out of range"
            ))
        })?;
        Ok(Self {
            store,
            clock,
            limits,
            market_offset,
            locks: DashMap::new(),
        })
    }

    /// Build a tracker whose limits come from the `[quota]` section alone.
    pub fn from_config(
        config: &QuotaConfig,
        store: Arc<dyn QuotaStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BrokerlinkError> {
        let limits = BrokerKind::ALL
            .into_iter()
            .map(|kind| (kind, config.limits_for(kind, QuotaLimits::default())))
            .collect();
        Self::new(store, clock, limits, config.reset_utc_offset_minutes)
    }

    pub fn limits_for(&self, broker: BrokerKind) -> QuotaLimits {
        self.limits.get(&broker).copied().unwrap_or_default()
    }

    fn market_day(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.market_offset).date_naive()
    }

    fn lock_for(&self, user: &UserId, broker: BrokerKind) -> Arc<Mutex<()>> {
        self.locks
            .entry((user.clone(), broker))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Apply window and day rollover to a stored counter (or start a new one).
    fn rolled(
        &self,
        counter: Option<QuotaCounter>,
        limits: QuotaLimits,
        now: DateTime<Utc>,
    ) -> QuotaCounter {
        let today = self.market_day(now);
        let Some(mut counter) = counter else {
            return QuotaCounter::fresh(now, today);
        };
        let window_end = chrono::Duration::from_std(limits.api_window)
            .ok()
            .and_then(|w| counter.window_start.checked_add_signed(w));
        if window_end.is_some_and(|end| now >= end) {
            counter.api_calls_used = 0;
            counter.window_start = now;
        }
        if counter.orders_day != today {
            counter.orders_used = 0;
            counter.orders_day = today;
        }
        counter
    }

    /// Consume one unit of `kind`.
    pub async fn try_consume(
        &self,
        user: &UserId,
        broker: BrokerKind,
        kind: QuotaKind,
    ) -> Result<ConsumeOutcome, BrokerlinkError> {
        self.try_consume_all(user, broker, &[kind]).await
    }

    /// Consume one unit of every kind in `kinds`, or nothing at all.
    pub async fn try_consume_all(
        &self,
        user: &UserId,
        broker: BrokerKind,
        kinds: &[QuotaKind],
    ) -> Result<ConsumeOutcome, BrokerlinkError> {
        if kinds.is_empty() {
            return Ok(ConsumeOutcome::Allowed);
        }
        let limits = self.limits_for(broker);
        let api_need = kinds.iter().filter(|k| **k == QuotaKind::ApiCall).count() as u32;
        let order_need = kinds.iter().filter(|k| **k == QuotaKind::Order).count() as u32;

        let lock = self.lock_for(user, broker);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let mut counter = self.rolled(self.store.load(user, broker).await?, limits, now);

        let rejected = if api_need > 0
            && counter.api_calls_used.saturating_add(api_need) > limits.api_calls_limit
        {
            Some((QuotaKind::ApiCall, limits.api_calls_limit))
        } else if order_need > 0
            && counter.orders_used.saturating_add(order_need) > limits.orders_limit
        {
            Some((QuotaKind::Order, limits.orders_limit))
        } else {
            None
        };

        if let Some((kind, limit)) = rejected {
            warn!(user_id = %user, broker = %broker, kind = %kind, limit, "quota exhausted");
            brokerlink_prometheus::record_quota_rejection(broker, kind);
            // Persist the rollover so snapshots agree with what was enforced.
            self.store.save(user, broker, &counter).await?;
            return Ok(ConsumeOutcome::QuotaExceeded { kind, limit });
        }

        counter.api_calls_used += api_need;
        counter.orders_used += order_need;
        self.store.save(user, broker, &counter).await?;
        debug!(
            user_id = %user,
            broker = %broker,
            api_calls_used = counter.api_calls_used,
            orders_used = counter.orders_used,
            "quota consumed"
        );
        Ok(ConsumeOutcome::Allowed)
    }

    /// Current usage without consuming anything.
    pub async fn snapshot(
        &self,
        user: &UserId,
        broker: BrokerKind,
    ) -> Result<QuotaSnapshot, BrokerlinkError> {
        let limits = self.limits_for(broker);
        let now = self.clock.now();
        let stored = self.store.load(user, broker).await?;
        let window_open = stored.is_some();
        let counter = self.rolled(stored, limits, now);
        let window_resets_at = if window_open && counter.api_calls_used > 0 {
            chrono::Duration::from_std(limits.api_window)
                .ok()
                .map(|w| counter.window_start + w)
        } else {
            None
        };
        Ok(QuotaSnapshot {
            broker,
            api_calls_used: counter.api_calls_used,
            api_calls_limit: limits.api_calls_limit,
            window_resets_at,
            orders_used: counter.orders_used,
            orders_limit: limits.orders_limit,
        })
    }

    /// Drop the counters for one (user, broker).
    pub async fn reset(&self, user: &UserId, broker: BrokerKind) -> Result<(), BrokerlinkError> {
        let lock = self.lock_for(user, broker);
        let _guard = lock.lock().await;
        self.store.delete(user, broker).await?;
        debug!(user_id = %user, broker = %broker, "quota counters reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryQuotaStore;
    use brokerlink_core::ManualClock;
    use chrono::TimeZone;
    use std::time::Duration;

    fn start() -> DateTime<Utc> {
        // 09:15 IST.
        Utc.with_ymd_and_hms(2026, 3, 2, 3, 45, 0).unwrap()
    }

    fn tracker(limits: QuotaLimits) -> (Arc<QuotaTracker>, ManualClock, Arc<InMemoryQuotaStore>) {
        let clock = ManualClock::new(start());
        let store = Arc::new(InMemoryQuotaStore::new());
        let tracker = QuotaTracker::new(
            store.clone(),
            Arc::new(clock.clone()),
            HashMap::from([(BrokerKind::Zerodha, limits)]),
            330,
        )
        .unwrap();
        (Arc::new(tracker), clock, store)
    }

    fn small() -> QuotaLimits {
        QuotaLimits {
            api_calls_limit: 3,
            api_window: Duration::from_secs(60),
            orders_limit: 2,
        }
    }

    fn alice() -> UserId {
        UserId::parse("alice").unwrap()
    }

    #[tokio::test]
    async fn rejects_call_past_limit() {
        let (tracker, _, _) = tracker(small());
        for _ in 0..3 {
            let outcome = tracker
                .try_consume(&alice(), BrokerKind::Zerodha, QuotaKind::ApiCall)
                .await
                .unwrap();
            assert!(outcome.is_allowed());
        }
        let outcome = tracker
            .try_consume(&alice(), BrokerKind::Zerodha, QuotaKind::ApiCall)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ConsumeOutcome::QuotaExceeded {
                kind: QuotaKind::ApiCall,
                limit: 3
            }
        );
        let err = outcome.into_result(BrokerKind::Zerodha).unwrap_err();
        assert_eq!(err.kind(), "quota_exceeded");
    }

    #[tokio::test]
    async fn window_elapses_and_resets() {
        let (tracker, clock, _) = tracker(small());
        for _ in 0..3 {
            tracker
                .try_consume(&alice(), BrokerKind::Zerodha, QuotaKind::ApiCall)
                .await
                .unwrap();
        }
        clock.advance(chrono::Duration::seconds(59));
        assert!(
            !tracker
                .try_consume(&alice(), BrokerKind::Zerodha, QuotaKind::ApiCall)
                .await
                .unwrap()
                .is_allowed()
        );
        clock.advance(chrono::Duration::seconds(1));
        assert!(
            tracker
                .try_consume(&alice(), BrokerKind::Zerodha, QuotaKind::ApiCall)
                .await
                .unwrap()
                .is_allowed()
        );
        let snap = tracker.snapshot(&alice(), BrokerKind::Zerodha).await.unwrap();
        assert_eq!(snap.api_calls_used, 1);
        assert_eq!(
            snap.window_resets_at,
            Some(start() + chrono::Duration::seconds(120))
        );
    }

    #[tokio::test]
    async fn orders_reset_at_market_midnight() {
        let (tracker, clock, _) = tracker(small());
        let both = [QuotaKind::ApiCall, QuotaKind::Order];
        for _ in 0..2 {
            tracker
                .try_consume_all(&alice(), BrokerKind::Zerodha, &both)
                .await
                .unwrap();
        }
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(
            tracker
                .try_consume_all(&alice(), BrokerKind::Zerodha, &both)
                .await
                .unwrap(),
            ConsumeOutcome::QuotaExceeded {
                kind: QuotaKind::Order,
                limit: 2
            }
        );

        // 23:59 IST is still the same trading day.
        clock.set(Utc.with_ymd_and_hms(2026, 3, 2, 18, 29, 0).unwrap());
        assert!(
            !tracker
                .try_consume(&alice(), BrokerKind::Zerodha, QuotaKind::Order)
                .await
                .unwrap()
                .is_allowed()
        );
        // 00:00 IST on the next day.
        clock.set(Utc.with_ymd_and_hms(2026, 3, 2, 18, 30, 0).unwrap());
        assert!(
            tracker
                .try_consume(&alice(), BrokerKind::Zerodha, QuotaKind::Order)
                .await
                .unwrap()
                .is_allowed()
        );
    }

    #[tokio::test]
    async fn consume_all_is_all_or_nothing() {
        let limits = QuotaLimits {
            api_calls_limit: 10,
            api_window: Duration::from_secs(60),
            orders_limit: 1,
        };
        let (tracker, _, _) = tracker(limits);
        let both = [QuotaKind::ApiCall, QuotaKind::Order];
        assert!(
            tracker
                .try_consume_all(&alice(), BrokerKind::Zerodha, &both)
                .await
                .unwrap()
                .is_allowed()
        );
        assert!(
            !tracker
                .try_consume_all(&alice(), BrokerKind::Zerodha, &both)
                .await
                .unwrap()
                .is_allowed()
        );
        let snap = tracker.snapshot(&alice(), BrokerKind::Zerodha).await.unwrap();
        assert_eq!(snap.api_calls_used, 1, "rejected call must not consume an api unit");
        assert_eq!(snap.orders_used, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumers_never_overshoot() {
        let limits = QuotaLimits {
            api_calls_limit: 10,
            api_window: Duration::from_secs(60),
            orders_limit: 50,
        };
        let (tracker, _, store) = tracker(limits);
        store
            .save(
                &alice(),
                BrokerKind::Zerodha,
                &QuotaCounter {
                    api_calls_used: 7,
                    window_start: start(),
                    orders_used: 0,
                    orders_day: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                },
            )
            .await
            .unwrap();

        let attempts = (0..25).map(|_| {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tracker
                    .try_consume(&alice(), BrokerKind::Zerodha, QuotaKind::ApiCall)
                    .await
                    .unwrap()
            })
        });
        let outcomes = futures::future::join_all(attempts).await;
        let allowed = outcomes
            .into_iter()
            .filter(|o| o.as_ref().unwrap().is_allowed())
            .count();
        assert_eq!(allowed, 3);
    }

    #[tokio::test]
    async fn unknown_broker_uses_documented_defaults_and_reset_clears() {
        let (tracker, _, _) = tracker(small());
        assert_eq!(tracker.limits_for(BrokerKind::Angel), QuotaLimits::default());
        tracker
            .try_consume(&alice(), BrokerKind::Angel, QuotaKind::ApiCall)
            .await
            .unwrap();
        tracker.reset(&alice(), BrokerKind::Angel).await.unwrap();
        let snap = tracker.snapshot(&alice(), BrokerKind::Angel).await.unwrap();
        assert_eq!(snap.api_calls_used, 0);
        assert_eq!(snap.api_calls_limit, 200);
        assert!(snap.window_resets_at.is_none());
    }

    #[test]
    fn config_overrides_apply_per_broker() {
        let mut config = QuotaConfig::default();
        config.api_calls_limit = Some(100);
        config.upstox.api_calls_limit = Some(25);
        let tracker = QuotaTracker::from_config(
            &config,
            Arc::new(InMemoryQuotaStore::new()),
            Arc::new(ManualClock::new(start())),
        )
        .unwrap();
        assert_eq!(tracker.limits_for(BrokerKind::Upstox).api_calls_limit, 25);
        assert_eq!(tracker.limits_for(BrokerKind::Zerodha).api_calls_limit, 100);
        assert_eq!(tracker.limits_for(BrokerKind::Angel).orders_limit, 50);
    }
}
