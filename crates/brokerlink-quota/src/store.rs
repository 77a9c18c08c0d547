// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Counter storage behind the quota tracker.
//!
//! The tracker serializes access per (user, broker), so stores only need
//! plain load/save/delete. [`InMemoryQuotaStore`] is for tests and
//! ephemeral deployments; [`SqliteQuotaStore`] keeps counters across
//! restarts so a restart cannot be used to reset a daily order limit.

use async_trait::async_trait;
use brokerlink_core::{BrokerKind, BrokerlinkError, UserId};
use brokerlink_storage::queries::quota;
use brokerlink_storage::{Database, QuotaRow, format_ts, parse_ts};
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Counter state for one (user, broker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaCounter {
    pub api_calls_used: u32,
    /// Start of the current API-call window.
    pub window_start: DateTime<Utc>,
    pub orders_used: u32,
    /// Market-local day the order counter belongs to.
    pub orders_day: NaiveDate,
}

impl QuotaCounter {
    /// A zeroed counter whose window opens at `now`.
    pub fn fresh(now: DateTime<Utc>, today: NaiveDate) -> Self {
        Self {
            api_calls_used: 0,
            window_start: now,
            orders_used: 0,
            orders_day: today,
        }
    }
}

/// Persistence for quota counters.
#[async_trait]
pub trait QuotaStore: Send + Sync + 'static {
    async fn load(
        &self,
        user: &UserId,
        broker: BrokerKind,
    ) -> Result<Option<QuotaCounter>, BrokerlinkError>;

    async fn save(
        &self,
        user: &UserId,
        broker: BrokerKind,
        counter: &QuotaCounter,
    ) -> Result<(), BrokerlinkError>;

    async fn delete(&self, user: &UserId, broker: BrokerKind) -> Result<(), BrokerlinkError>;
}

/// Process-local counters.
#[derive(Debug, Default)]
pub struct InMemoryQuotaStore {
    counters: DashMap<(UserId, BrokerKind), QuotaCounter>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn load(
        &self,
        user: &UserId,
        broker: BrokerKind,
    ) -> Result<Option<QuotaCounter>, BrokerlinkError> {
        Ok(self
            .counters
            .get(&(user.clone(), broker))
            .map(|c| c.value().clone()))
    }

    async fn save(
        &self,
        user: &UserId,
        broker: BrokerKind,
        counter: &QuotaCounter,
    ) -> Result<(), BrokerlinkError> {
        self.counters.insert((user.clone(), broker), counter.clone());
        Ok(())
    }

    async fn delete(&self, user: &UserId, broker: BrokerKind) -> Result<(), BrokerlinkError> {
        self.counters.remove(&(user.clone(), broker));
        Ok(())
    }
}

/// Counters in the `quota_counters` table.
#[derive(Clone)]
pub struct SqliteQuotaStore {
    db: Database,
}

impl SqliteQuotaStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn from_row(row: QuotaRow) -> Result<QuotaCounter, BrokerlinkError> {
    let window_start = parse_ts(&row.window_start).ok_or_else(|| {
        BrokerlinkError::Storage(format!("bad quota window_start `{}`", row.window_start))
    })?;
    let orders_day = NaiveDate::parse_from_str(&row.orders_day, DAY_FORMAT).map_err(|e| {
        BrokerlinkError::Storage(format!("bad quota orders_day `{}`: {e}", row.orders_day))
    })?;
    Ok(QuotaCounter {
        api_calls_used: row.api_calls_used,
        window_start,
        orders_used: row.orders_used,
        orders_day,
    })
}

#[async_trait]
impl QuotaStore for SqliteQuotaStore {
    async fn load(
        &self,
        user: &UserId,
        broker: BrokerKind,
    ) -> Result<Option<QuotaCounter>, BrokerlinkError> {
        quota::load(&self.db, user.as_str(), &broker.to_string())
            .await?
            .map(from_row)
            .transpose()
    }

    async fn save(
        &self,
        user: &UserId,
        broker: BrokerKind,
        counter: &QuotaCounter,
    ) -> Result<(), BrokerlinkError> {
        let row = QuotaRow {
            user_id: user.as_str().to_string(),
            broker: broker.to_string(),
            api_calls_used: counter.api_calls_used,
            window_start: format_ts(counter.window_start),
            orders_used: counter.orders_used,
            orders_day: counter.orders_day.format(DAY_FORMAT).to_string(),
        };
        quota::save(&self.db, row).await
    }

    async fn delete(&self, user: &UserId, broker: BrokerKind) -> Result<(), BrokerlinkError> {
        quota::delete(&self.db, user.as_str(), &broker.to_string()).await
    }
}
