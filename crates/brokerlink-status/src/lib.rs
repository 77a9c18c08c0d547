// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-user broker status for the settings UI.
//!
//! Status is recomputed on every query from the vault, the session manager
//! and the quota tracker; nothing here is cached. Queries never change
//! session state.

use std::sync::Arc;

use brokerlink_core::{BrokerKind, BrokerlinkError, Clock, SessionState, UserId};
use brokerlink_quota::QuotaTracker;
use brokerlink_session::{SessionEvent, SessionManager};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// One row of the status table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerStatus {
    pub broker: BrokerKind,
    /// A credential is stored for this broker.
    pub configured: bool,
    /// The broker is enabled in this deployment.
    pub enabled: bool,
    pub connection_state: SessionState,
    pub api_calls_used: u32,
    pub api_calls_limit: u32,
    pub orders_used: u32,
    pub orders_limit: u32,
    pub window_resets_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Read-only view over the session manager and quota tracker.
#[derive(Clone)]
pub struct StatusAggregator {
    manager: SessionManager,
    quota: Arc<QuotaTracker>,
}

impl StatusAggregator {
    pub fn new(manager: SessionManager) -> Self {
        let quota = manager.quota().clone();
        Self { manager, quota }
    }

    /// Status of every supported broker for `user`, in display order.
    pub async fn get_status(&self, user: &UserId) -> Result<Vec<BrokerStatus>, BrokerlinkError> {
        let configured = self.manager.vault().list_brokers(user).await?;
        let enabled = self.manager.enabled_brokers();

        let now = self.manager.clock().now();

        let mut rows = Vec::with_capacity(BrokerKind::ALL.len());
        for broker in BrokerKind::ALL {
            let session = self.manager.snapshot(user, broker);
            let quota = self.quota.snapshot(user, broker).await?;
            rows.push(BrokerStatus {
                broker,
                configured: configured.contains(&broker),
                enabled: enabled.contains(&broker),
                connection_state: effective_state(session.state, session.expires_at, now),
                api_calls_used: quota.api_calls_used,
                api_calls_limit: quota.api_calls_limit,
                orders_used: quota.orders_used,
                orders_limit: quota.orders_limit,
                window_resets_at: quota.window_resets_at,
                expires_at: session.expires_at,
                last_refreshed_at: session.last_refreshed_at,
                last_error: session.last_error,
            });
        }
        debug!(user_id = %user, brokers = rows.len(), "status computed");
        Ok(rows)
    }

    /// Session state changes as they happen, for every user.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.manager.subscribe()
    }
}

/// A connected session whose token has run out reads as expired. The
/// manager itself is left untouched; its sweeper owns the transition.
fn effective_state(
    state: SessionState,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> SessionState {
    match state {
        SessionState::Connected if expires_at.is_some_and(|at| now >= at) => SessionState::Expired,
        other => other,
    }
}
