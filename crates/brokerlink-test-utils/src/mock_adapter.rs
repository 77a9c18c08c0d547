// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock broker adapter for deterministic testing.
//!
//! `MockAdapter` implements `BrokerAdapter` with queued outcomes. When a
//! queue is empty the call succeeds.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use brokerlink_core::{
    BrokerAdapter, BrokerCredential, BrokerKind, BrokerlinkError, Clock, ConnectionHealth,
    OrderAck, OrderRequest, QuotaLimits, SessionToken,
};
use secrecy::SecretString;
use tokio::sync::Mutex;

/// Outcome of one scripted call.
#[derive(Debug)]
pub enum MockStep {
    Succeed,
    Fail(BrokerlinkError),
    /// Never completes. Exercises the caller's timeout.
    Hang,
}

/// A broker adapter that plays back queued outcomes.
pub struct MockAdapter {
    kind: BrokerKind,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    limits: QuotaLimits,
    issue_refresh_token: bool,
    latency: Mutex<Duration>,
    logins: Mutex<VecDeque<MockStep>>,
    orders: Mutex<VecDeque<MockStep>>,
    health: Mutex<ConnectionHealth>,
    auth_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    probe_calls: AtomicUsize,
    order_calls: AtomicUsize,
}

impl MockAdapter {
    /// A mock that logs in and places orders successfully, with 8 h tokens.
    pub fn new(kind: BrokerKind, clock: Arc<dyn Clock>) -> Self {
        Self {
            kind,
            clock,
            ttl: chrono::Duration::hours(8),
            limits: QuotaLimits::default(),
            issue_refresh_token: false,
            latency: Mutex::new(Duration::ZERO),
            logins: Mutex::new(VecDeque::new()),
            orders: Mutex::new(VecDeque::new()),
            health: Mutex::new(ConnectionHealth::Healthy),
            auth_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            probe_calls: AtomicUsize::new(0),
            order_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_limits(mut self, limits: QuotaLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Issue refresh tokens, so re-authentication goes through `refresh`.
    pub fn with_refresh_tokens(mut self) -> Self {
        self.issue_refresh_token = true;
        self
    }

    /// Queue the outcome of the next unscripted login.
    pub async fn push_login(&self, step: MockStep) {
        self.logins.lock().await.push_back(step);
    }

    /// Queue the outcome of the next unscripted order.
    pub async fn push_order(&self, step: MockStep) {
        self.orders.lock().await.push_back(step);
    }

    /// What `test_connection` reports from now on.
    pub async fn set_health(&self, health: ConnectionHealth) {
        *self.health.lock().await = health;
    }

    /// Delay added to every login, to hold a handshake open.
    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.lock().await = latency;
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn order_calls(&self) -> usize {
        self.order_calls.load(Ordering::SeqCst)
    }

    fn issue(&self, tag: String) -> SessionToken {
        let now = self.clock.now();
        SessionToken {
            access_token: SecretString::from(format!("mock-access-{tag}")),
            refresh_token: self
                .issue_refresh_token
                .then(|| SecretString::from(format!("mock-refresh-{tag}"))),
            issued_at: now,
            expires_at: now + self.ttl,
        }
    }

    async fn play<T>(
        queue: &Mutex<VecDeque<MockStep>>,
        succeed: impl FnOnce() -> T,
    ) -> Result<T, BrokerlinkError> {
        let step = queue.lock().await.pop_front().unwrap_or(MockStep::Succeed);
        match step {
            MockStep::Succeed => Ok(succeed()),
            MockStep::Fail(e) => Err(e),
            MockStep::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl BrokerAdapter for MockAdapter {
    fn name(&self) -> &str {
        "mock-broker"
    }

    fn kind(&self) -> BrokerKind {
        self.kind
    }

    async fn authenticate(
        &self,
        _credential: &BrokerCredential,
    ) -> Result<SessionToken, BrokerlinkError> {
        let n = self.auth_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let latency = *self.latency.lock().await;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Self::play(&self.logins, || self.issue(n.to_string())).await
    }

    async fn refresh(
        &self,
        _credential: &BrokerCredential,
        _token: &SessionToken,
    ) -> Result<SessionToken, BrokerlinkError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self.issue(format!("refreshed-{n}")))
    }

    async fn test_connection(
        &self,
        _credential: &BrokerCredential,
        _token: &SessionToken,
    ) -> ConnectionHealth {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        *self.health.lock().await
    }

    async fn place_order(
        &self,
        _credential: &BrokerCredential,
        _token: &SessionToken,
        _order: &OrderRequest,
    ) -> Result<OrderAck, BrokerlinkError> {
        let n = self.order_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Self::play(&self.orders, || OrderAck {
            broker: self.kind,
            order_id: format!("mock-order-{n}"),
            placed_at: self.clock.now(),
        })
        .await
    }

    fn quota_limits(&self) -> QuotaLimits {
        self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brokerlink_core::{BrokerFields, SystemClock, UserId};

    fn credential() -> BrokerCredential {
        BrokerCredential {
            user_id: UserId::parse("alice").unwrap(),
            fields: BrokerFields::parse(BrokerKind::Upstox, crate::sample_fields(BrokerKind::Upstox))
                .unwrap(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn unscripted_login_succeeds() {
        let mock = MockAdapter::new(BrokerKind::Upstox, Arc::new(SystemClock));
        let token = mock.authenticate(&credential()).await.unwrap();
        assert!(token.expires_at > token.issued_at);
        assert!(token.refresh_token.is_none());
        assert_eq!(mock.auth_calls(), 1);
    }

    #[tokio::test]
    async fn scripted_outcomes_play_in_order() {
        let mock = MockAdapter::new(BrokerKind::Upstox, Arc::new(SystemClock));
        mock.push_login(MockStep::Fail(BrokerlinkError::Unreachable {
            broker: BrokerKind::Upstox,
            message: "down".into(),
        }))
        .await;
        assert_eq!(
            mock.authenticate(&credential()).await.unwrap_err().kind(),
            "unreachable"
        );
        assert!(mock.authenticate(&credential()).await.is_ok());
        assert_eq!(mock.auth_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hang_never_resolves() {
        let mock = MockAdapter::new(BrokerKind::Upstox, Arc::new(SystemClock));
        mock.push_login(MockStep::Hang).await;
        let credential = credential();
        let outcome =
            tokio::time::timeout(Duration::from_secs(30), mock.authenticate(&credential)).await;
        assert!(outcome.is_err());
    }
}
