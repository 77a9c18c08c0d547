// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The session manager.
//!
//! One session per (user, broker):
//!
//! ```text
//! Disconnected --login ok--> Connected --token expiry--> Expired
//!      ^                        |  \--adapter error--> Failed
//!      +------- logout ---------+
//! Failed/Expired --login (with backoff)--> Connecting --ok--> Connected
//! ```
//!
//! Logins and re-authentications are single-flight: concurrent callers for
//! the same key await one shared attempt. Every adapter call first takes an
//! API-call unit from the quota tracker and runs under the configured
//! timeout. Transient failures on a live session (a probe or an order that
//! times out or hits a 5xx) are recorded in `last_error` and leave the
//! session connected.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use brokerlink_config::SessionConfig;
use brokerlink_core::{
    BrokerAdapter, BrokerFields, BrokerKind, BrokerlinkError, Clock, ConnectionHealth, OrderAck,
    OrderRequest, QuotaKind, SessionState, SessionToken, TradingPreference, UserId,
};
use brokerlink_quota::QuotaTracker;
use brokerlink_storage::format_ts;
use brokerlink_storage::queries::sessions;
use brokerlink_vault::CredentialVault;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use secrecy::ExposeSecret;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::preferences::PreferenceStore;
use crate::retry::{RetryPolicy, with_timeout};
use crate::token::{open_token, seal_token};

type Key = (UserId, BrokerKind);
type PendingLogin = Shared<BoxFuture<'static, Result<SessionSnapshot, BrokerlinkError>>>;

const EVENT_CAPACITY: usize = 256;
const REFRESH_QUEUE: usize = 256;

/// Read-only view of one session. Never carries token material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub user_id: UserId,
    pub broker: BrokerKind,
    pub state: SessionState,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    fn disconnected(user: &UserId, broker: BrokerKind) -> Self {
        Self {
            user_id: user.clone(),
            broker,
            state: SessionState::Disconnected,
            expires_at: None,
            last_refreshed_at: None,
            last_error: None,
        }
    }
}

/// Published on every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEvent {
    pub user_id: UserId,
    pub broker: BrokerKind,
    pub state: SessionState,
    pub at: DateTime<Utc>,
}

/// A queued re-authentication for the background refresh worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshJob {
    pub user_id: UserId,
    pub broker: BrokerKind,
}

struct SessionEntry {
    state: SessionState,
    token: Option<Arc<SessionToken>>,
    last_refreshed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

struct Inner {
    adapters: HashMap<BrokerKind, Arc<dyn BrokerAdapter>>,
    vault: Arc<CredentialVault>,
    quota: Arc<QuotaTracker>,
    prefs: PreferenceStore,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    call_timeout: Duration,
    sweep_interval: Duration,
    sessions: DashMap<Key, SessionEntry>,
    pending: DashMap<Key, PendingLogin>,
    /// Bumped whenever a session is torn down, so a login that started
    /// before the teardown cannot install its result afterwards.
    epochs: DashMap<Key, u64>,
    order_locks: DashMap<Key, Arc<Mutex<()>>>,
    events: broadcast::Sender<SessionEvent>,
    refresh_tx: mpsc::Sender<RefreshJob>,
    refresh_rx: std::sync::Mutex<Option<mpsc::Receiver<RefreshJob>>>,
}

/// Owns every broker session. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("brokers", &self.enabled_brokers())
            .field("sessions", &self.inner.sessions.len())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(
        adapters: Vec<Arc<dyn BrokerAdapter>>,
        vault: Arc<CredentialVault>,
        quota: Arc<QuotaTracker>,
        clock: Arc<dyn Clock>,
        config: &SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (refresh_tx, refresh_rx) = mpsc::channel(REFRESH_QUEUE);
        let prefs = PreferenceStore::new(vault.database().clone());
        Self {
            inner: Arc::new(Inner {
                adapters: adapters.into_iter().map(|a| (a.kind(), a)).collect(),
                vault,
                quota,
                prefs,
                clock,
                retry: RetryPolicy::from_config(config),
                call_timeout: config.call_timeout(),
                sweep_interval: config.expiry_sweep(),
                sessions: DashMap::new(),
                pending: DashMap::new(),
                epochs: DashMap::new(),
                order_locks: DashMap::new(),
                events,
                refresh_tx,
                refresh_rx: std::sync::Mutex::new(Some(refresh_rx)),
            }),
        }
    }

    /// Brokers with an adapter, in display order.
    pub fn enabled_brokers(&self) -> Vec<BrokerKind> {
        BrokerKind::ALL
            .into_iter()
            .filter(|b| self.inner.adapters.contains_key(b))
            .collect()
    }

    pub fn vault(&self) -> &Arc<CredentialVault> {
        &self.inner.vault
    }

    pub fn quota(&self) -> &Arc<QuotaTracker> {
        &self.inner.quota
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub(crate) fn sweep_interval(&self) -> Duration {
        self.inner.sweep_interval
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Hand the refresh queue to the worker. Only the first call gets it.
    pub(crate) fn take_refresh_queue(&self) -> Option<mpsc::Receiver<RefreshJob>> {
        self.inner
            .refresh_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    fn adapter(&self, broker: BrokerKind) -> Result<Arc<dyn BrokerAdapter>, BrokerlinkError> {
        self.inner
            .adapters
            .get(&broker)
            .cloned()
            .ok_or_else(|| BrokerlinkError::Validation(format!("{broker} is not enabled")))
    }

    // --- state bookkeeping -------------------------------------------------

    fn epoch(&self, user: &UserId, broker: BrokerKind) -> u64 {
        self.inner
            .epochs
            .get(&(user.clone(), broker))
            .map(|e| *e)
            .unwrap_or(0)
    }

    fn emit(&self, user: &UserId, broker: BrokerKind, state: SessionState) {
        // No subscribers is fine.
        let _ = self.inner.events.send(SessionEvent {
            user_id: user.clone(),
            broker,
            state,
            at: self.inner.clock.now(),
        });
    }

    fn publish_gauge(&self) {
        let connected = self
            .inner
            .sessions
            .iter()
            .filter(|e| e.state == SessionState::Connected)
            .count();
        brokerlink_prometheus::set_connected_sessions(connected);
    }

    fn set_state(
        &self,
        user: &UserId,
        broker: BrokerKind,
        state: SessionState,
        last_error: Option<String>,
    ) {
        let changed = {
            let mut entry = self
                .inner
                .sessions
                .entry((user.clone(), broker))
                .or_insert_with(|| SessionEntry {
                    state: SessionState::Disconnected,
                    token: None,
                    last_refreshed_at: None,
                    last_error: None,
                });
            let changed = entry.state != state;
            entry.state = state;
            if last_error.is_some() || state == SessionState::Connected {
                entry.last_error = last_error;
            }
            changed
        };
        if changed {
            debug!(user_id = %user, broker = %broker, state = %state, "session state changed");
            self.emit(user, broker, state);
            self.publish_gauge();
        }
    }

    fn install(
        &self,
        user: &UserId,
        broker: BrokerKind,
        token: SessionToken,
        refreshed_at: DateTime<Utc>,
    ) -> SessionSnapshot {
        let expires_at = token.expires_at;
        let secrets = self.inner.vault.secrets();
        secrets.register(token.access_token.expose_secret());
        if let Some(refresh) = &token.refresh_token {
            secrets.register(refresh.expose_secret());
        }
        self.inner.sessions.insert(
            (user.clone(), broker),
            SessionEntry {
                state: SessionState::Connected,
                token: Some(Arc::new(token)),
                last_refreshed_at: Some(refreshed_at),
                last_error: None,
            },
        );
        info!(user_id = %user, broker = %broker, %expires_at, "session connected");
        self.emit(user, broker, SessionState::Connected);
        self.publish_gauge();
        SessionSnapshot {
            user_id: user.clone(),
            broker,
            state: SessionState::Connected,
            expires_at: Some(expires_at),
            last_refreshed_at: Some(refreshed_at),
            last_error: None,
        }
    }

    fn token(&self, user: &UserId, broker: BrokerKind) -> Option<Arc<SessionToken>> {
        self.inner
            .sessions
            .get(&(user.clone(), broker))
            .and_then(|e| e.token.clone())
    }

    /// The current session, without touching the broker.
    pub fn snapshot(&self, user: &UserId, broker: BrokerKind) -> SessionSnapshot {
        match self.inner.sessions.get(&(user.clone(), broker)) {
            Some(e) => SessionSnapshot {
                user_id: user.clone(),
                broker,
                state: e.state,
                expires_at: e.token.as_ref().map(|t| t.expires_at),
                last_refreshed_at: e.last_refreshed_at,
                last_error: e.last_error.clone(),
            },
            None => SessionSnapshot::disconnected(user, broker),
        }
    }

    /// A connected session whose token is still valid, if there is one.
    fn live_snapshot(&self, user: &UserId, broker: BrokerKind) -> Option<SessionSnapshot> {
        let now = self.inner.clock.now();
        let snapshot = self.snapshot(user, broker);
        let live = snapshot.state == SessionState::Connected
            && snapshot.expires_at.is_some_and(|at| now < at);
        live.then_some(snapshot)
    }

    /// The session after applying any token expiry that is already due.
    pub async fn session(
        &self,
        user: &UserId,
        broker: BrokerKind,
    ) -> Result<SessionSnapshot, BrokerlinkError> {
        self.expire_if_due(user, broker).await?;
        Ok(self.snapshot(user, broker))
    }

    /// One snapshot per supported broker, in display order.
    pub async fn sessions_for(&self, user: &UserId) -> Result<Vec<SessionSnapshot>, BrokerlinkError> {
        let mut out = Vec::with_capacity(BrokerKind::ALL.len());
        for broker in BrokerKind::ALL {
            out.push(self.session(user, broker).await?);
        }
        Ok(out)
    }

    async fn consume_api_call(&self, user: &UserId, broker: BrokerKind) -> Result<(), BrokerlinkError> {
        self.inner
            .quota
            .try_consume(user, broker, QuotaKind::ApiCall)
            .await?
            .into_result(broker)
    }

    // --- login -------------------------------------------------------------

    /// Connect, or join a login already in flight for this (user, broker).
    pub async fn connect(
        &self,
        user: &UserId,
        broker: BrokerKind,
    ) -> Result<SessionSnapshot, BrokerlinkError> {
        if let Some(live) = self.live_snapshot(user, broker) {
            return Ok(live);
        }
        self.join_or_start(user, broker, false).await
    }

    /// Join the attempt in flight for this key, or start one. A new attempt
    /// with `refresh_first` tries the refresh token before a full login.
    async fn join_or_start(
        &self,
        user: &UserId,
        broker: BrokerKind,
        refresh_first: bool,
    ) -> Result<SessionSnapshot, BrokerlinkError> {
        let key = (user.clone(), broker);
        let attempt = match self.inner.pending.entry(key.clone()) {
            Entry::Occupied(pending) => {
                debug!(user_id = %user, broker = %broker, "joining login in flight");
                pending.get().clone()
            }
            Entry::Vacant(slot) => {
                // A login may have finished between the fast-path check and here.
                if let Some(live) = self.live_snapshot(user, broker) {
                    return Ok(live);
                }
                let this = self.clone();
                let user = user.clone();
                let attempt = async move {
                    let result = if refresh_first {
                        this.refresh_or_login(&user, broker).await
                    } else {
                        this.login(&user, broker).await
                    };
                    this.inner.pending.remove(&key);
                    result
                }
                .boxed()
                .shared();
                slot.insert(attempt.clone());
                attempt
            }
        };
        attempt.await
    }

    async fn login(
        &self,
        user: &UserId,
        broker: BrokerKind,
    ) -> Result<SessionSnapshot, BrokerlinkError> {
        let adapter = self.adapter(broker)?;
        let credential = self.inner.vault.get(user, broker).await?;
        let epoch = self.epoch(user, broker);
        self.set_state(user, broker, SessionState::Connecting, None);

        let retry = self.inner.retry;
        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            if let Err(e) = self.consume_api_call(user, broker).await {
                break Err(e);
            }
            match with_timeout(broker, self.inner.call_timeout, adapter.authenticate(&credential))
                .await
            {
                Ok(token) => break Ok(token),
                Err(e) if e.is_transient() && attempt < retry.max_attempts => {
                    let delay = retry.delay_after(attempt);
                    warn!(
                        user_id = %user,
                        broker = %broker,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "login failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_transient() => {
                    break Err(BrokerlinkError::AuthExpired {
                        broker,
                        message: format!("gave up after {attempt} attempts ({e})"),
                    });
                }
                Err(e) => break Err(e),
            }
        };

        let revoked = self.epoch(user, broker) != epoch;
        match outcome {
            Ok(_) if revoked => Err(BrokerlinkError::NotFound(format!(
                "{broker} credential for {user} was removed during login"
            ))),
            Ok(token) => {
                brokerlink_prometheus::record_login(broker, "ok");
                let snapshot = self.install(user, broker, token, self.inner.clock.now());
                self.persist_if_enabled(user, broker).await;
                Ok(snapshot)
            }
            Err(e) => {
                brokerlink_prometheus::record_login(broker, e.kind());
                warn!(user_id = %user, broker = %broker, error = %e, "login failed");
                if !revoked {
                    self.set_state(user, broker, SessionState::Failed, Some(e.to_string()));
                }
                Err(e)
            }
        }
    }

    /// Re-authenticate an expired session: refresh the token if the broker
    /// supports it, otherwise run a full login. Joins any attempt already
    /// in flight for this (user, broker).
    pub async fn reauthenticate(
        &self,
        user: &UserId,
        broker: BrokerKind,
    ) -> Result<SessionSnapshot, BrokerlinkError> {
        let in_flight = self
            .inner
            .pending
            .get(&(user.clone(), broker))
            .map(|p| p.clone());
        if let Some(attempt) = in_flight {
            debug!(user_id = %user, broker = %broker, "joining login in flight");
            return attempt.await;
        }
        let current = self.snapshot(user, broker);
        if current.state != SessionState::Expired {
            debug!(user_id = %user, broker = %broker, state = %current.state, "nothing to re-authenticate");
            return Ok(current);
        }
        self.join_or_start(user, broker, true).await
    }

    /// Body of a re-authentication attempt. Runs inside the shared future,
    /// so the fallback calls `login` directly rather than `connect`.
    async fn refresh_or_login(
        &self,
        user: &UserId,
        broker: BrokerKind,
    ) -> Result<SessionSnapshot, BrokerlinkError> {
        let Some(token) = self.token(user, broker).filter(|t| t.refresh_token.is_some()) else {
            return self.login(user, broker).await;
        };
        let adapter = self.adapter(broker)?;
        let credential = self.inner.vault.get(user, broker).await?;
        let epoch = self.epoch(user, broker);
        self.set_state(user, broker, SessionState::Connecting, None);
        if let Err(e) = self.consume_api_call(user, broker).await {
            self.set_state(user, broker, SessionState::Failed, Some(e.to_string()));
            return Err(e);
        }

        match with_timeout(
            broker,
            self.inner.call_timeout,
            adapter.refresh(&credential, &token),
        )
        .await
        {
            Ok(fresh) if self.epoch(user, broker) == epoch => {
                brokerlink_prometheus::record_login(broker, "refreshed");
                let snapshot = self.install(user, broker, fresh, self.inner.clock.now());
                self.persist_if_enabled(user, broker).await;
                Ok(snapshot)
            }
            Ok(_) => Err(BrokerlinkError::NotFound(format!(
                "{broker} credential for {user} was removed during refresh"
            ))),
            Err(e) => {
                debug!(user_id = %user, broker = %broker, error = %e, "token refresh failed, logging in again");
                self.login(user, broker).await
            }
        }
    }

    // --- expiry ------------------------------------------------------------

    /// Move a connected session to `Expired`, dropping its saved copy and
    /// queueing a background re-login when the user has auto-login on.
    /// A session in any other state is left alone and `false` is returned.
    async fn mark_expired(
        &self,
        user: &UserId,
        broker: BrokerKind,
        reason: &str,
    ) -> Result<bool, BrokerlinkError> {
        if !self.expire_connected(user, broker, reason) {
            return Ok(false);
        }
        sessions::delete(self.inner.vault.database(), user.as_str(), &broker.to_string()).await?;
        if self.inner.prefs.get(user).await?.auto_login {
            self.enqueue_refresh(user, broker);
        }
        Ok(true)
    }

    /// `Connected -> Expired`, checked and set under the entry lock.
    fn expire_connected(&self, user: &UserId, broker: BrokerKind, reason: &str) -> bool {
        let expired = match self.inner.sessions.get_mut(&(user.clone(), broker)) {
            Some(mut entry) if entry.state == SessionState::Connected => {
                entry.state = SessionState::Expired;
                entry.last_error = Some(reason.to_string());
                true
            }
            _ => false,
        };
        if expired {
            debug!(user_id = %user, broker = %broker, "session state changed to expired");
            self.emit(user, broker, SessionState::Expired);
            self.publish_gauge();
        }
        expired
    }

    /// Record a transient failure. The state is unchanged.
    fn note_error(&self, user: &UserId, broker: BrokerKind, error: Option<String>) {
        if let Some(mut entry) = self.inner.sessions.get_mut(&(user.clone(), broker)) {
            entry.last_error = error;
        }
    }

    fn enqueue_refresh(&self, user: &UserId, broker: BrokerKind) {
        let job = RefreshJob {
            user_id: user.clone(),
            broker,
        };
        match self.inner.refresh_tx.try_send(job) {
            Ok(()) => debug!(user_id = %user, broker = %broker, "re-login queued"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(user_id = %user, broker = %broker, "refresh queue full, dropping re-login")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(user_id = %user, broker = %broker, "refresh worker stopped")
            }
        }
    }

    async fn expire_if_due(&self, user: &UserId, broker: BrokerKind) -> Result<(), BrokerlinkError> {
        let now = self.inner.clock.now();
        let due = self
            .inner
            .sessions
            .get(&(user.clone(), broker))
            .is_some_and(|e| {
                e.state == SessionState::Connected
                    && e.token.as_ref().is_some_and(|t| t.is_expired_at(now))
            });
        if due {
            info!(user_id = %user, broker = %broker, "session token expired");
            self.mark_expired(user, broker, "session token expired").await?;
        }
        Ok(())
    }

    /// Expire every connected session whose token has lapsed. Returns how many.
    pub async fn expire_due(&self) -> Result<usize, BrokerlinkError> {
        let now = self.inner.clock.now();
        let due: Vec<Key> = self
            .inner
            .sessions
            .iter()
            .filter(|e| {
                e.state == SessionState::Connected
                    && e.token.as_ref().is_some_and(|t| t.is_expired_at(now))
            })
            .map(|e| e.key().clone())
            .collect();
        let mut expired = 0;
        for (user, broker) in &due {
            if self.mark_expired(user, *broker, "session token expired").await? {
                info!(user_id = %user, broker = %broker, "session token expired");
                expired += 1;
            }
        }
        let purged = sessions::delete_expired(self.inner.vault.database(), &format_ts(now)).await?;
        if purged > 0 {
            debug!(purged, "expired saved sessions removed");
        }
        Ok(expired)
    }

    // --- operations --------------------------------------------------------

    /// Connect if needed, then probe the session.
    pub async fn test_connection(
        &self,
        user: &UserId,
        broker: BrokerKind,
    ) -> Result<ConnectionHealth, BrokerlinkError> {
        let adapter = self.adapter(broker)?;
        self.expire_if_due(user, broker).await?;
        self.connect(user, broker).await?;
        let token = self.token(user, broker).ok_or_else(|| BrokerlinkError::AuthExpired {
            broker,
            message: "session ended before the probe".to_string(),
        })?;
        let credential = self.inner.vault.get(user, broker).await?;
        self.consume_api_call(user, broker).await?;

        let health = tokio::time::timeout(
            self.inner.call_timeout,
            adapter.test_connection(&credential, &token),
        )
        .await
        .unwrap_or(ConnectionHealth::Unreachable);

        match health {
            ConnectionHealth::Healthy => self.note_error(user, broker, None),
            ConnectionHealth::AuthExpired => {
                self.mark_expired(user, broker, "broker rejected the session token")
                    .await?;
            }
            ConnectionHealth::Unreachable => {
                self.note_error(
                    user,
                    broker,
                    Some(format!("{broker} did not answer the health probe")),
                );
            }
        }
        info!(user_id = %user, broker = %broker, health = %health, "connection tested");
        Ok(health)
    }

    /// Place an order. Orders for one (user, broker) are serialized.
    pub async fn place_order(
        &self,
        user: &UserId,
        broker: BrokerKind,
        order: &OrderRequest,
    ) -> Result<OrderAck, BrokerlinkError> {
        order.validate()?;
        let adapter = self.adapter(broker)?;
        let lock = self
            .inner
            .order_locks
            .entry((user.clone(), broker))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        self.expire_if_due(user, broker).await?;
        self.connect(user, broker).await?;
        let token = self.token(user, broker).ok_or_else(|| BrokerlinkError::AuthExpired {
            broker,
            message: "session ended before the order".to_string(),
        })?;
        let credential = self.inner.vault.get(user, broker).await?;
        self.inner
            .quota
            .try_consume_all(user, broker, &[QuotaKind::ApiCall, QuotaKind::Order])
            .await?
            .into_result(broker)?;

        let result = with_timeout(
            broker,
            self.inner.call_timeout,
            adapter.place_order(&credential, &token, order),
        )
        .await;
        match &result {
            Ok(ack) => {
                brokerlink_prometheus::record_order(broker, "ok");
                info!(user_id = %user, broker = %broker, order_id = %ack.order_id, "order placed");
            }
            Err(e) => {
                brokerlink_prometheus::record_order(broker, e.kind());
                warn!(user_id = %user, broker = %broker, error = %e, "order failed");
                match e {
                    BrokerlinkError::AuthExpired { .. } => {
                        self.mark_expired(user, broker, "broker rejected the session token")
                            .await?;
                    }
                    BrokerlinkError::Unreachable { .. } => {
                        self.note_error(user, broker, Some(e.to_string()));
                    }
                    BrokerlinkError::AuthError { .. } | BrokerlinkError::Fatal(_) => {
                        self.set_state(user, broker, SessionState::Failed, Some(e.to_string()));
                    }
                    _ => {}
                }
            }
        }
        result
    }

    /// End a session. Succeeds when there was none.
    pub async fn logout(&self, user: &UserId, broker: BrokerKind) -> Result<(), BrokerlinkError> {
        self.teardown(user, broker).await?;
        info!(user_id = %user, broker = %broker, "logged out");
        Ok(())
    }

    /// Drop a session because its credential changed or went away.
    pub async fn invalidate(&self, user: &UserId, broker: BrokerKind) -> Result<(), BrokerlinkError> {
        self.teardown(user, broker).await?;
        debug!(user_id = %user, broker = %broker, "session invalidated");
        Ok(())
    }

    async fn teardown(&self, user: &UserId, broker: BrokerKind) -> Result<(), BrokerlinkError> {
        let key = (user.clone(), broker);
        *self.inner.epochs.entry(key.clone()).or_insert(0) += 1;
        let existed = self.inner.sessions.remove(&key).is_some();
        sessions::delete(self.inner.vault.database(), user.as_str(), &broker.to_string()).await?;
        if existed {
            self.emit(user, broker, SessionState::Disconnected);
            self.publish_gauge();
        }
        Ok(())
    }

    // --- credentials -------------------------------------------------------

    /// Store a credential and drop any session built on the old one.
    pub async fn put_credential(
        &self,
        user: &UserId,
        broker: BrokerKind,
        fields: BrokerFields,
        actor: &str,
    ) -> Result<(), BrokerlinkError> {
        self.inner.vault.put(user, broker, fields, actor).await?;
        self.invalidate(user, broker).await
    }

    /// Revoke a credential. The session goes with it.
    pub async fn delete_credential(
        &self,
        user: &UserId,
        broker: BrokerKind,
        actor: &str,
    ) -> Result<(), BrokerlinkError> {
        self.inner.vault.delete(user, broker, actor).await?;
        self.invalidate(user, broker).await
    }

    /// Remove everything held for a user. Returns the brokers that had credentials.
    pub async fn delete_user(
        &self,
        user: &UserId,
        actor: &str,
    ) -> Result<Vec<BrokerKind>, BrokerlinkError> {
        let removed = self.inner.vault.delete_user(user, actor).await?;
        for broker in BrokerKind::ALL {
            self.invalidate(user, broker).await?;
            self.inner.quota.reset(user, broker).await?;
            self.inner.order_locks.remove(&(user.clone(), broker));
        }
        info!(user_id = %user, brokers = removed.len(), "user removed");
        Ok(removed)
    }

    // --- preferences -------------------------------------------------------

    pub async fn preferences(&self, user: &UserId) -> Result<TradingPreference, BrokerlinkError> {
        self.inner.prefs.get(user).await
    }

    /// Save preferences. A default broker must be enabled and configured.
    pub async fn update_preferences(
        &self,
        pref: TradingPreference,
    ) -> Result<TradingPreference, BrokerlinkError> {
        let user = pref.user_id.clone();
        if let Some(broker) = pref.default_broker {
            self.adapter(broker)?;
            if !self.inner.vault.exists(&user, broker).await? {
                return Err(BrokerlinkError::Validation(format!(
                    "default broker {broker} has no stored credential"
                )));
            }
        }
        let previous = self.inner.prefs.get(&user).await?;
        self.inner.prefs.put(&pref, self.inner.clock.now()).await?;

        if !pref.save_session {
            let dropped = sessions::delete_for_user(self.inner.vault.database(), user.as_str()).await?;
            if dropped > 0 {
                debug!(user_id = %user, dropped, "saved sessions removed");
            }
        } else if !previous.save_session {
            for broker in BrokerKind::ALL {
                if self.live_snapshot(&user, broker).is_some() {
                    self.persist(&user, broker).await?;
                }
            }
        }
        info!(
            user_id = %user,
            default_broker = ?pref.default_broker,
            auto_login = pref.auto_login,
            save_session = pref.save_session,
            "preferences updated"
        );
        Ok(pref)
    }

    // --- persistence -------------------------------------------------------

    async fn persist(&self, user: &UserId, broker: BrokerKind) -> Result<(), BrokerlinkError> {
        let Some(token) = self.token(user, broker) else {
            return Ok(());
        };
        let row = seal_token(&self.inner.vault, user, broker, &token, self.inner.clock.now())?;
        sessions::save(self.inner.vault.database(), row).await?;
        debug!(user_id = %user, broker = %broker, "session saved");
        Ok(())
    }

    async fn persist_if_enabled(&self, user: &UserId, broker: BrokerKind) {
        let result = async {
            if self.inner.prefs.get(user).await?.save_session {
                self.persist(user, broker).await?;
            }
            Ok::<_, BrokerlinkError>(())
        }
        .await;
        if let Err(e) = result {
            warn!(user_id = %user, broker = %broker, error = %e, "could not save session");
        }
    }

    /// Reload saved, unexpired sessions. Returns how many were restored.
    pub async fn restore_sessions(&self) -> Result<usize, BrokerlinkError> {
        let db = self.inner.vault.database();
        let now = self.inner.clock.now();
        sessions::delete_expired(db, &format_ts(now)).await?;

        let mut restored = 0;
        for row in sessions::list_all(db).await? {
            let Ok(broker) = row.broker.parse::<BrokerKind>() else {
                warn!(broker = %row.broker, "skipping saved session for unknown broker");
                continue;
            };
            let user = UserId(row.user_id.clone());
            let keep = self.inner.adapters.contains_key(&broker)
                && self.inner.vault.exists(&user, broker).await?
                && self.inner.prefs.get(&user).await?.save_session;
            if !keep {
                sessions::delete(db, user.as_str(), &row.broker).await?;
                continue;
            }
            match open_token(&self.inner.vault, &user, broker, &row) {
                Ok((token, _)) if token.is_expired_at(now) => {
                    sessions::delete(db, user.as_str(), &row.broker).await?;
                }
                Ok((token, saved_at)) => {
                    self.install(&user, broker, token, saved_at.unwrap_or(now));
                    restored += 1;
                }
                Err(e) => {
                    warn!(user_id = %user, broker = %broker, error = %e, "discarding unreadable saved session");
                    sessions::delete(db, user.as_str(), &row.broker).await?;
                }
            }
        }
        info!(restored, "saved sessions restored");
        Ok(restored)
    }

    /// Log in every configured broker for users with auto-login on.
    /// Returns how many sessions ended up connected.
    pub async fn auto_login_all(&self) -> Result<usize, BrokerlinkError> {
        let mut targets = Vec::new();
        for pref in self.inner.prefs.auto_login_users().await? {
            for broker in self.inner.vault.list_brokers(&pref.user_id).await? {
                if self.inner.adapters.contains_key(&broker) {
                    targets.push((pref.user_id.clone(), broker));
                }
            }
        }
        let attempts = targets.iter().map(|(user, broker)| async move {
            let result = self.connect(user, *broker).await;
            if let Err(e) = &result {
                warn!(user_id = %user, broker = %broker, error = %e, "auto-login failed");
            }
            result.is_ok()
        });
        let connected = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();
        info!(attempted = targets.len(), connected, "auto-login finished");
        Ok(connected)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted in-crate adapter and a temp-database fixture.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use brokerlink_core::{BrokerCredential, ManualClock, QuotaLimits};
    use brokerlink_quota::InMemoryQuotaStore;
    use brokerlink_security::SecretRegistry;
    use brokerlink_storage::Database;
    use brokerlink_vault::StaticKeyProvider;
    use chrono::TimeZone;
    use secrecy::SecretString;

    use super::*;

    pub enum Step {
        Ok,
        Fail(BrokerlinkError),
        Hang,
    }

    pub struct ScriptedAdapter {
        pub kind: BrokerKind,
        pub clock: ManualClock,
        pub script: std::sync::Mutex<VecDeque<Step>>,
        pub delay: Duration,
        pub ttl: chrono::Duration,
        pub refresh_token: bool,
        pub auth_calls: AtomicUsize,
        pub refresh_calls: AtomicUsize,
        pub order_calls: AtomicUsize,
        pub probe: std::sync::Mutex<ConnectionHealth>,
    }

    impl ScriptedAdapter {
        pub fn new(kind: BrokerKind, clock: ManualClock) -> Self {
            Self {
                kind,
                clock,
                script: std::sync::Mutex::new(VecDeque::new()),
                delay: Duration::ZERO,
                ttl: chrono::Duration::hours(8),
                refresh_token: false,
                auth_calls: AtomicUsize::new(0),
                refresh_calls: AtomicUsize::new(0),
                order_calls: AtomicUsize::new(0),
                probe: std::sync::Mutex::new(ConnectionHealth::Healthy),
            }
        }

        pub fn push(&self, step: Step) {
            self.script.lock().unwrap().push_back(step);
        }

        fn token(&self, tag: &str) -> SessionToken {
            let now = self.clock.now();
            SessionToken {
                access_token: SecretString::from(format!("access-{tag}")),
                refresh_token: self
                    .refresh_token
                    .then(|| SecretString::from(format!("refresh-{tag}"))),
                issued_at: now,
                expires_at: now + self.ttl,
            }
        }
    }

    #[async_trait]
    impl BrokerAdapter for ScriptedAdapter {
        fn name(&self) -> &str {
            "scripted"
        }

        fn kind(&self) -> BrokerKind {
            self.kind
        }

        async fn authenticate(
            &self,
            _credential: &BrokerCredential,
        ) -> Result<SessionToken, BrokerlinkError> {
            let n = self.auth_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Ok);
            match step {
                Step::Ok => Ok(self.token(&n.to_string())),
                Step::Fail(e) => Err(e),
                Step::Hang => std::future::pending().await,
            }
        }

        async fn refresh(
            &self,
            _credential: &BrokerCredential,
            _token: &SessionToken,
        ) -> Result<SessionToken, BrokerlinkError> {
            let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(self.token(&format!("r{n}")))
        }

        async fn test_connection(
            &self,
            _credential: &BrokerCredential,
            _token: &SessionToken,
        ) -> ConnectionHealth {
            *self.probe.lock().unwrap()
        }

        async fn place_order(
            &self,
            _credential: &BrokerCredential,
            _token: &SessionToken,
            _order: &OrderRequest,
        ) -> Result<OrderAck, BrokerlinkError> {
            let n = self.order_calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(OrderAck {
                broker: self.kind,
                order_id: format!("ord-{n}"),
                placed_at: self.clock.now(),
            })
        }
    }

    pub struct Fixture {
        pub _dir: tempfile::TempDir,
        pub clock: ManualClock,
        pub store: Arc<InMemoryQuotaStore>,
        pub vault: Arc<CredentialVault>,
        pub quota: Arc<QuotaTracker>,
    }

    pub fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 3, 30, 0).unwrap()
    }

    impl Fixture {
        pub async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let clock = ManualClock::new(start());
            let db = Database::open(dir.path().join("session.db").to_str().unwrap())
                .await
                .unwrap();
            let vault = CredentialVault::open(
                db,
                &StaticKeyProvider::new([7u8; 32]),
                Arc::new(clock.clone()),
                SecretRegistry::new(),
            )
            .await
            .unwrap();
            let store = Arc::new(InMemoryQuotaStore::new());
            let quota = QuotaTracker::new(
                store.clone(),
                Arc::new(clock.clone()),
                HashMap::from([(BrokerKind::Zerodha, QuotaLimits::default())]),
                330,
            )
            .unwrap();
            Self {
                _dir: dir,
                clock,
                store,
                vault: Arc::new(vault),
                quota: Arc::new(quota),
            }
        }

        pub fn adapter(&self) -> Arc<ScriptedAdapter> {
            Arc::new(ScriptedAdapter::new(BrokerKind::Zerodha, self.clock.clone()))
        }

        pub fn manager(&self, adapter: Arc<ScriptedAdapter>) -> SessionManager {
            SessionManager::new(
                vec![adapter as Arc<dyn BrokerAdapter>],
                self.vault.clone(),
                self.quota.clone(),
                Arc::new(self.clock.clone()),
                &SessionConfig::default(),
            )
        }

        pub async fn store_credential(&self, user: &UserId) {
            let fields = BrokerFields::parse(
                BrokerKind::Zerodha,
                serde_json::json!({
                    "api_key": "kiteapikey001",
                    "api_secret": "kitesecret001",
                    "user_id": "AB1234",
                    "totp_secret": "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ",
                }),
            )
            .unwrap();
            self.vault
                .put(user, BrokerKind::Zerodha, fields, "test")
                .await
                .unwrap();
        }
    }
}
