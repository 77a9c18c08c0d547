// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The capability set every broker integration provides.

use async_trait::async_trait;

use crate::credential::BrokerCredential;
use crate::error::BrokerlinkError;
use crate::types::{BrokerKind, ConnectionHealth, OrderAck, OrderRequest, QuotaLimits, SessionToken};

/// Translates generic session operations into one broker's API calls.
///
/// Adapters are stateless with respect to credentials: the session manager
/// hands them the decrypted credential on every call and they must not keep
/// it. Errors are returned already classified (`AuthError`, `AuthExpired`,
/// `Unreachable`, `QuotaExceeded`); the session manager owns retries and
/// timeouts.
#[async_trait]
pub trait BrokerAdapter: Send + Sync + 'static {
    /// Human-readable adapter name, used in logs.
    fn name(&self) -> &str;

    /// The broker this adapter talks to.
    fn kind(&self) -> BrokerKind;

    /// Perform the broker's login handshake and return a fresh token.
    async fn authenticate(&self, credential: &BrokerCredential)
    -> Result<SessionToken, BrokerlinkError>;

    /// Extend or replace an existing token.
    ///
    /// Brokers without a refresh endpoint re-run the login handshake.
    async fn refresh(
        &self,
        credential: &BrokerCredential,
        token: &SessionToken,
    ) -> Result<SessionToken, BrokerlinkError> {
        let _ = token;
        self.authenticate(credential).await
    }

    /// Probe the session with a cheap authenticated call.
    async fn test_connection(
        &self,
        credential: &BrokerCredential,
        token: &SessionToken,
    ) -> ConnectionHealth;

    /// Submit an order on the authenticated session.
    async fn place_order(
        &self,
        credential: &BrokerCredential,
        token: &SessionToken,
        order: &OrderRequest,
    ) -> Result<OrderAck, BrokerlinkError>;

    /// The broker's documented request limits.
    fn quota_limits(&self) -> QuotaLimits {
        QuotaLimits::default()
    }
}
