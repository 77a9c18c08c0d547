// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared HTTP plumbing and error classification for the broker adapters.
//!
//! Status mapping:
//! - 401/403 during login: `AuthError`; on an existing token: `AuthExpired`
//! - 429: `QuotaExceeded`
//! - 5xx, connect failures and timeouts: `Unreachable`
//!
//! Response bodies are logged at debug level (the log writer redacts them)
//! and never copied into returned errors.

use std::sync::Arc;
use std::time::Duration;

use brokerlink_core::{
    BrokerKind, BrokerlinkError, Clock, ConnectionHealth, QuotaKind, QuotaLimits, SessionToken,
};
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Client-side ceiling on any single request. The session manager applies
/// its own, shorter, per-call timeout on top.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether a request is part of a login handshake or uses an issued token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Login,
    Session,
}

/// Map a non-success HTTP status to the error taxonomy.
pub fn classify_status(
    broker: BrokerKind,
    status: StatusCode,
    phase: CallPhase,
    limits: QuotaLimits,
) -> BrokerlinkError {
    let message = format!("HTTP {}", status.as_u16());
    match status.as_u16() {
        401 | 403 => match phase {
            CallPhase::Login => BrokerlinkError::AuthError { broker, message },
            CallPhase::Session => BrokerlinkError::AuthExpired { broker, message },
        },
        429 => BrokerlinkError::QuotaExceeded {
            broker,
            kind: QuotaKind::ApiCall,
            limit: limits.api_calls_limit,
        },
        500..=599 => BrokerlinkError::Unreachable { broker, message },
        _ => match phase {
            CallPhase::Login => BrokerlinkError::AuthError { broker, message },
            CallPhase::Session => BrokerlinkError::Validation(format!(
                "{broker} rejected the request ({message})"
            )),
        },
    }
}

/// Map a transport failure (DNS, connect, TLS, timeout, reset) to `Unreachable`.
pub fn classify_transport(broker: BrokerKind, err: &reqwest::Error) -> BrokerlinkError {
    let message = if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        "connection failed".to_string()
    } else {
        "transport error".to_string()
    };
    BrokerlinkError::Unreachable { broker, message }
}

/// HTTP state shared by every adapter.
#[derive(Clone)]
pub struct BrokerHttp {
    kind: BrokerKind,
    client: reqwest::Client,
    base_url: String,
    clock: Arc<dyn Clock>,
    token_ttl: chrono::Duration,
    limits: QuotaLimits,
}

impl std::fmt::Debug for BrokerHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerHttp")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl BrokerHttp {
    pub fn new(
        kind: BrokerKind,
        base_url: &str,
        clock: Arc<dyn Clock>,
        token_ttl: Duration,
        limits: QuotaLimits,
    ) -> Result<Self, BrokerlinkError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("brokerlink/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BrokerlinkError::Internal(format!("failed to build HTTP client: {e}")))?;
        let token_ttl = chrono::Duration::from_std(token_ttl)
            .map_err(|_| BrokerlinkError::Config("token ttl out of range".into()))?;
        Ok(Self {
            kind,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            clock,
            token_ttl,
            limits,
        })
    }

    pub fn kind(&self) -> BrokerKind {
        self.kind
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path))
    }

    /// Send and fail on transport errors or non-success statuses.
    pub async fn send(
        &self,
        request: RequestBuilder,
        phase: CallPhase,
    ) -> Result<Response, BrokerlinkError> {
        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(self.kind, &e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!(broker = %self.kind, status = %status, body = %body, "broker returned an error");
        Err(classify_status(self.kind, status, phase, self.limits))
    }

    /// Send and decode a JSON body.
    pub async fn json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        phase: CallPhase,
    ) -> Result<T, BrokerlinkError> {
        let response = self.send(request, phase).await?;
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(self.kind, &e))?;
        serde_json::from_str(&body).map_err(|e| {
            debug!(broker = %self.kind, error = %e, body = %body, "unexpected response shape");
            BrokerlinkError::Unreachable {
                broker: self.kind,
                message: "malformed response".to_string(),
            }
        })
    }

    /// Run a cheap authenticated request and report what it says about the session.
    pub async fn probe(&self, request: RequestBuilder) -> ConnectionHealth {
        match self.send(request, CallPhase::Session).await {
            Ok(_) => ConnectionHealth::Healthy,
            Err(BrokerlinkError::AuthExpired { .. }) => ConnectionHealth::AuthExpired,
            Err(_) => ConnectionHealth::Unreachable,
        }
    }

    /// Wrap freshly issued token strings with the configured lifetime.
    pub fn issue_token(&self, access_token: String, refresh_token: Option<String>) -> SessionToken {
        let issued_at = self.clock.now();
        SessionToken {
            access_token: SecretString::from(access_token),
            refresh_token: refresh_token.map(SecretString::from),
            issued_at,
            expires_at: issued_at + self.token_ttl,
        }
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}
