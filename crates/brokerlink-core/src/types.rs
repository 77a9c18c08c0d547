// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across the vault, adapters, and session manager.

use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::BrokerlinkError;

/// Identifier of the end user who owns credentials and sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Parse a user id from an untrusted source (HTTP header, CLI argument).
    pub fn parse(raw: &str) -> Result<Self, BrokerlinkError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BrokerlinkError::Validation("user id must not be empty".into()));
        }
        if trimmed.len() > 128 {
            return Err(BrokerlinkError::Validation(
                "user id must be at most 128 characters".into(),
            ));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
        {
            return Err(BrokerlinkError::Validation(format!(
                "user id `{trimmed}` contains unsupported characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The third-party trading API providers Brokerlink can connect to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    Zerodha,
    Upstox,
    Angel,
}

impl BrokerKind {
    /// Every supported broker, in display order.
    pub const ALL: [BrokerKind; 3] = [BrokerKind::Zerodha, BrokerKind::Upstox, BrokerKind::Angel];
}

/// Connection state of one (user, broker) session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Expired,
    Failed,
}

/// Result of probing an existing session against the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionHealth {
    Healthy,
    Unreachable,
    AuthExpired,
}

/// The two counters a quota tracker keeps per (user, broker).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    ApiCall,
    Order,
}

/// Broker-documented request limits. Treated as defaults, not guaranteed truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    /// API calls allowed per window.
    pub api_calls_limit: u32,
    /// Length of the API-call window.
    pub api_window: Duration,
    /// Orders allowed per trading day.
    pub orders_limit: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            api_calls_limit: 200,
            api_window: Duration::from_secs(60),
            orders_limit: 50,
        }
    }
}

/// An opaque, time-bounded broker access token.
///
/// Token material is held as [`SecretString`] so it never shows up in
/// `Debug` output or logs.
#[derive(Debug)]
pub struct SessionToken {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionToken {
    /// True once the token's expiry time has been reached.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Market or limit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

/// Intraday or delivery product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Product {
    Intraday,
    Delivery,
}

/// A broker-agnostic order request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub exchange: String,
    pub side: OrderSide,
    pub quantity: u32,
    pub order_type: OrderType,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default = "default_product")]
    pub product: Product,
}

fn default_product() -> Product {
    Product::Intraday
}

impl OrderRequest {
    /// Validate order shape before any quota is consumed.
    pub fn validate(&self) -> Result<(), BrokerlinkError> {
        if self.symbol.trim().is_empty() {
            return Err(BrokerlinkError::Validation("order symbol must not be empty".into()));
        }
        if self.exchange.trim().is_empty() {
            return Err(BrokerlinkError::Validation("order exchange must not be empty".into()));
        }
        if self.quantity == 0 {
            return Err(BrokerlinkError::Validation("order quantity must be positive".into()));
        }
        match (self.order_type, self.price) {
            (OrderType::Limit, None) => Err(BrokerlinkError::Validation(
                "limit orders require a price".into(),
            )),
            (_, Some(p)) if !p.is_finite() || p <= 0.0 => Err(BrokerlinkError::Validation(
                format!("order price must be positive, got {p}"),
            )),
            _ => Ok(()),
        }
    }
}

/// Broker acknowledgement of a placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub broker: BrokerKind,
    pub order_id: String,
    pub placed_at: DateTime<Utc>,
}

/// Per-user trading preferences edited on the settings page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingPreference {
    pub user_id: UserId,
    #[serde(default)]
    pub default_broker: Option<BrokerKind>,
    #[serde(default)]
    pub auto_login: bool,
    #[serde(default)]
    pub save_session: bool,
}

impl TradingPreference {
    /// Preferences for a user who never saved any.
    pub fn defaults_for(user_id: UserId) -> Self {
        Self {
            user_id,
            default_broker: None,
            auto_login: false,
            save_session: false,
        }
    }
}
