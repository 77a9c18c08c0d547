// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Zerodha Kite Connect adapter.
//!
//! Login posts the client id, a TOTP generated from the stored secret, and a
//! SHA-256 checksum of `api_key + user_id + api_secret` to `/session/token`.
//! Authenticated calls carry `Authorization: token <api_key>:<access_token>`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use brokerlink_core::{
    BrokerAdapter, BrokerCredential, BrokerFields, BrokerKind, BrokerlinkError, Clock,
    ConnectionHealth, OrderAck, OrderRequest, OrderType, Product, QuotaLimits, SessionToken,
    ZerodhaFields,
};
use reqwest::RequestBuilder;
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::http::{BrokerHttp, CallPhase};
use crate::totp;

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct SessionData {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct OrderData {
    order_id: String,
}

/// `sha256(api_key + user_id + api_secret)`, hex encoded.
pub fn checksum(api_key: &str, user_id: &str, api_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hasher.update(user_id.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn fields(credential: &BrokerCredential) -> Result<&ZerodhaFields, BrokerlinkError> {
    match &credential.fields {
        BrokerFields::Zerodha(f) => Ok(f),
        other => Err(BrokerlinkError::Internal(format!(
            "zerodha adapter handed a {} credential",
            other.kind()
        ))),
    }
}

/// Kite Connect (v3) adapter.
#[derive(Debug, Clone)]
pub struct ZerodhaAdapter {
    http: BrokerHttp,
}

impl ZerodhaAdapter {
    pub fn new(
        base_url: &str,
        clock: Arc<dyn Clock>,
        token_ttl: Duration,
        limits: QuotaLimits,
    ) -> Result<Self, BrokerlinkError> {
        Ok(Self {
            http: BrokerHttp::new(BrokerKind::Zerodha, base_url, clock, token_ttl, limits)?,
        })
    }

    fn authorized(
        &self,
        request: RequestBuilder,
        f: &ZerodhaFields,
        token: &SessionToken,
    ) -> RequestBuilder {
        request
            .header("X-Kite-Version", "3")
            .header(
                "Authorization",
                format!(
                    "token {}:{}",
                    f.api_key.expose_secret(),
                    token.access_token.expose_secret()
                ),
            )
    }
}

#[async_trait]
impl BrokerAdapter for ZerodhaAdapter {
    fn name(&self) -> &str {
        "zerodha-kite"
    }

    fn kind(&self) -> BrokerKind {
        BrokerKind::Zerodha
    }

    async fn authenticate(
        &self,
        credential: &BrokerCredential,
    ) -> Result<SessionToken, BrokerlinkError> {
        let f = fields(credential)?;
        let secret = f.totp_secret.as_ref().ok_or_else(|| BrokerlinkError::AuthError {
            broker: BrokerKind::Zerodha,
            message: "a TOTP secret is required for automated Kite login".to_string(),
        })?;
        let code = totp::generate(secret.expose_secret(), self.http.now()).ok_or_else(|| {
            BrokerlinkError::AuthError {
                broker: BrokerKind::Zerodha,
                message: "stored TOTP secret is not valid base32".to_string(),
            }
        })?;

        let api_key = f.api_key.expose_secret();
        let mut form = vec![
            ("api_key", api_key.to_string()),
            ("user_id", f.user_id.clone()),
            ("totp", code),
            (
                "checksum",
                checksum(api_key, &f.user_id, f.api_secret.expose_secret()),
            ),
        ];
        if let Some(password) = &f.password {
            form.push(("password", password.expose_secret().to_string()));
        }

        let request = self
            .http
            .post("/session/token")
            .header("X-Kite-Version", "3")
            .form(&form);
        let envelope: Envelope<SessionData> = self.http.json(request, CallPhase::Login).await?;

        info!(user_id = %f.user_id, "kite session issued");
        Ok(self
            .http
            .issue_token(envelope.data.access_token, envelope.data.refresh_token))
    }

    async fn test_connection(
        &self,
        credential: &BrokerCredential,
        token: &SessionToken,
    ) -> ConnectionHealth {
        let Ok(f) = fields(credential) else {
            return ConnectionHealth::AuthExpired;
        };
        let request = self.authorized(self.http.get("/user/profile"), f, token);
        let health = self.http.probe(request).await;
        debug!(health = %health, "kite profile probe");
        health
    }

    async fn place_order(
        &self,
        credential: &BrokerCredential,
        token: &SessionToken,
        order: &OrderRequest,
    ) -> Result<OrderAck, BrokerlinkError> {
        let f = fields(credential)?;
        let mut form = vec![
            ("tradingsymbol", order.symbol.clone()),
            ("exchange", order.exchange.clone()),
            ("transaction_type", order.side.to_string()),
            ("quantity", order.quantity.to_string()),
            ("order_type", order.order_type.to_string()),
            (
                "product",
                match order.product {
                    Product::Intraday => "MIS",
                    Product::Delivery => "CNC",
                }
                .to_string(),
            ),
            ("validity", "DAY".to_string()),
        ];
        if let (OrderType::Limit, Some(price)) = (order.order_type, order.price) {
            form.push(("price", price.to_string()));
        }

        let request = self
            .authorized(self.http.post("/orders/regular"), f, token)
            .form(&form);
        let envelope: Envelope<OrderData> = self.http.json(request, CallPhase::Session).await?;
        Ok(OrderAck {
            broker: BrokerKind::Zerodha,
            order_id: envelope.data.order_id,
            placed_at: self.http.now(),
        })
    }

    fn quota_limits(&self) -> QuotaLimits {
        self.http.limits()
    }
}
