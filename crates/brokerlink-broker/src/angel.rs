// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Angel One SmartAPI adapter.
//!
//! Login is client code + password, plus a TOTP when a secret is stored.
//! SmartAPI reports failures with HTTP 200 and `"status": false`, so the
//! envelope is checked in addition to the HTTP status. Tokens are refreshed
//! with the refresh token instead of a second login.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use brokerlink_core::{
    AngelFields, BrokerAdapter, BrokerCredential, BrokerFields, BrokerKind, BrokerlinkError,
    Clock, ConnectionHealth, OrderAck, OrderRequest, Product, QuotaLimits, SessionToken,
};
use reqwest::RequestBuilder;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::http::{BrokerHttp, CallPhase};
use crate::totp;

const LOGIN_PATH: &str = "/rest/auth/angelbroking/user/v1/loginByPassword";
const REFRESH_PATH: &str = "/rest/auth/angelbroking/jwt/v1/generateTokens";
const PROFILE_PATH: &str = "/rest/secure/angelbroking/user/v1/getProfile";
const ORDER_PATH: &str = "/rest/secure/angelbroking/order/v1/placeOrder";

#[derive(Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    #[serde(default, rename = "errorcode")]
    error_code: String,
    data: Option<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenData {
    jwt_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct OrderData {
    orderid: String,
}

#[derive(Serialize)]
struct LoginBody<'a> {
    clientcode: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    totp: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct OrderBody<'a> {
    variety: &'static str,
    tradingsymbol: &'a str,
    exchange: &'a str,
    transactiontype: String,
    ordertype: String,
    producttype: &'static str,
    duration: &'static str,
    quantity: String,
    price: String,
}

fn fields(credential: &BrokerCredential) -> Result<&AngelFields, BrokerlinkError> {
    match &credential.fields {
        BrokerFields::Angel(f) => Ok(f),
        other => Err(BrokerlinkError::Internal(format!(
            "angel adapter handed a {} credential",
            other.kind()
        ))),
    }
}

/// Unwrap a SmartAPI envelope. A `status: false` body is a rejection even on
/// HTTP 200; token error codes (`AG8001`..`AG8003`) mean the session lapsed.
fn unwrap_envelope<T>(envelope: Envelope<T>, phase: CallPhase) -> Result<T, BrokerlinkError> {
    let broker = BrokerKind::Angel;
    if !envelope.status {
        debug!(code = %envelope.error_code, message = %envelope.message, "smartapi rejected request");
        let message = if envelope.error_code.is_empty() {
            "request rejected".to_string()
        } else {
            format!("request rejected ({})", envelope.error_code)
        };
        return Err(match phase {
            CallPhase::Login => BrokerlinkError::AuthError { broker, message },
            CallPhase::Session if envelope.error_code.starts_with("AG800") => {
                BrokerlinkError::AuthExpired { broker, message }
            }
            CallPhase::Session => {
                BrokerlinkError::Validation(format!("{broker} rejected the request: {message}"))
            }
        });
    }
    envelope.data.ok_or_else(|| BrokerlinkError::Unreachable {
        broker,
        message: "response carried no data".to_string(),
    })
}

/// Angel One SmartAPI adapter.
#[derive(Debug, Clone)]
pub struct AngelAdapter {
    http: BrokerHttp,
}

impl AngelAdapter {
    pub fn new(
        base_url: &str,
        clock: Arc<dyn Clock>,
        token_ttl: Duration,
        limits: QuotaLimits,
    ) -> Result<Self, BrokerlinkError> {
        Ok(Self {
            http: BrokerHttp::new(BrokerKind::Angel, base_url, clock, token_ttl, limits)?,
        })
    }

    /// Headers every SmartAPI request carries.
    fn with_headers(&self, request: RequestBuilder, f: &AngelFields) -> RequestBuilder {
        request
            .header("Accept", "application/json")
            .header("X-UserType", "USER")
            .header("X-SourceID", "WEB")
            .header("X-PrivateKey", f.api_key.expose_secret())
    }

    fn authorized(
        &self,
        request: RequestBuilder,
        f: &AngelFields,
        token: &SessionToken,
    ) -> RequestBuilder {
        self.with_headers(request, f)
            .bearer_auth(token.access_token.expose_secret())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        phase: CallPhase,
    ) -> Result<T, BrokerlinkError> {
        let envelope: Envelope<T> = self.http.json(request, phase).await?;
        unwrap_envelope(envelope, phase)
    }
}

#[async_trait]
impl BrokerAdapter for AngelAdapter {
    fn name(&self) -> &str {
        "angel-smartapi"
    }

    fn kind(&self) -> BrokerKind {
        BrokerKind::Angel
    }

    async fn authenticate(
        &self,
        credential: &BrokerCredential,
    ) -> Result<SessionToken, BrokerlinkError> {
        let f = fields(credential)?;
        let totp = match &f.totp_secret {
            Some(secret) => Some(totp::generate(secret.expose_secret(), self.http.now()).ok_or_else(
                || BrokerlinkError::AuthError {
                    broker: BrokerKind::Angel,
                    message: "stored TOTP secret is not valid base32".to_string(),
                },
            )?),
            None => None,
        };
        let body = LoginBody {
            clientcode: &f.client_id,
            password: f.password.expose_secret(),
            totp,
        };
        let request = self.with_headers(self.http.post(LOGIN_PATH), f).json(&body);
        let data: TokenData = self.call(request, CallPhase::Login).await?;

        info!(client_id = %f.client_id, "smartapi session issued");
        Ok(self.http.issue_token(data.jwt_token, data.refresh_token))
    }

    async fn refresh(
        &self,
        credential: &BrokerCredential,
        token: &SessionToken,
    ) -> Result<SessionToken, BrokerlinkError> {
        let f = fields(credential)?;
        let Some(refresh_token) = &token.refresh_token else {
            return self.authenticate(credential).await;
        };
        let body = RefreshBody {
            refresh_token: refresh_token.expose_secret(),
        };
        let request = self
            .authorized(self.http.post(REFRESH_PATH), f, token)
            .json(&body);
        match self.call::<TokenData>(request, CallPhase::Session).await {
            Ok(data) => {
                debug!(client_id = %f.client_id, "smartapi token refreshed");
                Ok(self.http.issue_token(data.jwt_token, data.refresh_token))
            }
            Err(BrokerlinkError::AuthExpired { .. }) => {
                warn!(client_id = %f.client_id, "refresh token rejected, logging in again");
                self.authenticate(credential).await
            }
            Err(e) => Err(e),
        }
    }

    async fn test_connection(
        &self,
        credential: &BrokerCredential,
        token: &SessionToken,
    ) -> ConnectionHealth {
        let Ok(f) = fields(credential) else {
            return ConnectionHealth::AuthExpired;
        };
        let request = self.authorized(self.http.get(PROFILE_PATH), f, token);
        match self.call::<serde_json::Value>(request, CallPhase::Session).await {
            Ok(_) => ConnectionHealth::Healthy,
            Err(BrokerlinkError::AuthExpired { .. }) => ConnectionHealth::AuthExpired,
            Err(_) => ConnectionHealth::Unreachable,
        }
    }

    async fn place_order(
        &self,
        credential: &BrokerCredential,
        token: &SessionToken,
        order: &OrderRequest,
    ) -> Result<OrderAck, BrokerlinkError> {
        let f = fields(credential)?;
        let body = OrderBody {
            variety: "NORMAL",
            tradingsymbol: &order.symbol,
            exchange: &order.exchange,
            transactiontype: order.side.to_string(),
            ordertype: order.order_type.to_string(),
            producttype: match order.product {
                Product::Intraday => "INTRADAY",
                Product::Delivery => "DELIVERY",
            },
            duration: "DAY",
            quantity: order.quantity.to_string(),
            price: order.price.map(|p| p.to_string()).unwrap_or_else(|| "0".into()),
        };
        let request = self
            .authorized(self.http.post(ORDER_PATH), f, token)
            .json(&body);
        let data: OrderData = self.call(request, CallPhase::Session).await?;
        Ok(OrderAck {
            broker: BrokerKind::Angel,
            order_id: data.orderid,
            placed_at: self.http.now(),
        })
    }

    fn quota_limits(&self) -> QuotaLimits {
        self.http.limits()
    }
}
