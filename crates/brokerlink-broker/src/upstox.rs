// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Upstox (API v2) adapter.
//!
//! Upstox only issues tokens through an OAuth redirect. The user visits
//! [`UpstoxAdapter::authorization_url`], Upstox redirects back with a
//! one-time `code`, and that code is stored as the credential's
//! `auth_code`. Login exchanges it at `/v2/login/authorization/token`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use brokerlink_core::{
    BrokerAdapter, BrokerCredential, BrokerFields, BrokerKind, BrokerlinkError, Clock,
    ConnectionHealth, OrderAck, OrderRequest, Product, QuotaLimits, SessionToken, UpstoxFields,
};
use reqwest::{RequestBuilder, Url};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::http::{BrokerHttp, CallPhase};

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Serialize)]
struct PlaceOrderBody<'a> {
    quantity: u32,
    product: &'static str,
    validity: &'static str,
    price: f64,
    tag: &'static str,
    instrument_token: String,
    order_type: &'a str,
    transaction_type: &'a str,
    disclosed_quantity: u32,
    trigger_price: f64,
    is_amo: bool,
}

#[derive(Deserialize)]
struct OrderEnvelope {
    data: OrderData,
}

#[derive(Deserialize)]
struct OrderData {
    order_id: String,
}

fn fields(credential: &BrokerCredential) -> Result<&UpstoxFields, BrokerlinkError> {
    match &credential.fields {
        BrokerFields::Upstox(f) => Ok(f),
        other => Err(BrokerlinkError::Internal(format!(
            "upstox adapter handed a {} credential",
            other.kind()
        ))),
    }
}

/// Upstox API v2 adapter.
#[derive(Debug, Clone)]
pub struct UpstoxAdapter {
    http: BrokerHttp,
}

impl UpstoxAdapter {
    pub fn new(
        base_url: &str,
        clock: Arc<dyn Clock>,
        token_ttl: Duration,
        limits: QuotaLimits,
    ) -> Result<Self, BrokerlinkError> {
        Ok(Self {
            http: BrokerHttp::new(BrokerKind::Upstox, base_url, clock, token_ttl, limits)?,
        })
    }

    /// Where to send the user to grant access.
    pub fn authorization_url(&self, credential: &BrokerCredential) -> Result<String, BrokerlinkError> {
        let f = fields(credential)?;
        let url = Url::parse_with_params(
            &self.http.url("/v2/login/authorization/dialog"),
            &[
                ("response_type", "code"),
                ("client_id", f.api_key.expose_secret()),
                ("redirect_uri", f.redirect_uri.as_str()),
            ],
        )
        .map_err(|e| BrokerlinkError::Config(format!("invalid upstox base url: {e}")))?;
        Ok(url.to_string())
    }

    fn authorized(&self, request: RequestBuilder, token: &SessionToken) -> RequestBuilder {
        request
            .header("Accept", "application/json")
            .bearer_auth(token.access_token.expose_secret())
    }
}

#[async_trait]
impl BrokerAdapter for UpstoxAdapter {
    fn name(&self) -> &str {
        "upstox-v2"
    }

    fn kind(&self) -> BrokerKind {
        BrokerKind::Upstox
    }

    async fn authenticate(
        &self,
        credential: &BrokerCredential,
    ) -> Result<SessionToken, BrokerlinkError> {
        let f = fields(credential)?;
        let Some(code) = &f.auth_code else {
            return Err(BrokerlinkError::AuthError {
                broker: BrokerKind::Upstox,
                message: format!(
                    "authorization required: visit {} and save the returned code",
                    self.authorization_url(credential)?
                ),
            });
        };

        let form = [
            ("code", code.expose_secret()),
            ("client_id", f.api_key.expose_secret()),
            ("client_secret", f.api_secret.expose_secret()),
            ("redirect_uri", f.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        let request = self
            .http
            .post("/v2/login/authorization/token")
            .header("Accept", "application/json")
            .form(&form);
        let response: TokenResponse = self.http.json(request, CallPhase::Login).await?;

        info!("upstox session issued");
        Ok(self.http.issue_token(response.access_token, None))
    }

    async fn test_connection(
        &self,
        _credential: &BrokerCredential,
        token: &SessionToken,
    ) -> ConnectionHealth {
        self.http
            .probe(self.authorized(self.http.get("/v2/user/profile"), token))
            .await
    }

    async fn place_order(
        &self,
        _credential: &BrokerCredential,
        token: &SessionToken,
        order: &OrderRequest,
    ) -> Result<OrderAck, BrokerlinkError> {
        let order_type = order.order_type.to_string();
        let side = order.side.to_string();
        let body = PlaceOrderBody {
            quantity: order.quantity,
            product: match order.product {
                Product::Intraday => "I",
                Product::Delivery => "D",
            },
            validity: "DAY",
            price: order.price.unwrap_or(0.0),
            tag: "brokerlink",
            instrument_token: format!("{}_EQ|{}", order.exchange, order.symbol),
            order_type: &order_type,
            transaction_type: &side,
            disclosed_quantity: 0,
            trigger_price: 0.0,
            is_amo: false,
        };
        let request = self
            .authorized(self.http.post("/v2/order/place"), token)
            .json(&body);
        let envelope: OrderEnvelope = self.http.json(request, CallPhase::Session).await?;
        Ok(OrderAck {
            broker: BrokerKind::Upstox,
            order_id: envelope.data.order_id,
            placed_at: self.http.now(),
        })
    }

    fn quota_limits(&self) -> QuotaLimits {
        self.http.limits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brokerlink_core::{OrderSide, OrderType, SystemClock, UserId};
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(base: &str) -> UpstoxAdapter {
        UpstoxAdapter::new(
            base,
            Arc::new(SystemClock),
            Duration::from_secs(3600),
            QuotaLimits::default(),
        )
        .unwrap()
    }

    fn credential(code: Option<&str>) -> BrokerCredential {
        let mut value = serde_json::json!({
            "api_key": "upstox-client-1",
            "api_secret": "upstox-secret-1",
            "redirect_uri": "https://app.example.com/upstox/callback",
        });
        if let Some(c) = code {
            value["auth_code"] = serde_json::Value::String(c.to_string());
        }
        BrokerCredential {
            user_id: UserId::parse("alice").unwrap(),
            fields: BrokerFields::parse(BrokerKind::Upstox, value).unwrap(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn token() -> SessionToken {
        let now = chrono::Utc::now();
        SessionToken {
            access_token: "upstox-access-1".to_string().into(),
            refresh_token: None,
            issued_at: now,
            expires_at: now + chrono::Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn missing_code_returns_authorization_url() {
        let adapter = adapter("https://api.upstox.com");
        let err = adapter.authenticate(&credential(None)).await.unwrap_err();
        match err {
            BrokerlinkError::AuthError { message, .. } => {
                assert!(message.contains("/v2/login/authorization/dialog"));
                assert!(message.contains("client_id=upstox-client-1"));
                assert!(message.contains("redirect_uri=https%3A%2F%2Fapp.example.com"));
            }
            other => panic!("expected AuthError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn code_exchange_issues_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/login/authorization/token"))
            .and(body_string_contains("code=abc123"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "email": "a@example.com",
                "user_id": "7XABCD",
                "access_token": "upstox-access-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = adapter(&server.uri())
            .authenticate(&credential(Some("abc123")))
            .await
            .unwrap();
        assert_eq!(token.access_token.expose_secret(), "upstox-access-1");
        assert!(token.refresh_token.is_none());
    }

    #[tokio::test]
    async fn server_error_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/login/authorization/token"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let err = adapter(&server.uri())
            .authenticate(&credential(Some("abc123")))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn probe_uses_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/user/profile"))
            .and(header("Authorization", "Bearer upstox-access-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success", "data": {}
            })))
            .mount(&server)
            .await;
        let health = adapter(&server.uri())
            .test_connection(&credential(None), &token())
            .await;
        assert_eq!(health, ConnectionHealth::Healthy);
    }

    #[tokio::test]
    async fn broker_rate_limit_maps_to_quota_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/order/place"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        let order = OrderRequest {
            symbol: "INFY".into(),
            exchange: "NSE".into(),
            side: OrderSide::Sell,
            quantity: 2,
            order_type: OrderType::Limit,
            price: Some(1500.0),
            product: Product::Delivery,
        };
        let err = adapter(&server.uri())
            .place_order(&credential(None), &token(), &order)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerlinkError::QuotaExceeded { .. }));
    }
}
