// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Route handlers.
//!
//! Handlers translate HTTP into session-manager calls and back. Responses
//! never carry secret values: credentials come back masked and sessions as
//! snapshots without tokens.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use brokerlink_core::{
    BrokerFields, BrokerKind, BrokerlinkError, ConnectionHealth, OrderAck, OrderRequest,
    TradingPreference, UserId,
};
use brokerlink_session::SessionSnapshot;
use brokerlink_status::BrokerStatus;
use serde::{Deserialize, Serialize};

use crate::auth::Caller;
use crate::error::ApiError;
use crate::server::GatewayState;

type ApiResult<T> = Result<T, ApiError>;

/// Parse the `{kind}` path segment, suggesting the closest broker on a typo.
fn broker_kind(raw: &str) -> Result<BrokerKind, BrokerlinkError> {
    raw.parse::<BrokerKind>().map_err(|_| {
        let closest = BrokerKind::ALL
            .into_iter()
            .map(|k| (k, strsim::jaro_winkler(&k.to_string(), &raw.to_lowercase())))
            .filter(|(_, score)| *score > 0.8)
            .max_by(|a, b| a.1.total_cmp(&b.1));
        match closest {
            Some((k, _)) => {
                BrokerlinkError::Validation(format!("unknown broker `{raw}` (did you mean `{k}`?)"))
            }
            None => BrokerlinkError::Validation(format!("unknown broker `{raw}`")),
        }
    })
}

/// Body of `POST /api/brokers/{kind}/test`.
#[derive(Debug, Serialize)]
pub struct TestConnectionResponse {
    pub broker: BrokerKind,
    pub health: ConnectionHealth,
    pub session: SessionSnapshot,
}

/// Body of `GET /api/brokers/status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub user_id: UserId,
    pub brokers: Vec<BrokerStatus>,
}

/// Body of `PUT /api/preferences`. The user comes from the identity header.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreferenceUpdate {
    #[serde(default)]
    pub default_broker: Option<BrokerKind>,
    #[serde(default)]
    pub auto_login: bool,
    #[serde(default)]
    pub save_session: bool,
}

/// Body of `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

/// POST /api/brokers/{kind}/credentials
pub async fn put_credential(
    State(state): State<GatewayState>,
    Caller(user): Caller,
    Path(kind): Path<String>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> ApiResult<Response> {
    let broker = broker_kind(&kind)?;
    let Json(body) = body?;
    let fields = BrokerFields::parse(broker, body)?;
    state
        .manager
        .put_credential(&user, broker, fields, user.as_str())
        .await?;
    let masked = state.manager.vault().masked(&user, broker).await?;
    Ok((StatusCode::OK, Json(masked)).into_response())
}

/// GET /api/brokers/{kind}/credentials
pub async fn get_credential(
    State(state): State<GatewayState>,
    Caller(user): Caller,
    Path(kind): Path<String>,
) -> ApiResult<Response> {
    let broker = broker_kind(&kind)?;
    let masked = state.manager.vault().masked(&user, broker).await?;
    Ok(Json(masked).into_response())
}

/// DELETE /api/brokers/{kind}/credentials
pub async fn delete_credential(
    State(state): State<GatewayState>,
    Caller(user): Caller,
    Path(kind): Path<String>,
) -> ApiResult<StatusCode> {
    let broker = broker_kind(&kind)?;
    state
        .manager
        .delete_credential(&user, broker, user.as_str())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/brokers/{kind}/test
pub async fn test_connection(
    State(state): State<GatewayState>,
    Caller(user): Caller,
    Path(kind): Path<String>,
) -> ApiResult<Json<TestConnectionResponse>> {
    let broker = broker_kind(&kind)?;
    let health = state.manager.test_connection(&user, broker).await?;
    let session = state.manager.session(&user, broker).await?;
    Ok(Json(TestConnectionResponse {
        broker,
        health,
        session,
    }))
}

/// POST /api/brokers/{kind}/logout
pub async fn logout(
    State(state): State<GatewayState>,
    Caller(user): Caller,
    Path(kind): Path<String>,
) -> ApiResult<StatusCode> {
    let broker = broker_kind(&kind)?;
    state.manager.logout(&user, broker).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/brokers/{kind}/orders
pub async fn place_order(
    State(state): State<GatewayState>,
    Caller(user): Caller,
    Path(kind): Path<String>,
    body: Result<Json<OrderRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<OrderAck>)> {
    let broker = broker_kind(&kind)?;
    let Json(order) = body?;
    let ack = state.manager.place_order(&user, broker, &order).await?;
    Ok((StatusCode::CREATED, Json(ack)))
}

/// GET /api/brokers/status
pub async fn get_status(
    State(state): State<GatewayState>,
    Caller(user): Caller,
) -> ApiResult<Json<StatusResponse>> {
    let brokers = state.status.get_status(&user).await?;
    Ok(Json(StatusResponse {
        user_id: user,
        brokers,
    }))
}

/// GET /api/preferences
pub async fn get_preferences(
    State(state): State<GatewayState>,
    Caller(user): Caller,
) -> ApiResult<Json<TradingPreference>> {
    Ok(Json(state.manager.preferences(&user).await?))
}

/// PUT /api/preferences
pub async fn put_preferences(
    State(state): State<GatewayState>,
    Caller(user): Caller,
    body: Result<Json<PreferenceUpdate>, JsonRejection>,
) -> ApiResult<Json<TradingPreference>> {
    let Json(update) = body?;
    let pref = TradingPreference {
        user_id: user,
        default_broker: update.default_broker,
        auto_login: update.auto_login,
        save_session: update.save_session,
    };
    Ok(Json(state.manager.update_preferences(pref).await?))
}

/// GET /health -- unauthenticated liveness.
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.health.start_time.elapsed().as_secs(),
    })
}

/// GET /metrics -- Prometheus text format.
pub async fn get_metrics(State(state): State<GatewayState>) -> Response {
    match &state.health.prometheus_render {
        Some(render) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_kind_parses_case_insensitively() {
        assert_eq!(broker_kind("Zerodha").unwrap(), BrokerKind::Zerodha);
        assert_eq!(broker_kind("angel").unwrap(), BrokerKind::Angel);
    }

    #[test]
    fn broker_kind_suggests_on_typo() {
        let err = broker_kind("zerodah").unwrap_err();
        assert!(err.to_string().contains("did you mean `zerodha`"), "{err}");
        let err = broker_kind("robinhood").unwrap_err();
        assert!(!err.to_string().contains("did you mean"));
    }

    #[test]
    fn preference_update_rejects_unknown_fields() {
        let parsed: Result<PreferenceUpdate, _> =
            serde_json::from_str(r#"{"auto_login": true, "user_id": "mallory"}"#);
        assert!(parsed.is_err());
        let parsed: PreferenceUpdate =
            serde_json::from_str(r#"{"default_broker": "upstox"}"#).unwrap();
        assert_eq!(parsed.default_broker, Some(BrokerKind::Upstox));
        assert!(!parsed.save_session);
    }
}
