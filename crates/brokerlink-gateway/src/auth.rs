// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authentication for the API routes.
//!
//! The settings UI presents `Authorization: Bearer <token>` and names the
//! acting user in a header (`X-User-Id` by default). With no token
//! configured every request is rejected (fail-closed).

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{StatusCode, request::Parts},
    middleware::Next,
    response::Response,
};
use brokerlink_core::{BrokerlinkError, UserId};

use crate::error::ApiError;
use crate::server::GatewayState;

/// Authentication configuration for the gateway.
#[derive(Clone)]
pub struct AuthConfig {
    /// Expected bearer token. `None` rejects everything.
    pub bearer_token: Option<String>,
    /// Header carrying the calling user's id.
    pub user_header: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "[redacted]"),
            )
            .field("user_header", &self.user_header)
            .finish()
    }
}

/// Middleware that checks the bearer token.
pub async fn auth_middleware(
    State(auth): State<AuthConfig>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = auth.bearer_token.as_deref() else {
        tracing::error!("no bearer token configured -- rejecting request");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let presented = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected => Ok(next.run(request).await),
        _ => {
            tracing::debug!(path = %request.uri().path(), "bearer token rejected");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// The acting user, taken from the configured identity header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub UserId);

impl FromRequestParts<GatewayState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &GatewayState,
    ) -> Result<Self, Self::Rejection> {
        let header = state.auth.user_header.as_str();
        let raw = parts
            .headers
            .get(header)
            .ok_or_else(|| BrokerlinkError::Validation(format!("missing `{header}` header")))?
            .to_str()
            .map_err(|_| BrokerlinkError::Validation(format!("`{header}` is not valid text")))?;
        Ok(Caller(UserId::parse(raw)?))
    }
}
