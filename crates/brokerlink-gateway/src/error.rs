// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error responses.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use brokerlink_core::BrokerlinkError;
use serde::{Deserialize, Serialize};

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// A [`BrokerlinkError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub BrokerlinkError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BrokerlinkError::Validation(_) => StatusCode::BAD_REQUEST,
            BrokerlinkError::NotFound(_) => StatusCode::NOT_FOUND,
            BrokerlinkError::AuthError { .. } | BrokerlinkError::AuthExpired { .. } => {
                StatusCode::UNAUTHORIZED
            }
            BrokerlinkError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            BrokerlinkError::Unreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            BrokerlinkError::Fatal(_)
            | BrokerlinkError::Config(_)
            | BrokerlinkError::Storage(_)
            | BrokerlinkError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BrokerlinkError> for ApiError {
    fn from(e: BrokerlinkError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(BrokerlinkError::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self.0, "request failed");
            "internal error, see server logs".to_string()
        } else {
            self.0.to_string()
        };
        let body = ErrorResponse {
            error: self.0.kind().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brokerlink_core::{BrokerKind, QuotaKind};

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let cases = [
            (BrokerlinkError::Validation("x".into()), 400),
            (BrokerlinkError::NotFound("x".into()), 404),
            (
                BrokerlinkError::AuthError {
                    broker: BrokerKind::Zerodha,
                    message: "x".into(),
                },
                401,
            ),
            (
                BrokerlinkError::AuthExpired {
                    broker: BrokerKind::Zerodha,
                    message: "x".into(),
                },
                401,
            ),
            (
                BrokerlinkError::QuotaExceeded {
                    broker: BrokerKind::Zerodha,
                    kind: QuotaKind::Order,
                    limit: 50,
                },
                429,
            ),
            (
                BrokerlinkError::Unreachable {
                    broker: BrokerKind::Zerodha,
                    message: "x".into(),
                },
                503,
            ),
            (BrokerlinkError::Fatal("x".into()), 500),
            (BrokerlinkError::Storage("x".into()), 500),
        ];
        for (err, code) in cases {
            assert_eq!(ApiError(err).status().as_u16(), code);
        }
    }

    #[test]
    fn server_errors_hide_details() {
        let response = ApiError(BrokerlinkError::Storage("disk I/O error at /var/db".into()))
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
