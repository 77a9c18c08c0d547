// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP API for the Brokerlink settings UI.
//!
//! JSON over axum. Every `/api` route needs the configured bearer token and
//! an identity header naming the acting user; `/health` and `/metrics` are
//! open. Errors use one body shape, `{"error": <kind>, "message": ...}`,
//! and never carry raw broker payloads or secret values.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;

pub use auth::{AuthConfig, Caller};
pub use error::{ApiError, ErrorResponse};
pub use server::{GatewayState, HealthState, router, start_server};
