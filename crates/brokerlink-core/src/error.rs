// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy shared by the vault, adapters, session manager and gateway.

use thiserror::Error;

use crate::types::{BrokerKind, QuotaKind};

/// The primary error type used across Brokerlink.
///
/// Adapter-level failures are normalized into these variants before they
/// reach a caller. The enum is `Clone` so one failed login attempt can be
/// handed to every caller that joined it.
#[derive(Debug, Clone, Error)]
pub enum BrokerlinkError {
    /// Bad input, such as a malformed credential field set.
    #[error("validation error: {0}")]
    Validation(String),

    /// A requested credential, session or preference does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The broker rejected the credentials. Never retried.
    #[error("{broker} rejected the credentials: {message}")]
    AuthError { broker: BrokerKind, message: String },

    /// The session token lapsed, or login retries were exhausted.
    #[error("{broker} session expired: {message}")]
    AuthExpired { broker: BrokerKind, message: String },

    /// Transient network failure or broker outage, including timeouts.
    #[error("{broker} unreachable: {message}")]
    Unreachable { broker: BrokerKind, message: String },

    /// A quota window is full. The adapter was not invoked.
    #[error("{kind} quota of {limit} exhausted for {broker}")]
    QuotaExceeded {
        broker: BrokerKind,
        kind: QuotaKind,
        limit: u32,
    },

    /// Vault corruption or decryption failure. No automatic recovery.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Configuration errors (invalid values, missing master key source).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (connection, query failure, serialization).
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BrokerlinkError {
    /// Stable machine-readable name, used in API error bodies and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::AuthError { .. } => "auth_error",
            Self::AuthExpired { .. } => "auth_expired",
            Self::Unreachable { .. } => "unreachable",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::Fatal(_) => "fatal",
            Self::Config(_) => "config_error",
            Self::Storage(_) => "storage_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the session manager may retry the operation with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }

    /// Shorthand for a storage error built from any displayable source.
    pub fn storage(source: impl std::fmt::Display) -> Self {
        Self::Storage(source.to_string())
    }
}
