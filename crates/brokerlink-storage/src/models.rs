// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types for the persisted tables.
//!
//! Timestamps are stored as RFC 3339 strings with millisecond precision.

use chrono::{DateTime, SecondsFormat, Utc};

/// A sealed credential record. `ciphertext` includes the GCM tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRow {
    pub user_id: String,
    pub broker: String,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub created_at: String,
    pub updated_at: String,
}

/// What happened to a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Put,
    Delete,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Put => "put",
            AuditAction::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "put" => Some(AuditAction::Put),
            "delete" => Some(AuditAction::Delete),
            _ => None,
        }
    }
}

/// One credential audit entry. Never carries secret values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRow {
    pub id: i64,
    pub user_id: String,
    pub broker: String,
    pub action: String,
    pub actor: String,
    pub at: String,
}

/// Persisted quota counters for one (user, broker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaRow {
    pub user_id: String,
    pub broker: String,
    pub api_calls_used: u32,
    pub window_start: String,
    pub orders_used: u32,
    /// Market-local calendar day (`YYYY-MM-DD`) the order counter belongs to.
    pub orders_day: String,
}

/// Persisted trading preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceRow {
    pub user_id: String,
    pub default_broker: Option<String>,
    pub auto_login: bool,
    pub save_session: bool,
    pub updated_at: String,
}

/// A sealed session token saved for restore after restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedSessionRow {
    pub user_id: String,
    pub broker: String,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub expires_at: String,
    pub saved_at: String,
}

/// Format a timestamp the way every table stores it.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp.
pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
