// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation.
//!
//! Collects every problem instead of failing on the first one.

use brokerlink_core::BrokerKind;

use crate::diagnostic::ConfigError;
use crate::model::BrokerlinkConfig;

/// Validate a deserialized configuration for semantic correctness.
pub fn validate_config(config: &BrokerlinkConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    let host = config.server.host.trim();
    if host.is_empty() {
        fail("server.host must not be empty".to_string());
    } else if host.parse::<std::net::IpAddr>().is_err()
        && !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        fail(format!("server.host `{host}` is not a valid IP address or hostname"));
    }

    if let Some(token) = &config.server.bearer_token
        && token.len() < 16
    {
        fail("server.bearer_token must be at least 16 characters".to_string());
    }

    if config.server.user_header.trim().is_empty() {
        fail("server.user_header must not be empty".to_string());
    }

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    if config.vault.key_env.trim().is_empty() && config.vault.key_file.is_none() {
        fail("vault needs either key_env or key_file to locate the master key".to_string());
    }

    let session = &config.session;
    if session.call_timeout_secs == 0 {
        fail("session.call_timeout_secs must be at least 1".to_string());
    }
    if session.max_attempts == 0 {
        fail("session.max_attempts must be at least 1".to_string());
    }
    if session.backoff_base_ms == 0 {
        fail("session.backoff_base_ms must be at least 1".to_string());
    }
    if session.backoff_base_ms > session.backoff_max_ms {
        fail(format!(
            "session.backoff_base_ms ({}) must not exceed session.backoff_max_ms ({})",
            session.backoff_base_ms, session.backoff_max_ms
        ));
    }
    if session.token_ttl_secs < 60 {
        fail(format!(
            "session.token_ttl_secs must be at least 60, got {}",
            session.token_ttl_secs
        ));
    }
    if session.expiry_sweep_secs == 0 {
        fail("session.expiry_sweep_secs must be at least 1".to_string());
    }

    let offset = config.quota.reset_utc_offset_minutes;
    if !(-720..=840).contains(&offset) {
        fail(format!(
            "quota.reset_utc_offset_minutes must be within -720..=840, got {offset}"
        ));
    }

    if config.quota.api_calls_limit == Some(0) {
        fail("quota.api_calls_limit must be at least 1".to_string());
    }
    if config.quota.api_window_secs == Some(0) {
        fail("quota.api_window_secs must be at least 1".to_string());
    }

    for kind in BrokerKind::ALL {
        let o = config.quota.override_for(kind);
        if o.api_calls_limit == Some(0) {
            fail(format!("quota.{kind}.api_calls_limit must be at least 1"));
        }
        if o.api_window_secs == Some(0) {
            fail(format!("quota.{kind}.api_window_secs must be at least 1"));
        }

        let endpoint = config.brokers.endpoint(kind);
        if !(endpoint.base_url.starts_with("https://") || endpoint.base_url.starts_with("http://"))
        {
            fail(format!(
                "brokers.{kind}.base_url `{}` must be an http(s) URL",
                endpoint.base_url
            ));
        }
    }

    if config.log.level.trim().is_empty() {
        fail("log.level must not be empty".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
