// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading.
//!
//! Lookup order: `/etc/brokerlink/brokerlink.toml`, then
//! `~/.config/brokerlink/brokerlink.toml`, then `./brokerlink.toml`, then
//! `BROKERLINK_*` environment variables. Later layers win.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::BrokerlinkConfig;

pub(crate) const SYSTEM_CONFIG: &str = "/etc/brokerlink/brokerlink.toml";
pub(crate) const LOCAL_CONFIG: &str = "brokerlink.toml";

pub(crate) fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("brokerlink/brokerlink.toml"))
}

/// Load configuration from the standard hierarchy with env var overrides.
pub fn load_config() -> Result<BrokerlinkConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only. No files, no env.
pub fn load_config_from_str(toml_content: &str) -> Result<BrokerlinkConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(BrokerlinkConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from an explicit file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<BrokerlinkConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(BrokerlinkConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// The full figment, before extraction.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(BrokerlinkConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG))
        .merge(env_provider())
}

/// `BROKERLINK_*` provider. Uses an explicit key map instead of
/// `Env::split("_")` because field names contain underscores:
/// `BROKERLINK_SESSION_MAX_ATTEMPTS` must become `session.max_attempts`.
fn env_provider() -> Env {
    Env::prefixed("BROKERLINK_")
        .ignore(&["master_key"])
        .map(|key| map_env_key(key.as_str()).into())
}

/// Map a lowercased, prefix-stripped env var name to a dotted config path.
pub(crate) fn map_env_key(key: &str) -> String {
    const SECTIONS: [&str; 5] = ["server", "storage", "vault", "session", "log"];
    const NESTED: [&str; 2] = ["quota", "brokers"];
    const BROKERS: [&str; 3] = ["zerodha", "upstox", "angel"];

    for section in SECTIONS {
        if let Some(rest) = key.strip_prefix(section).and_then(|r| r.strip_prefix('_')) {
            return format!("{section}.{rest}");
        }
    }

    for section in NESTED {
        let Some(rest) = key.strip_prefix(section).and_then(|r| r.strip_prefix('_')) else {
            continue;
        };
        for broker in BROKERS {
            if let Some(field) = rest.strip_prefix(broker).and_then(|r| r.strip_prefix('_')) {
                return format!("{section}.{broker}.{field}");
            }
        }
        return format!("{section}.{rest}");
    }

    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_sections_map_on_first_underscore() {
        assert_eq!(map_env_key("session_max_attempts"), "session.max_attempts");
        assert_eq!(map_env_key("server_bearer_token"), "server.bearer_token");
        assert_eq!(map_env_key("log_level"), "log.level");
    }

    #[test]
    fn broker_sections_map_to_nested_tables() {
        assert_eq!(
            map_env_key("brokers_zerodha_base_url"),
            "brokers.zerodha.base_url"
        );
        assert_eq!(
            map_env_key("quota_angel_orders_limit"),
            "quota.angel.orders_limit"
        );
        assert_eq!(
            map_env_key("quota_reset_utc_offset_minutes"),
            "quota.reset_utc_offset_minutes"
        );
    }

    #[test]
    fn env_overrides_toml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "brokerlink.toml",
                "[session]\nmax_attempts = 3\n\n[server]\nport = 9000\n",
            )?;
            jail.set_env("BROKERLINK_SERVER_PORT", "9100");
            jail.set_env("BROKERLINK_BROKERS_UPSTOX_BASE_URL", "http://127.0.0.1:1234");

            let config = load_config_from_path(Path::new("brokerlink.toml"))?;
            assert_eq!(config.session.max_attempts, 3);
            assert_eq!(config.server.port, 9100);
            assert_eq!(config.brokers.upstox.base_url, "http://127.0.0.1:1234");
            Ok(())
        });
    }

    #[test]
    fn master_key_env_is_not_treated_as_config() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("brokerlink.toml", "")?;
            jail.set_env("BROKERLINK_MASTER_KEY", "00ff");
            let config = load_config_from_path(Path::new("brokerlink.toml"))?;
            assert_eq!(config.vault.key_env, "BROKERLINK_MASTER_KEY");
            Ok(())
        });
    }
}
