// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so a typo in
//! `brokerlink.toml` fails at startup instead of being silently ignored.

use std::time::Duration;

use brokerlink_core::{BrokerKind, QuotaLimits};
use serde::{Deserialize, Serialize};

/// Top-level configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerlinkConfig {
    /// HTTP API settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// SQLite storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Master key source for the credential vault.
    #[serde(default)]
    pub vault: VaultConfig,

    /// Session lifecycle: timeouts, retries, token lifetime.
    #[serde(default)]
    pub session: SessionConfig,

    /// Rate-limit and order quota overrides.
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Broker API endpoints.
    #[serde(default)]
    pub brokers: BrokersConfig,

    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}

/// HTTP API configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token the settings UI must present. `None` rejects every
    /// authenticated request.
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Header carrying the calling user's id.
    #[serde(default = "default_user_header")]
    pub user_header: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "[redacted]"))
            .field("user_header", &self.user_header)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            bearer_token: None,
            user_header: default_user_header(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8600
}

fn default_user_header() -> String {
    "x-user-id".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL mode.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("brokerlink").join("brokerlink.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("brokerlink.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Where the vault master key comes from.
///
/// The key is 32 random bytes, hex encoded, provisioned by the operator's
/// secret manager. It is never derived from anything a user types.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VaultConfig {
    /// Environment variable holding the hex master key.
    #[serde(default = "default_key_env")]
    pub key_env: String,

    /// File holding the hex master key. Checked when the env var is unset.
    #[serde(default)]
    pub key_file: Option<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            key_env: default_key_env(),
            key_file: None,
        }
    }
}

fn default_key_env() -> String {
    "BROKERLINK_MASTER_KEY".to_string()
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Timeout applied to every broker call. Timeouts count as `Unreachable`.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Maximum login attempts before surfacing `AuthExpired`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay; doubles after every failed attempt.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Backoff ceiling.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Token lifetime used when a broker does not report one.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    /// How often the background sweeper checks for expired tokens.
    #[serde(default = "default_expiry_sweep_secs")]
    pub expiry_sweep_secs: u64,
}

impl SessionConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn expiry_sweep(&self) -> Duration {
        Duration::from_secs(self.expiry_sweep_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            token_ttl_secs: default_token_ttl_secs(),
            expiry_sweep_secs: default_expiry_sweep_secs(),
        }
    }
}

fn default_call_timeout_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    8_000
}

fn default_token_ttl_secs() -> u64 {
    8 * 60 * 60
}

fn default_expiry_sweep_secs() -> u64 {
    60
}

/// Quota configuration.
///
/// Brokers publish their own limits; the adapters carry those as defaults.
/// Top-level limits apply to every broker, per-broker tables win over them.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaConfig {
    #[serde(default)]
    pub api_calls_limit: Option<u32>,

    #[serde(default)]
    pub api_window_secs: Option<u64>,

    #[serde(default)]
    pub orders_limit: Option<u32>,

    /// UTC offset, in minutes, of the market day used for the daily order
    /// reset. Defaults to IST (+05:30).
    #[serde(default = "default_reset_utc_offset_minutes")]
    pub reset_utc_offset_minutes: i32,

    #[serde(default)]
    pub zerodha: QuotaOverride,

    #[serde(default)]
    pub upstox: QuotaOverride,

    #[serde(default)]
    pub angel: QuotaOverride,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            api_calls_limit: None,
            api_window_secs: None,
            orders_limit: None,
            reset_utc_offset_minutes: default_reset_utc_offset_minutes(),
            zerodha: QuotaOverride::default(),
            upstox: QuotaOverride::default(),
            angel: QuotaOverride::default(),
        }
    }
}

fn default_reset_utc_offset_minutes() -> i32 {
    330
}

impl QuotaConfig {
    pub fn override_for(&self, kind: BrokerKind) -> &QuotaOverride {
        match kind {
            BrokerKind::Zerodha => &self.zerodha,
            BrokerKind::Upstox => &self.upstox,
            BrokerKind::Angel => &self.angel,
        }
    }

    /// Effective limits for `kind`, starting from the broker's documented ones.
    pub fn limits_for(&self, kind: BrokerKind, documented: QuotaLimits) -> QuotaLimits {
        let o = self.override_for(kind);
        QuotaLimits {
            api_calls_limit: o
                .api_calls_limit
                .or(self.api_calls_limit)
                .unwrap_or(documented.api_calls_limit),
            api_window: o
                .api_window_secs
                .or(self.api_window_secs)
                .map(Duration::from_secs)
                .unwrap_or(documented.api_window),
            orders_limit: o
                .orders_limit
                .or(self.orders_limit)
                .unwrap_or(documented.orders_limit),
        }
    }
}

/// Per-broker quota override. Unset fields keep the documented default.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaOverride {
    #[serde(default)]
    pub api_calls_limit: Option<u32>,

    #[serde(default)]
    pub api_window_secs: Option<u64>,

    #[serde(default)]
    pub orders_limit: Option<u32>,
}

/// Broker endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BrokersConfig {
    #[serde(default = "default_zerodha")]
    pub zerodha: BrokerEndpoint,

    #[serde(default = "default_upstox")]
    pub upstox: BrokerEndpoint,

    #[serde(default = "default_angel")]
    pub angel: BrokerEndpoint,
}

impl BrokersConfig {
    pub fn endpoint(&self, kind: BrokerKind) -> &BrokerEndpoint {
        match kind {
            BrokerKind::Zerodha => &self.zerodha,
            BrokerKind::Upstox => &self.upstox,
            BrokerKind::Angel => &self.angel,
        }
    }
}

impl Default for BrokersConfig {
    fn default() -> Self {
        Self {
            zerodha: default_zerodha(),
            upstox: default_upstox(),
            angel: default_angel(),
        }
    }
}

/// One broker's API endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerEndpoint {
    /// Disabled brokers get no adapter and reject connection attempts.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub base_url: String,
}

fn default_enabled() -> bool {
    true
}

fn default_zerodha() -> BrokerEndpoint {
    BrokerEndpoint {
        enabled: true,
        base_url: "https://api.kite.trade".to_string(),
    }
}

fn default_upstox() -> BrokerEndpoint {
    BrokerEndpoint {
        enabled: true,
        base_url: "https://api.upstox.com".to_string(),
    }
}

fn default_angel() -> BrokerEndpoint {
    BrokerEndpoint {
        enabled: true,
        base_url: "https://apiconnect.angelone.in".to_string(),
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Default filter directive (trace, debug, info, warn, error).
    /// `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: BrokerlinkConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8600);
        assert_eq!(config.session.max_attempts, 5);
        assert_eq!(config.session.call_timeout(), Duration::from_secs(10));
        assert_eq!(config.quota.reset_utc_offset_minutes, 330);
        assert!(config.brokers.zerodha.enabled);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let result = toml::from_str::<BrokerlinkConfig>("[session]\nmax_attemps = 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn quota_override_replaces_only_set_fields() {
        let config: BrokerlinkConfig =
            toml::from_str("[quota.angel]\norders_limit = 20\n").unwrap();
        let limits = config
            .quota
            .limits_for(BrokerKind::Angel, QuotaLimits::default());
        assert_eq!(limits.orders_limit, 20);
        assert_eq!(limits.api_calls_limit, 200);

        let zerodha = config
            .quota
            .limits_for(BrokerKind::Zerodha, QuotaLimits::default());
        assert_eq!(zerodha, QuotaLimits::default());
    }

    #[test]
    fn per_broker_override_beats_global_limit() {
        let config: BrokerlinkConfig = toml::from_str(
            "[quota]\napi_calls_limit = 100\n\n[quota.upstox]\napi_calls_limit = 25\n",
        )
        .unwrap();
        let upstox = config
            .quota
            .limits_for(BrokerKind::Upstox, QuotaLimits::default());
        let angel = config
            .quota
            .limits_for(BrokerKind::Angel, QuotaLimits::default());
        assert_eq!(upstox.api_calls_limit, 25);
        assert_eq!(angel.api_calls_limit, 100);
    }

    #[test]
    fn server_debug_redacts_bearer_token() {
        let server = ServerConfig {
            bearer_token: Some("ui-secret-token".into()),
            ..ServerConfig::default()
        };
        let debug = format!("{server:?}");
        assert!(!debug.contains("ui-secret-token"));
        assert!(debug.contains("[redacted]"));
    }

    #[test]
    fn broker_endpoint_can_be_overridden() {
        let config: BrokerlinkConfig = toml::from_str(
            "[brokers.upstox]\nbase_url = \"http://127.0.0.1:9999\"\nenabled = false\n",
        )
        .unwrap();
        let upstox = config.brokers.endpoint(BrokerKind::Upstox);
        assert_eq!(upstox.base_url, "http://127.0.0.1:9999");
        assert!(!upstox.enabled);
    }
}
