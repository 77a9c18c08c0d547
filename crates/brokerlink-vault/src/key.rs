// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Master key sources.
//!
//! The master key is 32 random bytes, hex encoded, provisioned out of band
//! (`brokerlink keygen`, then a secret manager). It is never derived from a
//! user password.

use std::path::PathBuf;

use brokerlink_config::VaultConfig;
use brokerlink_core::BrokerlinkError;
use zeroize::Zeroizing;

/// Something that can produce the vault master key.
pub trait KeyProvider: Send + Sync {
    /// `Ok(None)` when this source is not configured at all; an error when
    /// it is configured but unusable.
    fn load(&self) -> Result<Option<Zeroizing<[u8; 32]>>, BrokerlinkError>;

    /// Where the key comes from, for logs. Never the key itself.
    fn describe(&self) -> String;
}

/// Decode a 64-character hex string into a key.
pub fn parse_hex_key(raw: &str) -> Result<Zeroizing<[u8; 32]>, BrokerlinkError> {
    let trimmed = Zeroizing::new(raw.trim().to_string());
    let mut key = Zeroizing::new([0u8; 32]);
    hex::decode_to_slice(trimmed.as_bytes(), key.as_mut_slice()).map_err(|_| {
        BrokerlinkError::Config(
            "master key must be exactly 64 hex characters (32 bytes)".to_string(),
        )
    })?;
    Ok(key)
}

/// Reads the hex key from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvKeyProvider {
    var: String,
}

impl EnvKeyProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl KeyProvider for EnvKeyProvider {
    fn load(&self) -> Result<Option<Zeroizing<[u8; 32]>>, BrokerlinkError> {
        match std::env::var(&self.var) {
            Ok(value) if !value.trim().is_empty() => {
                let value = Zeroizing::new(value);
                parse_hex_key(&value).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn describe(&self) -> String {
        format!("env:{}", self.var)
    }
}

/// Reads the hex key from a file.
#[derive(Debug, Clone)]
pub struct FileKeyProvider {
    path: PathBuf,
}

impl FileKeyProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl KeyProvider for FileKeyProvider {
    fn load(&self) -> Result<Option<Zeroizing<[u8; 32]>>, BrokerlinkError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path).map(Zeroizing::new).map_err(|e| {
            BrokerlinkError::Config(format!(
                "cannot read master key file {}: {e}",
                self.path.display()
            ))
        })?;
        parse_hex_key(&content).map(Some)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// A fixed key, for tests and embedding.
pub struct StaticKeyProvider {
    key: Zeroizing<[u8; 32]>,
}

impl StaticKeyProvider {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }
}

impl KeyProvider for StaticKeyProvider {
    fn load(&self) -> Result<Option<Zeroizing<[u8; 32]>>, BrokerlinkError> {
        Ok(Some(self.key.clone()))
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

/// Tries each provider in order and uses the first one that is configured.
pub struct ChainKeyProvider {
    providers: Vec<Box<dyn KeyProvider>>,
}

impl ChainKeyProvider {
    pub fn new(providers: Vec<Box<dyn KeyProvider>>) -> Self {
        Self { providers }
    }
}

impl KeyProvider for ChainKeyProvider {
    fn load(&self) -> Result<Option<Zeroizing<[u8; 32]>>, BrokerlinkError> {
        for provider in &self.providers {
            if let Some(key) = provider.load()? {
                tracing::debug!(source = %provider.describe(), "master key loaded");
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    fn describe(&self) -> String {
        self.providers
            .iter()
            .map(|p| p.describe())
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// The configured key sources: the env var first, then the key file.
pub fn key_provider_from_config(config: &VaultConfig) -> ChainKeyProvider {
    let mut providers: Vec<Box<dyn KeyProvider>> = Vec::new();
    if !config.key_env.trim().is_empty() {
        providers.push(Box::new(EnvKeyProvider::new(config.key_env.clone())));
    }
    if let Some(path) = &config.key_file {
        providers.push(Box::new(FileKeyProvider::new(path)));
    }
    ChainKeyProvider::new(providers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const HEX_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn parses_hex_key() {
        let key = parse_hex_key(&format!("  {HEX_KEY}\n")).unwrap();
        assert_eq!(key[0], 0x00);
        assert_eq!(key[31], 0x1f);
    }

    #[test]
    fn rejects_short_or_non_hex_key() {
        assert!(parse_hex_key("abcd").is_err());
        assert!(parse_hex_key(&"zz".repeat(32)).is_err());
    }

    #[test]
    #[serial]
    fn env_provider_reads_variable() {
        let var = "BROKERLINK_TEST_MASTER_KEY_ENV";
        // SAFETY: test-only env mutation, serialized with #[serial].
        unsafe { std::env::set_var(var, HEX_KEY) };
        let loaded = EnvKeyProvider::new(var).load();
        unsafe { std::env::remove_var(var) };
        assert!(loaded.unwrap().is_some());
    }

    #[test]
    #[serial]
    fn chain_falls_back_to_file_when_env_unset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.key");
        std::fs::write(&path, HEX_KEY).unwrap();

        let config = VaultConfig {
            key_env: "BROKERLINK_TEST_UNSET_KEY_VAR".to_string(),
            key_file: Some(path.display().to_string()),
        };
        let provider = key_provider_from_config(&config);
        let key = provider.load().unwrap().unwrap();
        assert_eq!(key[1], 0x01);
        assert!(provider.describe().contains("file:"));
    }

    #[test]
    #[serial]
    fn chain_reports_none_when_nothing_configured() {
        let config = VaultConfig {
            key_env: "BROKERLINK_TEST_UNSET_KEY_VAR".to_string(),
            key_file: None,
        };
        assert!(key_provider_from_config(&config).load().unwrap().is_none());
    }

    #[test]
    #[serial]
    fn malformed_env_key_is_an_error_not_a_fallback() {
        let var = "BROKERLINK_TEST_BAD_KEY_ENV";
        unsafe { std::env::set_var(var, "not-hex") };
        let loaded = EnvKeyProvider::new(var).load();
        unsafe { std::env::remove_var(var) };
        assert!(matches!(loaded, Err(BrokerlinkError::Config(_))));
    }
}
