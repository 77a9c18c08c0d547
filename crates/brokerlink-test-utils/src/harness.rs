// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles the vault, quota tracker and session manager over
//! a temp SQLite database, with one [`MockAdapter`] per broker and a
//! [`ManualClock`] the test controls.

use std::collections::HashMap;
use std::sync::Arc;

use brokerlink_config::SessionConfig;
use brokerlink_core::{
    BrokerAdapter, BrokerFields, BrokerKind, BrokerlinkError, Clock, ManualClock, QuotaLimits,
    UserId,
};
use brokerlink_quota::{InMemoryQuotaStore, QuotaTracker};
use brokerlink_security::SecretRegistry;
use brokerlink_session::SessionManager;
use brokerlink_storage::Database;
use brokerlink_vault::{CredentialVault, StaticKeyProvider};
use chrono::{DateTime, TimeZone, Utc};

use crate::mock_adapter::MockAdapter;

/// A valid field set for `kind`, for tests that do not care about the values.
pub fn sample_fields(kind: BrokerKind) -> serde_json::Value {
    match kind {
        BrokerKind::Zerodha => serde_json::json!({
            "api_key": "kiteapikey001",
            "api_secret": "kitesecretvalue001",
            "user_id": "AB1234",
            "totp_secret": "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ",
        }),
        BrokerKind::Upstox => serde_json::json!({
            "api_key": "upstoxkey001",
            "api_secret": "upstoxsecretvalue001",
            "redirect_uri": "https://example.com/upstox/callback",
            "auth_code": "authcode001",
        }),
        BrokerKind::Angel => serde_json::json!({
            "api_key": "angelkey001",
            "client_id": "A123456",
            "password": "angelpin001",
            "totp_secret": "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ",
        }),
    }
}

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    brokers: Vec<BrokerKind>,
    limits: HashMap<BrokerKind, QuotaLimits>,
    session: SessionConfig,
    start: DateTime<Utc>,
    refresh_tokens: bool,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            brokers: BrokerKind::ALL.to_vec(),
            limits: HashMap::new(),
            session: SessionConfig::default(),
            // 09:00 IST on a Monday.
            start: Utc.with_ymd_and_hms(2026, 3, 2, 3, 30, 0).single().unwrap_or_default(),
            refresh_tokens: false,
        }
    }

    /// Only enable these brokers.
    pub fn with_brokers(mut self, brokers: &[BrokerKind]) -> Self {
        self.brokers = brokers.to_vec();
        self
    }

    /// Override the quota limits for one broker.
    pub fn with_limits(mut self, broker: BrokerKind, limits: QuotaLimits) -> Self {
        self.limits.insert(broker, limits);
        self
    }

    pub fn with_session_config(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Start the manual clock at `start` instead of the default Monday morning.
    pub fn starting_at(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    /// Have the mock adapters issue refresh tokens.
    pub fn with_refresh_tokens(mut self) -> Self {
        self.refresh_tokens = true;
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub async fn build(self) -> Result<TestHarness, BrokerlinkError> {
        let temp_dir = tempfile::TempDir::new().map_err(BrokerlinkError::storage)?;
        let db_path = temp_dir.path().join("brokerlink-test.db");
        let db = Database::open(&db_path.to_string_lossy()).await?;

        let clock = ManualClock::new(self.start);
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let secrets = SecretRegistry::new();
        let vault = Arc::new(
            CredentialVault::open(
                db.clone(),
                &StaticKeyProvider::new([42u8; 32]),
                shared_clock.clone(),
                secrets.clone(),
            )
            .await?,
        );

        let mut mocks = HashMap::new();
        let mut adapters: Vec<Arc<dyn BrokerAdapter>> = Vec::new();
        for kind in &self.brokers {
            let limits = self.limits.get(kind).copied().unwrap_or_default();
            let mut mock = MockAdapter::new(*kind, shared_clock.clone()).with_limits(limits);
            if self.refresh_tokens {
                mock = mock.with_refresh_tokens();
            }
            let mock = Arc::new(mock);
            adapters.push(mock.clone());
            mocks.insert(*kind, mock);
        }

        let limits = adapters
            .iter()
            .map(|a| (a.kind(), a.quota_limits()))
            .collect();
        let quota_store = Arc::new(InMemoryQuotaStore::new());
        let quota = Arc::new(QuotaTracker::new(
            quota_store.clone(),
            shared_clock.clone(),
            limits,
            330,
        )?);

        let manager = SessionManager::new(
            adapters,
            vault.clone(),
            quota.clone(),
            shared_clock,
            &self.session,
        );

        Ok(TestHarness {
            manager,
            vault,
            quota,
            quota_store,
            db,
            clock,
            secrets,
            mocks,
            session_config: self.session,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete session stack with mock brokers and temp storage.
pub struct TestHarness {
    /// The session manager under test.
    pub manager: SessionManager,
    pub vault: Arc<CredentialVault>,
    pub quota: Arc<QuotaTracker>,
    /// Counter storage behind `quota`, for seeding usage.
    pub quota_store: Arc<InMemoryQuotaStore>,
    pub db: Database,
    /// Drives token expiry and quota windows.
    pub clock: ManualClock,
    pub secrets: SecretRegistry,
    mocks: HashMap<BrokerKind, Arc<MockAdapter>>,
    session_config: SessionConfig,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// The mock adapter for `kind`.
    ///
    /// # Panics
    ///
    /// If `kind` was not enabled in the builder.
    pub fn mock(&self, kind: BrokerKind) -> &Arc<MockAdapter> {
        &self.mocks[&kind]
    }

    /// Store the [`sample_fields`] credential for `user`.
    pub async fn store_credential(
        &self,
        user: &UserId,
        kind: BrokerKind,
    ) -> Result<(), BrokerlinkError> {
        let fields = BrokerFields::parse(kind, sample_fields(kind))?;
        self.manager.put_credential(user, kind, fields, "test").await
    }

    /// A second manager over the same vault, database and quota tracker,
    /// as after a process restart. Fresh mocks are not created; the existing
    /// ones are shared.
    pub fn restarted_manager(&self) -> SessionManager {
        let adapters = BrokerKind::ALL
            .into_iter()
            .filter_map(|k| self.mocks.get(&k))
            .map(|m| m.clone() as Arc<dyn BrokerAdapter>)
            .collect();
        SessionManager::new(
            adapters,
            self.vault.clone(),
            self.quota.clone(),
            Arc::new(self.clock.clone()),
            &self.session_config,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brokerlink_core::SessionState;

    #[tokio::test]
    async fn harness_connects_through_mock() {
        let harness = TestHarness::builder().build().await.unwrap();
        let alice = UserId::parse("alice").unwrap();
        harness
            .store_credential(&alice, BrokerKind::Upstox)
            .await
            .unwrap();

        let snapshot = harness
            .manager
            .connect(&alice, BrokerKind::Upstox)
            .await
            .unwrap();
        assert_eq!(snapshot.state, SessionState::Connected);
        assert_eq!(harness.mock(BrokerKind::Upstox).auth_calls(), 1);
    }

    #[tokio::test]
    async fn sample_fields_validate_for_every_broker() {
        for kind in BrokerKind::ALL {
            let fields = BrokerFields::parse(kind, sample_fields(kind)).unwrap();
            fields.validate().unwrap();
        }
    }
}
