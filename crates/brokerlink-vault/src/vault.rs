// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Credential vault lifecycle: open, put, get, delete, list, mask, audit.
//!
//! Records are sealed with the master key under associated data
//! `credential|<user>|<broker>`. A sealed key-check value in `vault_meta`
//! detects a wrong master key at open time.

use std::sync::Arc;

use brokerlink_core::{
    BrokerCredential, BrokerFields, BrokerKind, BrokerlinkError, Clock, UserId,
    credential::FieldValue,
};
use brokerlink_security::SecretRegistry;
use brokerlink_storage::models::{AuditAction, CredentialRow, format_ts, parse_ts};
use brokerlink_storage::{Database, queries};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use secrecy::ExposeSecret;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::crypto;
use crate::key::KeyProvider;

const KEY_CHECK_META: &str = "key_check";
const KEY_CHECK_PLAINTEXT: &[u8] = b"brokerlink-key-check-v1";
const KEY_CHECK_AAD: &[u8] = b"key_check";

/// What a sealed blob protects. Part of the associated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealPurpose {
    Credential,
    Session,
}

impl SealPurpose {
    fn as_str(self) -> &'static str {
        match self {
            SealPurpose::Credential => "credential",
            SealPurpose::Session => "session",
        }
    }
}

/// A ciphertext (tag appended) and its nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlob {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; 12],
}

/// One audit log entry. Never carries secret values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub user_id: UserId,
    pub broker: BrokerKind,
    pub action: &'static str,
    pub actor: String,
    pub at: DateTime<Utc>,
}

/// One field of a masked credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaskedField {
    pub name: &'static str,
    pub value: String,
    pub secret: bool,
}

/// What the settings page shows for a stored credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaskedCredential {
    pub broker: BrokerKind,
    pub fields: Vec<MaskedField>,
    pub updated_at: DateTime<Utc>,
}

/// The credential vault. Holds the master key in memory only.
pub struct CredentialVault {
    master_key: Zeroizing<[u8; 32]>,
    db: Database,
    clock: Arc<dyn Clock>,
    secrets: SecretRegistry,
    locks: DashMap<(UserId, BrokerKind), Arc<Mutex<()>>>,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("master_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

fn aad(purpose: SealPurpose, user: &UserId, broker: BrokerKind) -> Vec<u8> {
    format!("{}|{}|{}", purpose.as_str(), user, broker).into_bytes()
}

fn parse_broker(raw: &str) -> Result<BrokerKind, BrokerlinkError> {
    raw.parse()
        .map_err(|_| BrokerlinkError::Fatal(format!("unknown broker `{raw}` in vault")))
}

fn nonce_from(bytes: &[u8]) -> Result<[u8; 12], BrokerlinkError> {
    bytes
        .try_into()
        .map_err(|_| BrokerlinkError::Fatal("stored nonce is not 12 bytes".to_string()))
}

/// Mask a secret for display: `****wxyz`, or `****` for short values.
/// Only the tail is ever shown.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() < 8 {
        return "****".to_string();
    }
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("****{suffix}")
}

impl CredentialVault {
    /// Load the master key and verify it against the stored key check.
    ///
    /// The first open of a fresh database writes the key check. Later opens
    /// with a different key fail with [`BrokerlinkError::Fatal`].
    pub async fn open(
        db: Database,
        provider: &dyn KeyProvider,
        clock: Arc<dyn Clock>,
        secrets: SecretRegistry,
    ) -> Result<Self, BrokerlinkError> {
        let master_key = provider.load()?.ok_or_else(|| {
            BrokerlinkError::Config(format!(
                "no vault master key found (looked in {}); run `brokerlink keygen`",
                provider.describe()
            ))
        })?;

        match queries::meta::get(&db, KEY_CHECK_META).await? {
            Some(stored) => {
                if stored.len() < 12 {
                    return Err(BrokerlinkError::Fatal("vault key check is corrupted".into()));
                }
                let (nonce, ciphertext) = stored.split_at(12);
                let plaintext = crypto::open(&master_key, &nonce_from(nonce)?, ciphertext, KEY_CHECK_AAD)
                    .map_err(|_| {
                        BrokerlinkError::Fatal(
                            "master key does not match this vault; refusing to start".into(),
                        )
                    })?;
                if plaintext != KEY_CHECK_PLAINTEXT {
                    return Err(BrokerlinkError::Fatal("vault key check is corrupted".into()));
                }
                debug!("vault key check passed");
            }
            None => {
                let (ciphertext, nonce) = crypto::seal(&master_key, KEY_CHECK_PLAINTEXT, KEY_CHECK_AAD)?;
                let mut stored = nonce.to_vec();
                stored.extend_from_slice(&ciphertext);
                queries::meta::put(&db, KEY_CHECK_META, stored).await?;
                info!("vault initialized");
            }
        }

        Ok(Self {
            master_key,
            db,
            clock,
            secrets,
            locks: DashMap::new(),
        })
    }

    fn record_lock(&self, user: &UserId, broker: BrokerKind) -> Arc<Mutex<()>> {
        self.locks
            .entry((user.clone(), broker))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Seal arbitrary bytes bound to (purpose, user, broker).
    pub fn seal(
        &self,
        purpose: SealPurpose,
        user: &UserId,
        broker: BrokerKind,
        plaintext: &[u8],
    ) -> Result<SealedBlob, BrokerlinkError> {
        let (ciphertext, nonce) =
            crypto::seal(&self.master_key, plaintext, &aad(purpose, user, broker))?;
        Ok(SealedBlob { ciphertext, nonce })
    }

    /// Open bytes sealed by [`Self::seal`] with the same binding.
    pub fn open_sealed(
        &self,
        purpose: SealPurpose,
        user: &UserId,
        broker: BrokerKind,
        blob: &SealedBlob,
    ) -> Result<Zeroizing<Vec<u8>>, BrokerlinkError> {
        crypto::open(
            &self.master_key,
            &blob.nonce,
            &blob.ciphertext,
            &aad(purpose, user, broker),
        )
        .map(Zeroizing::new)
    }

    /// Validate, seal and upsert a credential, with its audit entry, atomically.
    pub async fn put(
        &self,
        user: &UserId,
        broker: BrokerKind,
        fields: BrokerFields,
        actor: &str,
    ) -> Result<(), BrokerlinkError> {
        if fields.kind() != broker {
            return Err(BrokerlinkError::Validation(format!(
                "field set is for {}, not {broker}",
                fields.kind()
            )));
        }
        fields.validate()?;

        let plaintext = Zeroizing::new(
            fields
                .to_sealable_json()
                .map_err(|e| BrokerlinkError::Internal(format!("credential encoding failed: {e}")))?,
        );
        let sealed = self.seal(SealPurpose::Credential, user, broker, plaintext.as_bytes())?;
        let now = format_ts(self.clock.now());

        let lock = self.record_lock(user, broker);
        let _guard = lock.lock().await;
        queries::credentials::upsert(
            &self.db,
            CredentialRow {
                user_id: user.to_string(),
                broker: broker.to_string(),
                ciphertext: sealed.ciphertext,
                nonce: sealed.nonce.to_vec(),
                created_at: now.clone(),
                updated_at: now,
            },
            actor,
        )
        .await?;

        for value in fields.secret_values() {
            self.secrets.register(&value);
        }
        info!(user = %user, broker = %broker, "credential stored");
        Ok(())
    }

    /// Decrypt a stored credential.
    pub async fn get(
        &self,
        user: &UserId,
        broker: BrokerKind,
    ) -> Result<BrokerCredential, BrokerlinkError> {
        let row = queries::credentials::get(&self.db, user.as_str(), &broker.to_string())
            .await?
            .ok_or_else(|| BrokerlinkError::NotFound(format!("no {broker} credential for {user}")))?;

        let blob = SealedBlob {
            nonce: nonce_from(&row.nonce)?,
            ciphertext: row.ciphertext,
        };
        let plaintext = self.open_sealed(SealPurpose::Credential, user, broker, &blob)?;
        let json = std::str::from_utf8(&plaintext)
            .map_err(|_| BrokerlinkError::Fatal("decrypted credential is not UTF-8".into()))?;
        let fields = BrokerFields::from_sealed_json(broker, json)
            .map_err(|e| BrokerlinkError::Fatal(format!("decrypted credential is malformed: {e}")))?;

        for value in fields.secret_values() {
            self.secrets.register(&value);
        }

        let updated_at = parse_ts(&row.updated_at).unwrap_or_else(|| {
            warn!(user = %user, broker = %broker, "unparseable credential timestamp");
            self.clock.now()
        });
        Ok(BrokerCredential {
            user_id: user.clone(),
            fields,
            updated_at,
        })
    }

    pub async fn exists(&self, user: &UserId, broker: BrokerKind) -> Result<bool, BrokerlinkError> {
        queries::credentials::exists(&self.db, user.as_str(), &broker.to_string()).await
    }

    /// Remove a credential and any saved session for it. `NotFound` if absent.
    pub async fn delete(
        &self,
        user: &UserId,
        broker: BrokerKind,
        actor: &str,
    ) -> Result<(), BrokerlinkError> {
        let lock = self.record_lock(user, broker);
        let _guard = lock.lock().await;
        let removed = queries::credentials::delete(
            &self.db,
            user.as_str(),
            &broker.to_string(),
            actor,
            &format_ts(self.clock.now()),
        )
        .await?;
        if !removed {
            return Err(BrokerlinkError::NotFound(format!(
                "no {broker} credential for {user}"
            )));
        }
        queries::preferences::clear_default_broker(&self.db, user.as_str(), &broker.to_string())
            .await?;
        info!(user = %user, broker = %broker, "credential deleted");
        Ok(())
    }

    /// Brokers this user has stored credentials for.
    pub async fn list_brokers(&self, user: &UserId) -> Result<Vec<BrokerKind>, BrokerlinkError> {
        queries::credentials::list_brokers(&self.db, user.as_str())
            .await?
            .iter()
            .map(|b| parse_broker(b))
            .collect()
    }

    /// Every configured (user, broker) pair.
    pub async fn list_all(&self) -> Result<Vec<(UserId, BrokerKind)>, BrokerlinkError> {
        queries::credentials::list_all(&self.db)
            .await?
            .into_iter()
            .map(|(user, broker)| Ok((UserId(user), parse_broker(&broker)?)))
            .collect()
    }

    /// Field names with masked previews. Secrets never leave this function.
    pub async fn masked(
        &self,
        user: &UserId,
        broker: BrokerKind,
    ) -> Result<MaskedCredential, BrokerlinkError> {
        let credential = self.get(user, broker).await?;
        let fields = credential
            .fields
            .entries()
            .into_iter()
            .map(|(name, value)| match value {
                FieldValue::Plain(v) => MaskedField {
                    name,
                    value: v.to_string(),
                    secret: false,
                },
                FieldValue::Secret(s) => MaskedField {
                    name,
                    value: mask_secret(s.expose_secret()),
                    secret: true,
                },
            })
            .collect();
        Ok(MaskedCredential {
            broker,
            fields,
            updated_at: credential.updated_at,
        })
    }

    /// Remove every record for a user. Returns the brokers that had credentials.
    pub async fn delete_user(
        &self,
        user: &UserId,
        actor: &str,
    ) -> Result<Vec<BrokerKind>, BrokerlinkError> {
        let locks: Vec<_> = BrokerKind::ALL
            .iter()
            .map(|b| self.record_lock(user, *b))
            .collect();
        let mut guards = Vec::with_capacity(locks.len());
        for lock in &locks {
            guards.push(lock.lock().await);
        }

        let removed =
            queries::users::purge(&self.db, user.as_str(), actor, &format_ts(self.clock.now()))
                .await?;
        drop(guards);
        for broker in BrokerKind::ALL {
            self.locks.remove(&(user.clone(), broker));
        }

        info!(user = %user, removed = removed.len(), "user data deleted");
        removed.iter().map(|b| parse_broker(b)).collect()
    }

    /// Most recent audit entries for a user, newest first.
    pub async fn audit_log(
        &self,
        user: &UserId,
        limit: u32,
    ) -> Result<Vec<AuditEntry>, BrokerlinkError> {
        queries::audit::list_for_user(&self.db, user.as_str(), limit)
            .await?
            .into_iter()
            .map(|row| {
                let action = AuditAction::parse(&row.action)
                    .ok_or_else(|| BrokerlinkError::storage(format!("bad audit action `{}`", row.action)))?;
                Ok(AuditEntry {
                    id: row.id,
                    user_id: UserId(row.user_id),
                    broker: parse_broker(&row.broker)?,
                    action: action.as_str(),
                    actor: row.actor,
                    at: parse_ts(&row.at)
                        .ok_or_else(|| BrokerlinkError::storage("bad audit timestamp"))?,
                })
            })
            .collect()
    }

    /// The registry decrypted values are reported to.
    pub fn secrets(&self) -> &SecretRegistry {
        &self.secrets
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::StaticKeyProvider;
    use brokerlink_core::SystemClock;
    use tempfile::tempdir;

    const KEY: [u8; 32] = [7u8; 32];

    async fn open_vault(dir: &tempfile::TempDir, key: [u8; 32]) -> CredentialVault {
        let db = Database::open(dir.path().join("vault.db").to_str().unwrap())
            .await
            .unwrap();
        CredentialVault::open(
            db,
            &StaticKeyProvider::new(key),
            Arc::new(SystemClock),
            SecretRegistry::new(),
        )
        .await
        .unwrap()
    }

    fn zerodha_fields() -> BrokerFields {
        BrokerFields::parse(
            BrokerKind::Zerodha,
            serde_json::json!({
                "api_key": "kiteapikey001",
                "api_secret": "kite-api-secret-0042",
                "user_id": "AB1234",
                "totp_secret": "JBSWY3DPEHPK3PXP"
            }),
        )
        .unwrap()
    }

    fn alice() -> UserId {
        UserId::parse("alice").unwrap()
    }

    #[tokio::test]
    async fn put_then_get_returns_same_fields() {
        let dir = tempdir().unwrap();
        let vault = open_vault(&dir, KEY).await;
        vault
            .put(&alice(), BrokerKind::Zerodha, zerodha_fields(), "alice")
            .await
            .unwrap();

        let credential = vault.get(&alice(), BrokerKind::Zerodha).await.unwrap();
        match credential.fields {
            BrokerFields::Zerodha(f) => {
                assert_eq!(f.api_key.expose_secret(), "kiteapikey001");
                assert_eq!(f.api_secret.expose_secret(), "kite-api-secret-0042");
                assert_eq!(f.user_id, "AB1234");
                assert_eq!(
                    f.totp_secret.as_ref().map(|s| s.expose_secret().to_string()),
                    Some("JBSWY3DPEHPK3PXP".to_string())
                );
            }
            other => panic!("unexpected fields: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stored_bytes_never_contain_plaintext_secrets() {
        let dir = tempdir().unwrap();
        let vault = open_vault(&dir, KEY).await;
        vault
            .put(&alice(), BrokerKind::Zerodha, zerodha_fields(), "alice")
            .await
            .unwrap();
        vault.database().close().await.unwrap();

        let raw = std::fs::read(dir.path().join("vault.db")).unwrap();
        for secret in ["kiteapikey001", "kite-api-secret-0042", "JBSWY3DPEHPK3PXP"] {
            assert!(
                !raw.windows(secret.len()).any(|w| w == secret.as_bytes()),
                "plaintext {secret} found in database file"
            );
        }
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let vault = open_vault(&dir, KEY).await;
        let err = vault.get(&alice(), BrokerKind::Angel).await.unwrap_err();
        assert!(matches!(err, BrokerlinkError::NotFound(_)));
        let err = vault
            .delete(&alice(), BrokerKind::Angel, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerlinkError::NotFound(_)));
    }

    #[tokio::test]
    async fn mismatched_field_kind_is_rejected() {
        let dir = tempdir().unwrap();
        let vault = open_vault(&dir, KEY).await;
        let err = vault
            .put(&alice(), BrokerKind::Upstox, zerodha_fields(), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerlinkError::Validation(_)));
    }

    #[tokio::test]
    async fn wrong_master_key_is_fatal() {
        let dir = tempdir().unwrap();
        {
            let vault = open_vault(&dir, KEY).await;
            vault.database().close().await.unwrap();
        }
        let db = Database::open(dir.path().join("vault.db").to_str().unwrap())
            .await
            .unwrap();
        let err = CredentialVault::open(
            db,
            &StaticKeyProvider::new([9u8; 32]),
            Arc::new(SystemClock),
            SecretRegistry::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BrokerlinkError::Fatal(_)));
    }

    #[tokio::test]
    async fn swapped_rows_fail_to_decrypt() {
        let dir = tempdir().unwrap();
        let vault = open_vault(&dir, KEY).await;
        let bob = UserId::parse("bob").unwrap();
        vault
            .put(&alice(), BrokerKind::Zerodha, zerodha_fields(), "alice")
            .await
            .unwrap();
        vault
            .put(&bob, BrokerKind::Zerodha, zerodha_fields(), "bob")
            .await
            .unwrap();

        // Copy alice's sealed row over bob's.
        vault
            .database()
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "UPDATE credentials SET
                        ciphertext = (SELECT ciphertext FROM credentials WHERE user_id = 'alice'),
                        nonce = (SELECT nonce FROM credentials WHERE user_id = 'alice')
                     WHERE user_id = 'bob'",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let err = vault.get(&bob, BrokerKind::Zerodha).await.unwrap_err();
        assert!(matches!(err, BrokerlinkError::Fatal(_)));
    }

    #[tokio::test]
    async fn masked_view_hides_secrets() {
        let dir = tempdir().unwrap();
        let vault = open_vault(&dir, KEY).await;
        vault
            .put(&alice(), BrokerKind::Zerodha, zerodha_fields(), "alice")
            .await
            .unwrap();

        let masked = vault.masked(&alice(), BrokerKind::Zerodha).await.unwrap();
        let rendered = serde_json::to_string(&masked).unwrap();
        assert!(!rendered.contains("kite-api-secret-0042"));
        assert!(rendered.contains("AB1234"));
        let secret = masked.fields.iter().find(|f| f.name == "api_secret").unwrap();
        assert_eq!(secret.value, "****0042");
    }

    #[tokio::test]
    async fn put_registers_secrets_for_redaction() {
        let dir = tempdir().unwrap();
        let vault = open_vault(&dir, KEY).await;
        vault
            .put(&alice(), BrokerKind::Zerodha, zerodha_fields(), "alice")
            .await
            .unwrap();
        let line = vault.secrets().redact("sent kite-api-secret-0042 upstream");
        assert_eq!(line, "sent [REDACTED] upstream");
    }

    #[tokio::test]
    async fn delete_user_removes_all_brokers_and_audits() {
        let dir = tempdir().unwrap();
        let vault = open_vault(&dir, KEY).await;
        vault
            .put(&alice(), BrokerKind::Zerodha, zerodha_fields(), "alice")
            .await
            .unwrap();
        let upstox = BrokerFields::parse(
            BrokerKind::Upstox,
            serde_json::json!({
                "api_key": "upstox-key-1",
                "api_secret": "upstox-secret-1",
                "redirect_uri": "https://example.com/callback"
            }),
        )
        .unwrap();
        vault
            .put(&alice(), BrokerKind::Upstox, upstox, "alice")
            .await
            .unwrap();

        let mut removed = vault.delete_user(&alice(), "admin").await.unwrap();
        removed.sort();
        assert_eq!(removed, vec![BrokerKind::Zerodha, BrokerKind::Upstox]);
        assert!(vault.list_brokers(&alice()).await.unwrap().is_empty());

        let log = vault.audit_log(&alice(), 10).await.unwrap();
        assert_eq!(log.len(), 4);
        assert_eq!(log[0].action, "delete");
        assert_eq!(log[0].actor, "admin");
    }

    #[tokio::test]
    async fn concurrent_puts_to_one_record_serialize() {
        let dir = tempdir().unwrap();
        let vault = Arc::new(open_vault(&dir, KEY).await);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let vault = vault.clone();
            handles.push(tokio::spawn(async move {
                vault
                    .put(&alice(), BrokerKind::Zerodha, zerodha_fields(), "alice")
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(vault.audit_log(&alice(), 100).await.unwrap().len(), 8);
        assert!(vault.get(&alice(), BrokerKind::Zerodha).await.is_ok());
    }

    #[test]
    fn mask_secret_formats() {
        assert_eq!(mask_secret("short"), "****");
        assert_eq!(mask_secret("seven77"), "****");
        assert_eq!(mask_secret("abcdefghijklmnop"), "****mnop");
        assert!(!mask_secret("kite_api_secret_0042").contains("kite"));
    }
}
