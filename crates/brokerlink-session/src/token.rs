// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sealing session tokens for the `saved_sessions` table.

use brokerlink_core::{BrokerKind, BrokerlinkError, SessionToken, UserId};
use brokerlink_storage::{SavedSessionRow, format_ts, parse_ts};
use brokerlink_vault::{CredentialVault, SealPurpose, SealedBlob};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    #[zeroize(skip)]
    issued_at: DateTime<Utc>,
    #[zeroize(skip)]
    expires_at: DateTime<Utc>,
}

/// Seal `token` into a row bound to (user, broker).
pub fn seal_token(
    vault: &CredentialVault,
    user: &UserId,
    broker: BrokerKind,
    token: &SessionToken,
    saved_at: DateTime<Utc>,
) -> Result<SavedSessionRow, BrokerlinkError> {
    let stored = StoredToken {
        access_token: token.access_token.expose_secret().to_string(),
        refresh_token: token
            .refresh_token
            .as_ref()
            .map(|t| t.expose_secret().to_string()),
        issued_at: token.issued_at,
        expires_at: token.expires_at,
    };
    let json = Zeroizing::new(
        serde_json::to_vec(&stored)
            .map_err(|e| BrokerlinkError::Internal(format!("token encoding failed: {e}")))?,
    );
    let sealed = vault.seal(SealPurpose::Session, user, broker, &json)?;
    Ok(SavedSessionRow {
        user_id: user.to_string(),
        broker: broker.to_string(),
        ciphertext: sealed.ciphertext,
        nonce: sealed.nonce.to_vec(),
        expires_at: format_ts(token.expires_at),
        saved_at: format_ts(saved_at),
    })
}

/// Open a saved row. Tampered or swapped rows fail with `Fatal`.
pub fn open_token(
    vault: &CredentialVault,
    user: &UserId,
    broker: BrokerKind,
    row: &SavedSessionRow,
) -> Result<(SessionToken, Option<DateTime<Utc>>), BrokerlinkError> {
    let nonce: [u8; 12] = row
        .nonce
        .as_slice()
        .try_into()
        .map_err(|_| BrokerlinkError::Fatal("saved session nonce is not 12 bytes".into()))?;
    let blob = SealedBlob {
        ciphertext: row.ciphertext.clone(),
        nonce,
    };
    let plaintext = vault.open_sealed(SealPurpose::Session, user, broker, &blob)?;
    let stored: StoredToken = serde_json::from_slice(&plaintext)
        .map_err(|e| BrokerlinkError::Fatal(format!("saved session is malformed: {e}")))?;

    let token = SessionToken {
        access_token: SecretString::from(stored.access_token.clone()),
        refresh_token: stored.refresh_token.clone().map(SecretString::from),
        issued_at: stored.issued_at,
        expires_at: stored.expires_at,
    };
    Ok((token, parse_ts(&row.saved_at)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use brokerlink_core::SystemClock;
    use brokerlink_security::SecretRegistry;
    use brokerlink_storage::Database;
    use brokerlink_vault::StaticKeyProvider;
    use std::sync::Arc;

    #[tokio::test]
    async fn sealed_token_is_bound_to_its_owner() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        let vault = CredentialVault::open(
            db,
            &StaticKeyProvider::new([9u8; 32]),
            Arc::new(SystemClock),
            SecretRegistry::new(),
        )
        .await
        .unwrap();
        let alice = UserId::parse("alice").unwrap();
        let bob = UserId::parse("bob").unwrap();
        let now = Utc::now();
        let token = SessionToken {
            access_token: SecretString::from("access-abc".to_string()),
            refresh_token: Some(SecretString::from("refresh-xyz".to_string())),
            issued_at: now,
            expires_at: now + chrono::Duration::hours(2),
        };

        let row = seal_token(&vault, &alice, BrokerKind::Angel, &token, now).unwrap();
        assert!(!row.ciphertext.windows(10).any(|w| w == b"access-abc"));

        let (opened, saved_at) = open_token(&vault, &alice, BrokerKind::Angel, &row).unwrap();
        assert_eq!(opened.access_token.expose_secret(), "access-abc");
        assert_eq!(
            opened.refresh_token.as_ref().unwrap().expose_secret(),
            "refresh-xyz"
        );
        assert!(saved_at.is_some());

        let err = open_token(&vault, &bob, BrokerKind::Angel, &row).unwrap_err();
        assert_eq!(err.kind(), "fatal");
    }
}
