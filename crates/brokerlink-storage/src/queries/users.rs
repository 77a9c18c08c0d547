// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Whole-user operations.

use brokerlink_core::BrokerlinkError;
use rusqlite::params;

use crate::database::{Database, map_tr_err};
use crate::models::AuditAction;

/// Remove everything stored for a user in one transaction.
///
/// Each removed credential gets a `delete` audit entry; the audit log
/// itself is kept. Returns the brokers whose credentials were removed.
pub async fn purge(
    db: &Database,
    user_id: &str,
    actor: &str,
    at: &str,
) -> Result<Vec<String>, BrokerlinkError> {
    let (user_id, actor, at) = (user_id.to_string(), actor.to_string(), at.to_string());
    db.connection()
        .call(move |conn| -> Result<Vec<String>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let brokers: Vec<String> = {
                let mut stmt = tx.prepare("SELECT broker FROM credentials WHERE user_id = ?1")?;
                let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
                rows.collect::<Result<_, _>>()?
            };
            for broker in &brokers {
                tx.execute(
                    "INSERT INTO credential_audit (user_id, broker, action, actor, at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![user_id, broker, AuditAction::Delete.as_str(), actor, at],
                )?;
            }
            for table in ["credentials", "saved_sessions", "quota_counters", "preferences"] {
                tx.execute(
                    &format!("DELETE FROM {table} WHERE user_id = ?1"),
                    params![user_id],
                )?;
            }
            tx.commit()?;
            Ok(brokers)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CredentialRow, PreferenceRow};
    use crate::queries::{audit, credentials, preferences};
    use tempfile::tempdir;

    #[tokio::test]
    async fn purge_removes_user_rows_and_audits() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("u.db").to_str().unwrap())
            .await
            .unwrap();
        let at = "2026-03-02T00:00:00.000Z";
        for (user, broker) in [("alice", "zerodha"), ("alice", "upstox"), ("bob", "angel")] {
            credentials::upsert(
                &db,
                CredentialRow {
                    user_id: user.into(),
                    broker: broker.into(),
                    ciphertext: vec![9],
                    nonce: vec![0; 12],
                    created_at: at.into(),
                    updated_at: at.into(),
                },
                user,
            )
            .await
            .unwrap();
        }
        preferences::upsert(
            &db,
            PreferenceRow {
                user_id: "alice".into(),
                default_broker: Some("zerodha".into()),
                auto_login: false,
                save_session: false,
                updated_at: at.into(),
            },
        )
        .await
        .unwrap();

        let mut removed = purge(&db, "alice", "admin", at).await.unwrap();
        removed.sort();
        assert_eq!(removed, vec!["upstox".to_string(), "zerodha".to_string()]);
        assert!(credentials::list_brokers(&db, "alice").await.unwrap().is_empty());
        assert!(preferences::get(&db, "alice").await.unwrap().is_none());
        assert!(credentials::exists(&db, "bob", "angel").await.unwrap());

        let log = audit::list_for_user(&db, "alice", 10).await.unwrap();
        assert_eq!(log.iter().filter(|e| e.action == "delete").count(), 2);
    }
}
