// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sealed credential rows. Every mutation writes its audit entry in the
//! same transaction.

use brokerlink_core::BrokerlinkError;
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, map_tr_err};
use crate::models::{AuditAction, CredentialRow};

fn insert_audit(
    tx: &rusqlite::Transaction<'_>,
    user_id: &str,
    broker: &str,
    action: AuditAction,
    actor: &str,
    at: &str,
) -> Result<(), rusqlite::Error> {
    tx.execute(
        "INSERT INTO credential_audit (user_id, broker, action, actor, at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id, broker, action.as_str(), actor, at],
    )?;
    Ok(())
}

/// Insert or replace a credential and record a `put` audit entry.
///
/// `created_at` is preserved on update.
pub async fn upsert(db: &Database, row: CredentialRow, actor: &str) -> Result<(), BrokerlinkError> {
    let actor = actor.to_string();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO credentials (user_id, broker, ciphertext, nonce, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id, broker) DO UPDATE SET
                     ciphertext = excluded.ciphertext,
                     nonce = excluded.nonce,
                     updated_at = excluded.updated_at",
                params![
                    row.user_id,
                    row.broker,
                    row.ciphertext,
                    row.nonce,
                    row.created_at,
                    row.updated_at,
                ],
            )?;
            insert_audit(
                &tx,
                &row.user_id,
                &row.broker,
                AuditAction::Put,
                &actor,
                &row.updated_at,
            )?;
            tx.commit()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get(
    db: &Database,
    user_id: &str,
    broker: &str,
) -> Result<Option<CredentialRow>, BrokerlinkError> {
    let (user_id, broker) = (user_id.to_string(), broker.to_string());
    db.connection()
        .call(move |conn| -> Result<Option<CredentialRow>, rusqlite::Error> {
            conn.query_row(
                "SELECT user_id, broker, ciphertext, nonce, created_at, updated_at
                 FROM credentials WHERE user_id = ?1 AND broker = ?2",
                params![user_id, broker],
                |row| {
                    Ok(CredentialRow {
                        user_id: row.get(0)?,
                        broker: row.get(1)?,
                        ciphertext: row.get(2)?,
                        nonce: row.get(3)?,
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn exists(db: &Database, user_id: &str, broker: &str) -> Result<bool, BrokerlinkError> {
    let (user_id, broker) = (user_id.to_string(), broker.to_string());
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM credentials WHERE user_id = ?1 AND broker = ?2",
                params![user_id, broker],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Brokers the user has credentials for, alphabetically.
pub async fn list_brokers(db: &Database, user_id: &str) -> Result<Vec<String>, BrokerlinkError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Vec<String>, rusqlite::Error> {
            let mut stmt =
                conn.prepare("SELECT broker FROM credentials WHERE user_id = ?1 ORDER BY broker")?;
            let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Every (user, broker) pair that has a credential.
pub async fn list_all(db: &Database) -> Result<Vec<(String, String)>, BrokerlinkError> {
    db.connection()
        .call(|conn| -> Result<Vec<(String, String)>, rusqlite::Error> {
            let mut stmt =
                conn.prepare("SELECT user_id, broker FROM credentials ORDER BY user_id, broker")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Remove a credential, its saved session, and record a `delete` audit entry.
///
/// Returns `false` (and writes nothing) when no credential existed.
pub async fn delete(
    db: &Database,
    user_id: &str,
    broker: &str,
    actor: &str,
    at: &str,
) -> Result<bool, BrokerlinkError> {
    let (user_id, broker) = (user_id.to_string(), broker.to_string());
    let (actor, at) = (actor.to_string(), at.to_string());
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM credentials WHERE user_id = ?1 AND broker = ?2",
                params![user_id, broker],
            )?;
            if removed == 0 {
                return Ok(false);
            }
            tx.execute(
                "DELETE FROM saved_sessions WHERE user_id = ?1 AND broker = ?2",
                params![user_id, broker],
            )?;
            insert_audit(&tx, &user_id, &broker, AuditAction::Delete, &actor, &at)?;
            tx.commit()?;
            Ok(true)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::audit;
    use tempfile::tempdir;

    async fn open_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        (db, dir)
    }

    fn row(user: &str, broker: &str, ciphertext: &[u8], at: &str) -> CredentialRow {
        CredentialRow {
            user_id: user.into(),
            broker: broker.into(),
            ciphertext: ciphertext.to_vec(),
            nonce: vec![0; 12],
            created_at: at.into(),
            updated_at: at.into(),
        }
    }

    #[tokio::test]
    async fn upsert_preserves_created_at_and_audits_each_write() {
        let (db, _dir) = open_db().await;
        upsert(&db, row("alice", "zerodha", b"v1", "2026-03-01T00:00:00.000Z"), "alice")
            .await
            .unwrap();
        upsert(&db, row("alice", "zerodha", b"v2", "2026-03-02T00:00:00.000Z"), "alice")
            .await
            .unwrap();

        let stored = get(&db, "alice", "zerodha").await.unwrap().unwrap();
        assert_eq!(stored.ciphertext, b"v2");
        assert_eq!(stored.created_at, "2026-03-01T00:00:00.000Z");
        assert_eq!(stored.updated_at, "2026-03-02T00:00:00.000Z");

        let log = audit::list_for_user(&db, "alice", 10).await.unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|e| e.action == "put"));
    }

    #[tokio::test]
    async fn delete_missing_credential_writes_no_audit() {
        let (db, _dir) = open_db().await;
        let removed = delete(&db, "bob", "angel", "bob", "2026-03-01T00:00:00.000Z")
            .await
            .unwrap();
        assert!(!removed);
        assert!(audit::list_for_user(&db, "bob", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_brokers_is_scoped_to_user() {
        let (db, _dir) = open_db().await;
        let at = "2026-03-01T00:00:00.000Z";
        upsert(&db, row("alice", "upstox", b"x", at), "alice").await.unwrap();
        upsert(&db, row("alice", "angel", b"x", at), "alice").await.unwrap();
        upsert(&db, row("carol", "zerodha", b"x", at), "carol").await.unwrap();

        assert_eq!(
            list_brokers(&db, "alice").await.unwrap(),
            vec!["angel".to_string(), "upstox".to_string()]
        );
        assert_eq!(list_all(&db).await.unwrap().len(), 3);
        assert!(exists(&db, "carol", "zerodha").await.unwrap());
        assert!(!exists(&db, "carol", "angel").await.unwrap());
    }
}
