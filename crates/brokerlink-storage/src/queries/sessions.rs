// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Saved (sealed) session tokens.

use brokerlink_core::BrokerlinkError;
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, map_tr_err};
use crate::models::SavedSessionRow;

fn from_row(row: &rusqlite::Row<'_>) -> Result<SavedSessionRow, rusqlite::Error> {
    Ok(SavedSessionRow {
        user_id: row.get(0)?,
        broker: row.get(1)?,
        ciphertext: row.get(2)?,
        nonce: row.get(3)?,
        expires_at: row.get(4)?,
        saved_at: row.get(5)?,
    })
}

pub async fn save(db: &Database, row: SavedSessionRow) -> Result<(), BrokerlinkError> {
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO saved_sessions (user_id, broker, ciphertext, nonce, expires_at, saved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id, broker) DO UPDATE SET
                     ciphertext = excluded.ciphertext,
                     nonce = excluded.nonce,
                     expires_at = excluded.expires_at,
                     saved_at = excluded.saved_at",
                params![
                    row.user_id,
                    row.broker,
                    row.ciphertext,
                    row.nonce,
                    row.expires_at,
                    row.saved_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get(
    db: &Database,
    user_id: &str,
    broker: &str,
) -> Result<Option<SavedSessionRow>, BrokerlinkError> {
    let (user_id, broker) = (user_id.to_string(), broker.to_string());
    db.connection()
        .call(move |conn| -> Result<Option<SavedSessionRow>, rusqlite::Error> {
            conn.query_row(
                "SELECT user_id, broker, ciphertext, nonce, expires_at, saved_at
                 FROM saved_sessions WHERE user_id = ?1 AND broker = ?2",
                params![user_id, broker],
                from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list_all(db: &Database) -> Result<Vec<SavedSessionRow>, BrokerlinkError> {
    db.connection()
        .call(|conn| -> Result<Vec<SavedSessionRow>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT user_id, broker, ciphertext, nonce, expires_at, saved_at
                 FROM saved_sessions ORDER BY user_id, broker",
            )?;
            let rows = stmt.query_map([], from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn delete(db: &Database, user_id: &str, broker: &str) -> Result<(), BrokerlinkError> {
    let (user_id, broker) = (user_id.to_string(), broker.to_string());
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "DELETE FROM saved_sessions WHERE user_id = ?1 AND broker = ?2",
                params![user_id, broker],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Drop every saved session a user has. Returns how many were removed.
pub async fn delete_for_user(db: &Database, user_id: &str) -> Result<usize, BrokerlinkError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                "DELETE FROM saved_sessions WHERE user_id = ?1",
                params![user_id],
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Drop every saved session that expired at or before `now`.
pub async fn delete_expired(db: &Database, now: &str) -> Result<usize, BrokerlinkError> {
    let now = now.to_string();
    db.connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                "DELETE FROM saved_sessions WHERE expires_at <= ?1",
                params![now],
            )
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(user: &str, expires_at: &str) -> SavedSessionRow {
        SavedSessionRow {
            user_id: user.into(),
            broker: "angel".into(),
            ciphertext: vec![1, 2, 3],
            nonce: vec![0; 12],
            expires_at: expires_at.into(),
            saved_at: "2026-03-02T03:00:00.000Z".into(),
        }
    }

    #[tokio::test]
    async fn delete_expired_keeps_live_sessions() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("s.db").to_str().unwrap())
            .await
            .unwrap();
        save(&db, row("alice", "2026-03-02T04:00:00.000Z")).await.unwrap();
        save(&db, row("bob", "2026-03-02T12:00:00.000Z")).await.unwrap();

        let removed = delete_expired(&db, "2026-03-02T04:00:00.000Z").await.unwrap();
        assert_eq!(removed, 1);
        let left = list_all(&db).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].user_id, "bob");
        assert!(get(&db, "alice", "angel").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_for_user_leaves_other_users() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("s.db").to_str().unwrap())
            .await
            .unwrap();
        save(&db, row("alice", "2026-03-02T12:00:00.000Z")).await.unwrap();
        save(&db, row("bob", "2026-03-02T12:00:00.000Z")).await.unwrap();

        assert_eq!(delete_for_user(&db, "alice").await.unwrap(), 1);
        assert!(get(&db, "bob", "angel").await.unwrap().is_some());
    }
}
