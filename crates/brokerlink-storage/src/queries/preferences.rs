// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trading preference persistence.

use brokerlink_core::BrokerlinkError;
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, map_tr_err};
use crate::models::PreferenceRow;

fn from_row(row: &rusqlite::Row<'_>) -> Result<PreferenceRow, rusqlite::Error> {
    Ok(PreferenceRow {
        user_id: row.get(0)?,
        default_broker: row.get(1)?,
        auto_login: row.get(2)?,
        save_session: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

pub async fn get(db: &Database, user_id: &str) -> Result<Option<PreferenceRow>, BrokerlinkError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<PreferenceRow>, rusqlite::Error> {
            conn.query_row(
                "SELECT user_id, default_broker, auto_login, save_session, updated_at
                 FROM preferences WHERE user_id = ?1",
                params![user_id],
                from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn upsert(db: &Database, row: PreferenceRow) -> Result<(), BrokerlinkError> {
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO preferences (user_id, default_broker, auto_login, save_session, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                     default_broker = excluded.default_broker,
                     auto_login = excluded.auto_login,
                     save_session = excluded.save_session,
                     updated_at = excluded.updated_at",
                params![
                    row.user_id,
                    row.default_broker,
                    row.auto_login,
                    row.save_session,
                    row.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Clear `default_broker` if it points at `broker`.
pub async fn clear_default_broker(
    db: &Database,
    user_id: &str,
    broker: &str,
) -> Result<(), BrokerlinkError> {
    let (user_id, broker) = (user_id.to_string(), broker.to_string());
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "UPDATE preferences SET default_broker = NULL
                 WHERE user_id = ?1 AND default_broker = ?2",
                params![user_id, broker],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Users who opted into auto-login.
pub async fn list_auto_login(db: &Database) -> Result<Vec<PreferenceRow>, BrokerlinkError> {
    db.connection()
        .call(|conn| -> Result<Vec<PreferenceRow>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT user_id, default_broker, auto_login, save_session, updated_at
                 FROM preferences WHERE auto_login = 1 ORDER BY user_id",
            )?;
            let rows = stmt.query_map([], from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}
