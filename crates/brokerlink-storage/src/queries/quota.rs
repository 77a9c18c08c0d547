// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Quota counter persistence.

use brokerlink_core::BrokerlinkError;
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, map_tr_err};
use crate::models::QuotaRow;

pub async fn load(
    db: &Database,
    user_id: &str,
    broker: &str,
) -> Result<Option<QuotaRow>, BrokerlinkError> {
    let (user_id, broker) = (user_id.to_string(), broker.to_string());
    db.connection()
        .call(move |conn| -> Result<Option<QuotaRow>, rusqlite::Error> {
            conn.query_row(
                "SELECT user_id, broker, api_calls_used, window_start, orders_used, orders_day
                 FROM quota_counters WHERE user_id = ?1 AND broker = ?2",
                params![user_id, broker],
                |row| {
                    Ok(QuotaRow {
                        user_id: row.get(0)?,
                        broker: row.get(1)?,
                        api_calls_used: row.get(2)?,
                        window_start: row.get(3)?,
                        orders_used: row.get(4)?,
                        orders_day: row.get(5)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn save(db: &Database, row: QuotaRow) -> Result<(), BrokerlinkError> {
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO quota_counters
                     (user_id, broker, api_calls_used, window_start, orders_used, orders_day)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id, broker) DO UPDATE SET
                     api_calls_used = excluded.api_calls_used,
                     window_start = excluded.window_start,
                     orders_used = excluded.orders_used,
                     orders_day = excluded.orders_day",
                params![
                    row.user_id,
                    row.broker,
                    row.api_calls_used,
                    row.window_start,
                    row.orders_used,
                    row.orders_day,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn delete(db: &Database, user_id: &str, broker: &str) -> Result<(), BrokerlinkError> {
    let (user_id, broker) = (user_id.to_string(), broker.to_string());
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "DELETE FROM quota_counters WHERE user_id = ?1 AND broker = ?2",
                params![user_id, broker],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn save_then_load_overwrites_counters() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("q.db").to_str().unwrap())
            .await
            .unwrap();
        let mut row = QuotaRow {
            user_id: "alice".into(),
            broker: "upstox".into(),
            api_calls_used: 3,
            window_start: "2026-03-02T09:15:00.000Z".into(),
            orders_used: 1,
            orders_day: "2026-03-02".into(),
        };
        save(&db, row.clone()).await.unwrap();
        row.api_calls_used = 4;
        save(&db, row.clone()).await.unwrap();

        assert_eq!(load(&db, "alice", "upstox").await.unwrap(), Some(row));
        delete(&db, "alice", "upstox").await.unwrap();
        assert_eq!(load(&db, "alice", "upstox").await.unwrap(), None);
    }
}
