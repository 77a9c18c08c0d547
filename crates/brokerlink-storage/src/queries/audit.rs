// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Credential audit log reads. Writes happen inside credential transactions.

use brokerlink_core::BrokerlinkError;
use rusqlite::params;

use crate::database::{Database, map_tr_err};
use crate::models::AuditRow;

/// Most recent audit entries for a user, newest first.
pub async fn list_for_user(
    db: &Database,
    user_id: &str,
    limit: u32,
) -> Result<Vec<AuditRow>, BrokerlinkError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Vec<AuditRow>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, broker, action, actor, at
                 FROM credential_audit WHERE user_id = ?1
                 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![user_id, limit], |row| {
                Ok(AuditRow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    broker: row.get(2)?,
                    action: row.get(3)?,
                    actor: row.get(4)?,
                    at: row.get(5)?,
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}
