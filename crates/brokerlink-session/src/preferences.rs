// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trading preferences backed by the `preferences` table.

use brokerlink_core::{BrokerKind, BrokerlinkError, TradingPreference, UserId};
use brokerlink_storage::queries::preferences;
use brokerlink_storage::{Database, PreferenceRow, format_ts};
use chrono::{DateTime, Utc};
use tracing::warn;

fn from_row(row: PreferenceRow) -> TradingPreference {
    let default_broker = row.default_broker.as_deref().and_then(|b| {
        b.parse::<BrokerKind>()
            .inspect_err(|_| warn!(user = %row.user_id, broker = b, "ignoring unknown default broker"))
            .ok()
    });
    TradingPreference {
        user_id: UserId(row.user_id),
        default_broker,
        auto_login: row.auto_login,
        save_session: row.save_session,
    }
}

/// Read and write [`TradingPreference`]s. No validation happens here.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    db: Database,
}

impl PreferenceStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Stored preferences, or the defaults for a user who never saved any.
    pub async fn get(&self, user: &UserId) -> Result<TradingPreference, BrokerlinkError> {
        Ok(preferences::get(&self.db, user.as_str())
            .await?
            .map(from_row)
            .unwrap_or_else(|| TradingPreference::defaults_for(user.clone())))
    }

    pub async fn put(
        &self,
        pref: &TradingPreference,
        now: DateTime<Utc>,
    ) -> Result<(), BrokerlinkError> {
        preferences::upsert(
            &self.db,
            PreferenceRow {
                user_id: pref.user_id.to_string(),
                default_broker: pref.default_broker.map(|b| b.to_string()),
                auto_login: pref.auto_login,
                save_session: pref.save_session,
                updated_at: format_ts(now),
            },
        )
        .await
    }

    /// Everyone with auto-login switched on.
    pub async fn auto_login_users(&self) -> Result<Vec<TradingPreference>, BrokerlinkError> {
        Ok(preferences::list_auto_login(&self.db)
            .await?
            .into_iter()
            .map(from_row)
            .collect())
    }
}
