// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded schema migrations, applied on every open.

use brokerlink_core::BrokerlinkError;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Run all pending migrations against the given connection.
pub fn run_migrations(conn: &mut rusqlite::Connection) -> Result<(), BrokerlinkError> {
    embedded::migrations::runner()
        .run(conn)
        .map_err(|e| BrokerlinkError::Storage(format!("migration failed: {e}")))?;
    Ok(())
}
