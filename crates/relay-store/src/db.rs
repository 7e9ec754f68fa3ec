use rusqlite::Connection;

use relay_core::config::SyncMode;

use crate::error::Result;

/// Initialise the dedup and session tables.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS processed_messages (
            message_id  TEXT PRIMARY KEY,
            chat_id     TEXT NOT NULL,
            created_at  INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_processed_messages_chat_id
            ON processed_messages(chat_id);
        CREATE INDEX IF NOT EXISTS idx_processed_messages_created_at
            ON processed_messages(created_at);

        CREATE TABLE IF NOT EXISTS chat_sessions (
            chat_id     TEXT PRIMARY KEY,
            workspace   TEXT NOT NULL,
            thread_id   TEXT,
            sandbox     TEXT NOT NULL,
            updated_at  INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

/// Apply connection pragmas: WAL journal, the configured durability level,
/// and a busy timeout so concurrent writers wait instead of failing.
pub fn configure(conn: &Connection, sync: SyncMode) -> Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous={};
         PRAGMA foreign_keys=ON;
         PRAGMA busy_timeout=5000;",
        sync.pragma_value()
    ))?;
    Ok(())
}
