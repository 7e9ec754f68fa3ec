use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, instrument};

use relay_core::config::SyncMode;
use relay_core::SandboxMode;

use crate::db;
use crate::error::{Result, StoreError};
use crate::types::ConversationSession;

/// Thread-safe store for dedup records and conversation sessions.
///
/// Wraps a single SQLite connection in a `Mutex`; every operation is one
/// statement, so each insert/upsert is atomic at the row level and the lock
/// is never held across an `.await`.
pub struct RelayStore {
    db: Mutex<Connection>,
}

impl RelayStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Open (or create) the database file, apply pragmas and migrations.
    pub fn open(path: impl AsRef<Path>, sync: SyncMode) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Directory {
                path: parent.display().to_string(),
                source,
            })?;
        }
        info!(path = %path.display(), "opening SQLite store");
        let conn = Connection::open(path)?;
        db::configure(&conn, sync)?;
        db::init_db(&conn)?;
        Ok(Self::new(conn))
    }

    /// Non-durable store for replay runs and tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        db::init_db(&conn)?;
        Ok(Self::new(conn))
    }

    /// True iff a dedup record exists for `message_id`.
    #[instrument(skip(self))]
    pub fn is_processed(&self, message_id: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let hit: Option<i64> = db
            .query_row(
                "SELECT 1 FROM processed_messages WHERE message_id = ?1 LIMIT 1",
                rusqlite::params![message_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    /// Record that `message_id` reached a terminal state.
    ///
    /// Idempotent: a second call for the same id is a silent no-op.
    #[instrument(skip(self, at))]
    pub fn mark_processed(&self, message_id: &str, chat_id: &str, at: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().unwrap();
        let inserted = db.execute(
            "INSERT OR IGNORE INTO processed_messages (message_id, chat_id, created_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![message_id, chat_id, at.timestamp_millis()],
        )?;
        if inserted == 0 {
            debug!("message already marked processed");
        }
        Ok(())
    }

    /// Delete dedup records created before `older_than`. Returns the count.
    #[instrument(skip(self))]
    pub fn prune_processed(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let removed = db.execute(
            "DELETE FROM processed_messages WHERE created_at < ?1",
            rusqlite::params![older_than.timestamp_millis()],
        )?;
        Ok(removed)
    }

    /// Retrieve the session for a conversation, `None` if it has none yet.
    #[instrument(skip(self))]
    pub fn get_session(&self, chat_id: &str) -> Result<Option<ConversationSession>> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT chat_id, workspace, thread_id, sandbox, updated_at
                 FROM chat_sessions WHERE chat_id = ?1 LIMIT 1",
                rusqlite::params![chat_id],
                read_session_row,
            )
            .optional()?;
        row.map(into_session).transpose()
    }

    /// Replace the session for `chat_id` (insert on first use).
    #[instrument(skip(self, updated_at))]
    pub fn upsert_session(
        &self,
        chat_id: &str,
        workspace: &str,
        thread_id: Option<&str>,
        sandbox: SandboxMode,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO chat_sessions (chat_id, workspace, thread_id, sandbox, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(chat_id) DO UPDATE SET
                workspace  = excluded.workspace,
                thread_id  = excluded.thread_id,
                sandbox    = excluded.sandbox,
                updated_at = excluded.updated_at",
            rusqlite::params![
                chat_id,
                workspace,
                thread_id,
                sandbox.as_str(),
                updated_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    /// All sessions, most recently updated first.
    #[instrument(skip(self))]
    pub fn list_sessions(&self) -> Result<Vec<ConversationSession>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT chat_id, workspace, thread_id, sandbox, updated_at
             FROM chat_sessions
             ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], read_session_row)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(into_session(row?)?);
        }
        Ok(sessions)
    }
}

type SessionRow = (String, String, Option<String>, String, i64);

fn read_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

/// Map a raw row to a `ConversationSession`, rejecting unknown sandbox tags.
fn into_session(
    (chat_id, workspace, thread_id, sandbox, updated_at): SessionRow,
) -> Result<ConversationSession> {
    let sandbox = sandbox
        .parse::<SandboxMode>()
        .map_err(|e| StoreError::CorruptRow {
            table: "chat_sessions",
            reason: e.to_string(),
        })?;
    let updated_at = Utc
        .timestamp_millis_opt(updated_at)
        .single()
        .ok_or_else(|| StoreError::CorruptRow {
            table: "chat_sessions",
            reason: format!("bad updated_at {updated_at}"),
        })?;
    Ok(ConversationSession {
        chat_id,
        workspace,
        thread_id,
        sandbox,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().unwrap()
    }

    #[test]
    fn mark_processed_twice_is_a_noop() {
        let store = RelayStore::open_in_memory().unwrap();
        assert!(!store.is_processed("m1").unwrap());

        store.mark_processed("m1", "c1", ts(1)).unwrap();
        store.mark_processed("m1", "c1", ts(2)).unwrap();

        assert!(store.is_processed("m1").unwrap());
        let count: i64 = store
            .db
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM processed_messages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn upsert_session_is_last_write_wins() {
        let store = RelayStore::open_in_memory().unwrap();
        assert!(store.get_session("c1").unwrap().is_none());

        store
            .upsert_session("c1", "/a", Some("t1"), SandboxMode::ReadOnly, ts(10))
            .unwrap();
        store
            .upsert_session("c1", "/b", None, SandboxMode::WorkspaceWrite, ts(20))
            .unwrap();

        let session = store.get_session("c1").unwrap().expect("session");
        assert_eq!(
            session,
            ConversationSession {
                chat_id: "c1".to_string(),
                workspace: "/b".to_string(),
                thread_id: None,
                sandbox: SandboxMode::WorkspaceWrite,
                updated_at: ts(20),
            }
        );
        assert_eq!(store.list_sessions().unwrap().len(), 1);
    }

    #[test]
    fn list_sessions_is_newest_first() {
        let store = RelayStore::open_in_memory().unwrap();
        store
            .upsert_session("old", "/w", Some("t1"), SandboxMode::ReadOnly, ts(1))
            .unwrap();
        store
            .upsert_session("new", "/w", Some("t2"), SandboxMode::ReadOnly, ts(2))
            .unwrap();
        let ids: Vec<_> = store
            .list_sessions()
            .unwrap()
            .into_iter()
            .map(|s| s.chat_id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn prune_removes_only_old_records() {
        let store = RelayStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .mark_processed("old", "c", now - Duration::days(40))
            .unwrap();
        store.mark_processed("fresh", "c", now).unwrap();

        let removed = store.prune_processed(now - Duration::days(30)).unwrap();
        assert_eq!(removed, 1);
        assert!(!store.is_processed("old").unwrap());
        assert!(store.is_processed("fresh").unwrap());
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.sqlite3");
        {
            let store = RelayStore::open(&path, SyncMode::Full).unwrap();
            store.mark_processed("m1", "c1", Utc::now()).unwrap();
            store
                .upsert_session("c1", "/w", Some("t1"), SandboxMode::ReadOnly, Utc::now())
                .unwrap();
        }
        let store = RelayStore::open(&path, SyncMode::Normal).unwrap();
        assert!(store.is_processed("m1").unwrap());
        assert_eq!(
            store.get_session("c1").unwrap().unwrap().thread_id.as_deref(),
            Some("t1")
        );
    }

    #[test]
    fn corrupt_sandbox_is_reported() {
        let store = RelayStore::open_in_memory().unwrap();
        store
            .db
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO chat_sessions VALUES ('c1', '/w', NULL, 'root', 0)",
                [],
            )
            .unwrap();
        assert!(matches!(
            store.get_session("c1"),
            Err(StoreError::CorruptRow { .. })
        ));
    }

    #[test]
    fn concurrent_marks_are_safe() {
        let store = Arc::new(RelayStore::open_in_memory().unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        store
                            .mark_processed(&format!("m{}", j % 10), &format!("c{i}"), Utc::now())
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for j in 0..10 {
            assert!(store.is_processed(&format!("m{j}")).unwrap());
        }
    }
}
