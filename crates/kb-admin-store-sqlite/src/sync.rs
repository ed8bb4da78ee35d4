use std::fmt::Debug;

use rusqlite::{params, Connection};

/// `system_metadata` row the sync job polls.
pub const SYNC_STATUS_KEY: &str = "bot_sync_status";

/// Records that the knowledge base changed and the chatbot index needs a rebuild.
///
/// Called with the mutation's open transaction, so the flag commits or rolls back with it.
pub trait SyncMarker: Send + Sync + Debug {
    /// # Errors
    /// Returns the underlying SQLite error when the flag cannot be written.
    fn mark_pending_sync(&self, conn: &Connection) -> rusqlite::Result<()>;
}

/// Sets `pending_update` on the `bot_sync_status` metadata row.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataSyncFlag;

impl SyncMarker for MetadataSyncFlag {
    fn mark_pending_sync(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO system_metadata(key, pending_update, updated_at)
             VALUES (?1, 1, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
             ON CONFLICT(key) DO UPDATE SET
               pending_update = 1,
               updated_at = excluded.updated_at",
            params![SYNC_STATUS_KEY],
        )?;
        Ok(())
    }
}

/// Leaves the flag untouched. For bulk loads that schedule their own sync.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSyncMarker;

impl SyncMarker for NoopSyncMarker {
    fn mark_pending_sync(&self, _conn: &Connection) -> rusqlite::Result<()> {
        Ok(())
    }
}
