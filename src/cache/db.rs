// SPDX-License-Identifier: MPL-2.0

use crate::cache::schema::SCHEMA;
use crate::cache::{CacheError, CacheEvent};
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CAPACITY: usize = 256;

/// Handle to the session cache. Clones share the same database.
#[derive(Clone)]
pub struct CacheDb {
    conn: Arc<Mutex<Connection>>,
    events: broadcast::Sender<CacheEvent>,
}

impl CacheDb {
    /// Fresh, empty cache for one client session
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        Self::migrate(&conn)?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            events,
        })
    }

    fn migrate(conn: &Connection) -> Result<(), CacheError> {
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Access connection for operations
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current unix timestamp
    pub fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Notify subscribers; having none is fine.
    pub fn emit(&self, event: CacheEvent) {
        if self.events.send(event).is_err() {
            debug!("cache event dropped, no subscribers");
        }
    }

    /// Drop every cached entity, e.g. when the signed-in user changes.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.conn().execute_batch(
            r#"
            DELETE FROM likes;
            DELETE FROM follows;
            DELETE FROM comments;
            DELETE FROM post_analytics;
            DELETE FROM posts;
            DELETE FROM profiles;
            "#,
        )?;
        self.emit(CacheEvent::Cleared);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_applies() {
        let db = CacheDb::open_in_memory().unwrap();
        let version: i64 = db
            .conn()
            .query_row("PRAGMA user_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_clones_share_state_and_events() {
        let db = CacheDb::open_in_memory().unwrap();
        let other = db.clone();
        let mut rx = db.subscribe();

        other
            .conn()
            .execute("INSERT INTO likes (user_id, post_id) VALUES ('u1', 'p1')", [])
            .unwrap();
        let n: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM likes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);

        other.clear().unwrap();
        assert_eq!(rx.try_recv().unwrap(), CacheEvent::Cleared);
    }
}
