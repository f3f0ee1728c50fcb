//! Attribution storage with SQLite
//!
//! `Store` is the single storage handle for the process. It is constructed
//! once at startup and handed to every component that needs it; the
//! identity store and the event log are two views over the same pool.

mod events;
mod identity;
mod schema;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::StorageError;

pub use schema::SCHEMA;

pub type StoreResult<T> = Result<T, StorageError>;

// ============================================
// DOMAIN TYPES
// ============================================

/// Snapshot of a user's profile as observed on one interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl Identity {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            username: None,
            first_name: None,
            last_name: None,
        }
    }

    /// "First Last", whichever parts are present
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|p| !p.trim().is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// Stored identity row
#[derive(Debug, Clone)]
pub struct IdentityRow {
    pub identity: Identity,
    pub first_seen_at: String,
    pub last_touched_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Start,
    Click,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Start => "start",
            EventType::Click => "click",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(EventType::Start),
            "click" => Some(EventType::Click),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Identifier assigned by the event log on append
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub i64);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Stored attribution event row
#[derive(Debug, Clone)]
pub struct AttributionEvent {
    pub id: EventId,
    pub occurred_at: String,
    pub event_type: EventType,
    pub keyword: String,
    pub user_id: i64,
    pub chat_id: i64,
}

/// Listing filter for `EventLog::recent`
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub user_id: Option<i64>,
    pub event_type: Option<EventType>,
    pub keyword: Option<String>,
    pub limit: Option<usize>,
}

// ============================================
// COMPONENT CONTRACTS
// ============================================

/// Durable table of known users
pub trait IdentityStore: Send + Sync {
    /// Insert or overwrite the profile for `identity.user_id`. Last writer wins.
    fn upsert(&self, identity: &Identity, now: DateTime<Utc>) -> StoreResult<()>;

    fn get(&self, user_id: i64) -> StoreResult<Option<IdentityRow>>;
}

/// Append-only ledger of start/click events
pub trait EventLog: Send + Sync {
    /// Append one event; the returned id is strictly greater than every earlier one.
    fn append(
        &self,
        event_type: EventType,
        keyword: &str,
        user_id: i64,
        chat_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<EventId>;

    /// Start event with the greatest id for this user
    fn latest_start(&self, user_id: i64) -> StoreResult<Option<AttributionEvent>>;

    /// Newest-first listing
    fn recent(&self, filter: &EventFilter) -> StoreResult<Vec<AttributionEvent>>;
}

// ============================================
// STORE HANDLE
// ============================================

#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
    retry_attempts: u32,
}

impl Store {
    pub fn open(path: &Path, config: &DatabaseConfig) -> StoreResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let busy_timeout_ms = config.busy_timeout_ms;
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.execute_batch(&format!(
                "PRAGMA busy_timeout={busy_timeout_ms};
                 PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;"
            ))
        });
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(Duration::from_millis(busy_timeout_ms.max(1000) * 2))
            .build(manager)?;

        let store = Self {
            pool,
            retry_attempts: config.retry_attempts,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Run a write, retrying busy/locked failures within the configured budget
    fn with_retry<T>(
        &self,
        op: impl Fn(&rusqlite::Connection) -> rusqlite::Result<T>,
    ) -> StoreResult<T> {
        let mut attempt = 0;
        loop {
            let result = self.conn().and_then(|conn| op(&conn).map_err(StorageError::from));
            match result {
                Err(err) if err.is_transient() && attempt < self.retry_attempts => {
                    attempt += 1;
                    tracing::debug!(attempt, error = %err, "database busy, retrying");
                    std::thread::sleep(Duration::from_millis(25 * u64::from(attempt)));
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// Store backed by a file in a fresh temp dir; keep the dir alive
    pub fn temp_store() -> (TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.db"), &DatabaseConfig::default()).unwrap();
        (dir, store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        let mut identity = Identity::new(1);
        assert_eq!(identity.display_name(), None);

        identity.first_name = Some("Ivan".into());
        assert_eq!(identity.display_name().as_deref(), Some("Ivan"));

        identity.last_name = Some("Petrov".into());
        assert_eq!(identity.display_name().as_deref(), Some("Ivan Petrov"));
    }

    #[test]
    fn test_event_type_round_trip() {
        assert_eq!(EventType::parse("start"), Some(EventType::Start));
        assert_eq!(EventType::parse("click"), Some(EventType::Click));
        assert_eq!(EventType::parse("CLICK"), None);
    }

    #[test]
    fn test_open_creates_parent_dir_and_is_reopenable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/refgate.db");
        let store = Store::open(&path, &DatabaseConfig::default()).unwrap();
        store
            .append(EventType::Start, "promo1", 1, 1, Utc::now())
            .unwrap();
        drop(store);

        let reopened = Store::open(&path, &DatabaseConfig::default()).unwrap();
        let events = reopened.recent(&EventFilter::default()).unwrap();
        assert_eq!(events.len(), 1);
    }
}
