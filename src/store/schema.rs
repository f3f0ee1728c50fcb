//! SQLite schema definition
//!
//! Two logical tables:
//! - identities: one row per platform user, overwritten on every touch
//! - attribution_events: append-only start/click ledger

pub const SCHEMA: &str = r#"
-- ============================================
-- IDENTITIES
-- ============================================

CREATE TABLE IF NOT EXISTS identities (
    user_id INTEGER PRIMARY KEY,           -- Platform user id
    username TEXT,                         -- NULL when the user has none
    first_name TEXT,
    last_name TEXT,
    first_seen_at TEXT NOT NULL,           -- RFC 3339, set once on insert
    last_touched_at TEXT NOT NULL          -- RFC 3339, overwritten on every upsert
);

-- ============================================
-- ATTRIBUTION EVENTS
-- ============================================

-- No foreign key to identities: an event must land even when the
-- identity upsert for the same interaction failed.
CREATE TABLE IF NOT EXISTS attribution_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,  -- Strictly increasing, defines "most recent"
    occurred_at TEXT NOT NULL,             -- RFC 3339
    event_type TEXT NOT NULL CHECK (event_type IN ('start', 'click')),
    keyword TEXT NOT NULL,
    user_id INTEGER NOT NULL,
    chat_id INTEGER NOT NULL
);

-- ============================================
-- INDEXES
-- ============================================

CREATE INDEX IF NOT EXISTS idx_events_user ON attribution_events(user_id);
CREATE INDEX IF NOT EXISTS idx_events_user_type ON attribution_events(user_id, event_type, id DESC);
CREATE INDEX IF NOT EXISTS idx_events_keyword ON attribution_events(keyword);
"#;
