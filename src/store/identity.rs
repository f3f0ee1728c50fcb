//! Identity store: one row per user, overwritten on every touch

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{Identity, IdentityRow, IdentityStore, Store, StoreResult};

/// Trimmed value, or None for blank strings so the column stays NULL
fn null_if_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl IdentityStore for Store {
    fn upsert(&self, identity: &Identity, now: DateTime<Utc>) -> StoreResult<()> {
        let ts = now.to_rfc3339();
        self.with_retry(|conn| {
            conn.execute(
                r#"INSERT INTO identities
                   (user_id, username, first_name, last_name, first_seen_at, last_touched_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                   ON CONFLICT(user_id) DO UPDATE SET
                       username = excluded.username,
                       first_name = excluded.first_name,
                       last_name = excluded.last_name,
                       last_touched_at = excluded.last_touched_at"#,
                params![
                    identity.user_id,
                    null_if_empty(identity.username.as_deref()),
                    null_if_empty(identity.first_name.as_deref()),
                    null_if_empty(identity.last_name.as_deref()),
                    ts,
                ],
            )
        })?;
        Ok(())
    }

    fn get(&self, user_id: i64) -> StoreResult<Option<IdentityRow>> {
        let row = self
            .conn()?
            .query_row(
                r#"SELECT user_id, username, first_name, last_name, first_seen_at, last_touched_at
                   FROM identities WHERE user_id = ?"#,
                params![user_id],
                |row| {
                    Ok(IdentityRow {
                        identity: Identity {
                            user_id: row.get(0)?,
                            username: row.get(1)?,
                            first_name: row.get(2)?,
                            last_name: row.get(3)?,
                        },
                        first_seen_at: row.get(4)?,
                        last_touched_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::temp_store;
    use chrono::Duration;

    fn count_rows(store: &Store, user_id: i64) -> i64 {
        store
            .conn()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM identities WHERE user_id = ?",
                params![user_id],
                |row| row.get(0),
            )
            .unwrap()
    }

    fn ivan() -> Identity {
        Identity {
            user_id: 42,
            username: Some("ivan".into()),
            first_name: Some("Ivan".into()),
            last_name: None,
        }
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let (_dir, store) = temp_store();
        let now = Utc::now();

        store.upsert(&ivan(), now).unwrap();
        store.upsert(&ivan(), now).unwrap();

        assert_eq!(count_rows(&store, 42), 1);
        let row = store.get(42).unwrap().unwrap();
        assert_eq!(row.identity, ivan());
    }

    #[test]
    fn test_upsert_overwrites_profile_and_keeps_first_seen() {
        let (_dir, store) = temp_store();
        let first = Utc::now();
        let later = first + Duration::minutes(5);

        store.upsert(&ivan(), first).unwrap();

        let renamed = Identity {
            user_id: 42,
            username: None,
            first_name: Some("Ivan".into()),
            last_name: Some("Petrov".into()),
        };
        store.upsert(&renamed, later).unwrap();

        let row = store.get(42).unwrap().unwrap();
        // overwritten, not merged: the old username is gone
        assert_eq!(row.identity, renamed);
        assert_eq!(row.first_seen_at, first.to_rfc3339());
        assert_eq!(row.last_touched_at, later.to_rfc3339());
    }

    #[test]
    fn test_blank_profile_fields_stored_as_null() {
        let (_dir, store) = temp_store();
        let identity = Identity {
            user_id: 5,
            username: Some("   ".into()),
            first_name: Some(" Anna ".into()),
            last_name: Some(String::new()),
        };
        store.upsert(&identity, Utc::now()).unwrap();

        let row = store.get(5).unwrap().unwrap();
        assert_eq!(row.identity.username, None);
        assert_eq!(row.identity.first_name.as_deref(), Some("Anna"));
        assert_eq!(row.identity.last_name, None);
    }

    #[test]
    fn test_get_unknown_user() {
        let (_dir, store) = temp_store();
        assert!(store.get(999).unwrap().is_none());
    }
}
