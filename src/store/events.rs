//! Event log: append-only start/click ledger

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::{AttributionEvent, EventFilter, EventId, EventLog, EventType, Store, StoreResult};
use crate::error::StorageError;

const EVENT_COLUMNS: &str = "id, occurred_at, event_type, keyword, user_id, chat_id";

struct RawEvent {
    id: i64,
    occurred_at: String,
    event_type: String,
    keyword: String,
    user_id: i64,
    chat_id: i64,
}

impl RawEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            occurred_at: row.get(1)?,
            event_type: row.get(2)?,
            keyword: row.get(3)?,
            user_id: row.get(4)?,
            chat_id: row.get(5)?,
        })
    }

    fn into_event(self) -> StoreResult<AttributionEvent> {
        let event_type = EventType::parse(&self.event_type).ok_or_else(|| {
            StorageError::Corrupt(format!(
                "event {} has unknown type '{}'",
                self.id, self.event_type
            ))
        })?;
        Ok(AttributionEvent {
            id: EventId(self.id),
            occurred_at: self.occurred_at,
            event_type,
            keyword: self.keyword,
            user_id: self.user_id,
            chat_id: self.chat_id,
        })
    }
}

impl EventLog for Store {
    fn append(
        &self,
        event_type: EventType,
        keyword: &str,
        user_id: i64,
        chat_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<EventId> {
        let ts = now.to_rfc3339();
        let id: i64 = self.with_retry(|conn| {
            conn.query_row(
                r#"INSERT INTO attribution_events (occurred_at, event_type, keyword, user_id, chat_id)
                   VALUES (?, ?, ?, ?, ?)
                   RETURNING id"#,
                params![ts, event_type.as_str(), keyword, user_id, chat_id],
                |row| row.get(0),
            )
        })?;
        Ok(EventId(id))
    }

    fn latest_start(&self, user_id: i64) -> StoreResult<Option<AttributionEvent>> {
        let raw = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM attribution_events
                     WHERE user_id = ? AND event_type = 'start'
                     ORDER BY id DESC
                     LIMIT 1"
                ),
                params![user_id],
                RawEvent::from_row,
            )
            .optional()?;
        raw.map(RawEvent::into_event).transpose()
    }

    fn recent(&self, filter: &EventFilter) -> StoreResult<Vec<AttributionEvent>> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(user_id) = filter.user_id {
            clauses.push("user_id = ?");
            values.push(Value::Integer(user_id));
        }
        if let Some(event_type) = filter.event_type {
            clauses.push("event_type = ?");
            values.push(Value::Text(event_type.as_str().to_string()));
        }
        if let Some(ref keyword) = filter.keyword {
            clauses.push("keyword = ?");
            values.push(Value::Text(keyword.clone()));
        }

        let mut query = format!("SELECT {EVENT_COLUMNS} FROM attribution_events");
        if !clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
        query.push_str(" ORDER BY id DESC");
        if let Some(limit) = filter.limit {
            query.push_str(" LIMIT ?");
            values.push(Value::Integer(limit as i64));
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&query)?;
        let raws = stmt
            .query_map(params_from_iter(values.iter()), RawEvent::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        raws.into_iter().map(RawEvent::into_event).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::temp_store;

    #[test]
    fn test_append_ids_strictly_increase() {
        let (_dir, store) = temp_store();
        let now = Utc::now();

        let a = store.append(EventType::Start, "a", 1, 10, now).unwrap();
        let b = store.append(EventType::Click, "a", 1, 10, now).unwrap();
        let c = store.append(EventType::Start, "b", 2, 20, now).unwrap();

        assert!(a < b && b < c);
    }

    #[test]
    fn test_latest_start_uses_greatest_id() {
        let (_dir, store) = temp_store();
        let now = Utc::now();

        store.append(EventType::Start, "a", 1, 10, now).unwrap();
        store.append(EventType::Start, "b", 1, 10, now).unwrap();
        store.append(EventType::Click, "zzz", 1, 10, now).unwrap();
        store.append(EventType::Start, "other-user", 2, 20, now).unwrap();

        let latest = store.latest_start(1).unwrap().unwrap();
        assert_eq!(latest.keyword, "b");
        assert_eq!(latest.event_type, EventType::Start);
        assert!(store.latest_start(3).unwrap().is_none());
    }

    #[test]
    fn test_recent_filters_and_orders_newest_first() {
        let (_dir, store) = temp_store();
        let now = Utc::now();

        store.append(EventType::Start, "promo1", 1, 10, now).unwrap();
        store.append(EventType::Click, "promo1", 1, 10, now).unwrap();
        store.append(EventType::Start, "organic", 2, 20, now).unwrap();
        store.append(EventType::Start, "promo1", 3, 30, now).unwrap();

        let all = store.recent(&EventFilter::default()).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].user_id, 3);

        let promo_starts = store
            .recent(&EventFilter {
                event_type: Some(EventType::Start),
                keyword: Some("promo1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            promo_starts.iter().map(|e| e.user_id).collect::<Vec<_>>(),
            vec![3, 1]
        );

        let limited = store
            .recent(&EventFilter {
                user_id: Some(1),
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].event_type, EventType::Click);
    }

    #[test]
    fn test_concurrent_appends_all_land() {
        let (_dir, store) = temp_store();

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        store
                            .append(EventType::Click, "kw", worker, worker, Utc::now())
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let all = store.recent(&EventFilter::default()).unwrap();
        assert_eq!(all.len(), 40);
        let mut ids: Vec<i64> = all.iter().map(|e| e.id.0).collect();
        ids.dedup();
        assert_eq!(ids.len(), 40);
    }
}
