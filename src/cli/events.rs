//! Events command: raw event listing

use anyhow::{bail, Result};

use crate::store::{EventFilter, EventLog, EventType, Store};

pub fn run(
    store: &Store,
    user: Option<i64>,
    kind: Option<String>,
    keyword: Option<String>,
    limit: usize,
) -> Result<()> {
    let event_type = match kind.as_deref() {
        None => None,
        Some(k) => match EventType::parse(k) {
            Some(t) => Some(t),
            None => bail!("unknown event kind '{}' (expected start or click)", k),
        },
    };

    let events = store.recent(&EventFilter {
        user_id: user,
        event_type,
        keyword,
        limit: Some(limit),
    })?;

    if events.is_empty() {
        println!("No events found.");
        return Ok(());
    }

    println!(
        "{:<8} {:<20} {:<6} {:<14} {:<14} {}",
        "ID", "Timestamp", "Type", "User", "Chat", "Keyword"
    );
    println!("{}", "-".repeat(80));

    for event in events {
        // 2024-05-01T12:34:56.789+00:00 -> 2024-05-01 12:34:56
        let timestamp = if event.occurred_at.len() >= 19 {
            format!("{} {}", &event.occurred_at[..10], &event.occurred_at[11..19])
        } else {
            event.occurred_at.clone()
        };

        println!(
            "{:<8} {:<20} {:<6} {:<14} {:<14} {}",
            event.id, timestamp, event.event_type, event.user_id, event.chat_id, event.keyword,
        );
    }

    Ok(())
}
