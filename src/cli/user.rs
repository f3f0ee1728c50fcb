use anyhow::Result;

use crate::store::{IdentityStore, Store};

pub fn run(store: &Store, user_id: i64) -> Result<()> {
    let row = store
        .get(user_id)?
        .ok_or_else(|| anyhow::anyhow!("User not found: {}", user_id))?;

    let identity = &row.identity;
    println!("User ID:      {}", identity.user_id);
    println!(
        "Username:     {}",
        identity
            .username
            .as_deref()
            .map(|u| format!("@{}", u))
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "Name:         {}",
        identity.display_name().unwrap_or_else(|| "-".to_string())
    );
    println!("First seen:   {}", row.first_seen_at);
    println!("Last touched: {}", row.last_touched_at);
    Ok(())
}
