use anyhow::Result;
use std::sync::Arc;

use crate::resolver::AttributionResolver;
use crate::store::Store;

pub fn run(store: &Store, user_id: i64) -> Result<()> {
    let resolver = AttributionResolver::new(Arc::new(store.clone()));
    let keyword = resolver.try_resolve(user_id)?;
    println!("{}", keyword);
    Ok(())
}
