//! Attribution resolver: which keyword is this user currently attributed to

use std::sync::Arc;

use crate::keyword::UNKNOWN;
use crate::store::{EventLog, StoreResult};

/// Read-only view over the event log
#[derive(Clone)]
pub struct AttributionResolver {
    log: Arc<dyn EventLog>,
}

impl AttributionResolver {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }

    /// Keyword of the user's newest start event, `unknown` if there is none.
    ///
    /// Storage failures also degrade to `unknown`.
    pub fn resolve_last_keyword(&self, user_id: i64) -> String {
        match self.try_resolve(user_id) {
            Ok(keyword) => keyword,
            Err(err) => {
                tracing::warn!(user_id, error = %err, "attribution lookup failed, using fallback");
                UNKNOWN.to_string()
            }
        }
    }

    /// Same as `resolve_last_keyword` but surfaces storage errors
    pub fn try_resolve(&self, user_id: i64) -> StoreResult<String> {
        let keyword = self
            .log
            .latest_start(user_id)?
            .map(|event| event.keyword)
            .filter(|kw| !kw.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string());
        Ok(keyword)
    }
}
