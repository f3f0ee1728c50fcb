//! Referral keyword normalization
//!
//! Two sentinels that must never be confused:
//! - `organic`: the user arrived with no keyword at all
//! - `unknown`: a click could not be traced back to any start

use std::collections::HashSet;

use crate::config::AllowListConfig;

pub const ORGANIC: &str = "organic";
pub const UNKNOWN: &str = "unknown";

/// Trim the raw entry argument; blank becomes `organic`.
///
/// No case folding and nothing beyond leading/trailing whitespace is removed.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        ORGANIC.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Optional relabelling of keywords that are not on a known list
#[derive(Debug, Clone)]
pub struct KeywordPolicy {
    allowed: Option<HashSet<String>>,
    relabel: String,
}

impl KeywordPolicy {
    /// Accept every keyword as-is
    pub fn permissive() -> Self {
        Self {
            allowed: None,
            relabel: String::new(),
        }
    }

    pub fn from_config(config: &AllowListConfig) -> Self {
        if !config.enabled {
            return Self::permissive();
        }
        Self {
            allowed: Some(
                config
                    .keywords
                    .iter()
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect(),
            ),
            relabel: config.relabel.trim().to_string(),
        }
    }

    /// Normalize, then relabel anything off-list. `organic` always passes.
    pub fn apply(&self, raw: &str) -> String {
        let keyword = normalize(raw);
        match &self.allowed {
            Some(allowed) if keyword != ORGANIC && !allowed.contains(&keyword) => {
                tracing::debug!(%keyword, relabel = %self.relabel, "keyword not on allow list");
                self.relabel.clone()
            }
            _ => keyword,
        }
    }
}

impl Default for KeywordPolicy {
    fn default() -> Self {
        Self::permissive()
    }
}
