//! Error taxonomy
//!
//! - `ConfigError`: fatal, only raised while bootstrapping
//! - `StorageError`: recoverable, identity/event writes are logged and skipped
//! - `TransportError`: recoverable, a failed send is logged and not retried here

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StorageError {
    /// Busy/locked errors are worth another attempt; everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("telegram api {method} failed: {description}")]
    Api { method: String, description: String },

    #[error("no response within {0:?}")]
    Timeout(std::time::Duration),
}

/// Failure of a single step inside the redirect pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Turns a failed side effect into a logged, skipped step.
///
/// Every call site names the step it is giving up on, so the places where the
/// pipeline tolerates partial failure stay greppable.
pub trait BestEffort<T> {
    fn best_effort(self, step: &'static str) -> Option<T>;
}

impl<T, E> BestEffort<T> for Result<T, E>
where
    E: Into<PipelineError>,
{
    fn best_effort(self, step: &'static str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(err) => {
                let err: PipelineError = err.into();
                let class = match err {
                    PipelineError::Storage(_) => "storage",
                    PipelineError::Transport(_) => "transport",
                };
                tracing::warn!(step, class, error = %err, "step failed, continuing");
                None
            }
        }
    }
}
