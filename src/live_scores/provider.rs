use async_trait::async_trait;
use std::time::Duration;

use crate::models::LiveEvent;

/// Why a snapshot could not be fetched. Any of these skips the poll cycle.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("provider reported errors: {0}")]
    Upstream(String),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Malformed(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Trait that every live data provider must implement.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// Return a snapshot of all currently live events.
    async fn fetch_live_events(&self) -> Result<Vec<LiveEvent>, FetchError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
