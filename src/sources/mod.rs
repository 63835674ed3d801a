//! Detail providers consumed by the enrichment coordinator.

pub mod pcgamingwiki;
pub mod steam_store;

pub use pcgamingwiki::PcGamingWikiSource;
pub use steam_store::SteamStoreSource;

use crate::cancellation::CancellationSignal;
use crate::http::HttpError;
use crate::protocol::{DetailResult, WorkItem};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("invalid {source_name} response: {message}")]
    Decode {
        source_name: &'static str,
        message: String,
    },
    #[error("{source_name} has no results for app {app_id}")]
    NoResults {
        source_name: &'static str,
        app_id: u32,
    },
}

impl SourceError {
    /// True when the upstream answered 429; the only error that halts a run.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Http(HttpError::RateLimitExceeded))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Http(HttpError::Cancelled))
    }
}

/// Lookup contract shared by the primary and fallback providers.
pub trait DetailSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Answers from the provider's cache only, without any network call.
    fn cached_details(&self, _item: &WorkItem) -> Option<DetailResult> {
        None
    }

    /// Fetches details for one item. "Item has no details" is
    /// `Ok(DetailResult::Failed)`; `Err` means the lookup could not be made.
    fn fetch_details(
        &self,
        item: &WorkItem,
        cancel: &CancellationSignal,
    ) -> Result<DetailResult, SourceError>;
}
