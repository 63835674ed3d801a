//! Data shared by the enrichment runtime components.
//!
//! This module defines the work-list entries, per-item detail outcomes, and
//! the progress events published while an enrichment run is in flight.

/// One catalog entry pending enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    /// Store application id.
    pub app_id: u32,
    /// Display name already known from the owned-games catalog.
    pub label: String,
}

impl WorkItem {
    pub fn new(app_id: u32, label: impl Into<String>) -> Self {
        Self {
            app_id,
            label: label.into(),
        }
    }
}

/// A named tag (genre or category) attached to a detail payload.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct DetailTag {
    #[serde(default)]
    pub id: String,
    pub description: String,
}

/// Provider-independent details for one application.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct DetailPayload {
    pub name: String,
    #[serde(default)]
    pub short_description: String,
    #[serde(default)]
    pub detailed_description: String,
    #[serde(default)]
    pub about_the_game: String,
    #[serde(default)]
    pub header_image: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub developers: Vec<String>,
    #[serde(default)]
    pub publishers: Vec<String>,
    #[serde(default)]
    pub genres: Vec<DetailTag>,
    #[serde(default)]
    pub categories: Vec<DetailTag>,
}

/// Tagged outcome of a detail lookup.
///
/// A `Failed` result is still persisted (as a stub) so repeated
/// "missing details" queries converge to empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailResult {
    Success(DetailPayload),
    Failed,
}

/// How a single work item was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemResolution {
    /// The primary source returned details.
    Primary,
    /// The primary failed and a fallback source returned details.
    Fallback,
    /// Every source failed; a stub was persisted.
    Stub,
}

/// Terminal state of one enrichment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// The primary source signalled an upstream rate limit and the run stopped
    /// dispatching new primary calls.
    Aborted,
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub status: RunStatus,
    pub total: usize,
    /// Items a worker claimed before the run ended.
    pub attempted: usize,
    pub primary_success: usize,
    pub fallback_used: usize,
    pub stubbed: usize,
    /// Items never resolved because the run was cancelled first.
    pub skipped: usize,
    pub persist_failures: usize,
}

impl RunReport {
    pub fn persisted(&self) -> usize {
        (self.primary_success + self.fallback_used + self.stubbed)
            .saturating_sub(self.persist_failures)
    }
}

/// Progress notifications published on the enrichment event bus.
#[derive(Debug, Clone)]
pub enum EnrichmentEvent {
    RunStarted {
        total: usize,
        workers: usize,
    },
    ItemStarted {
        position: usize,
        total: usize,
        app_id: u32,
        label: String,
    },
    FallbackUsed {
        app_id: u32,
        label: String,
        source: &'static str,
    },
    Stubbed {
        app_id: u32,
        label: String,
        reason: String,
    },
    PersistFailed {
        app_id: u32,
        label: String,
        error: String,
    },
    RateLimited {
        app_id: u32,
    },
    RunFinished(RunReport),
}
