//! Bounded worker pool that resolves catalog items against the detail sources.
//!
//! Every worker pulls the next unclaimed item, takes a token from the shared
//! rate limiter before each primary network call, walks the fallback chain
//! when the primary request fails, and persists exactly one record per resolved
//! item (a stub when every source failed). An upstream 429 cancels the run:
//! no further items are claimed, in-flight items drain, and the report is
//! `Aborted`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::broadcast::{self, Receiver, Sender};

use super::EnrichmentStore;
use crate::cancellation::CancellationSignal;
use crate::db_manager::StorageError;
use crate::protocol::{
    DetailResult, EnrichmentEvent, ItemResolution, RunReport, RunStatus, WorkItem,
};
use crate::rate_limiter::RequestRateLimiter;
use crate::sources::DetailSource;

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const RATE_LIMIT_BURST: u32 = 1;

/// Effective settings for one run, after config and command-line overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichSettings {
    pub workers: usize,
    pub requests_per_minute: u32,
    /// Re-enrich every stored record instead of only those missing details.
    pub refresh: bool,
    pub fallback_enabled: bool,
}

impl Default for EnrichSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            requests_per_minute: 30,
            refresh: false,
            fallback_enabled: true,
        }
    }
}

enum ItemOutcome {
    Resolved {
        resolution: ItemResolution,
        result: DetailResult,
    },
    RateLimited,
    Cancelled,
}

#[derive(Default)]
struct WorkerTally {
    attempted: usize,
    primary_success: usize,
    fallback_used: usize,
    stubbed: usize,
    persist_failures: usize,
}

impl WorkerTally {
    fn record(&mut self, resolution: ItemResolution) {
        match resolution {
            ItemResolution::Primary => self.primary_success += 1,
            ItemResolution::Fallback => self.fallback_used += 1,
            ItemResolution::Stub => self.stubbed += 1,
        }
    }

    fn merge(&mut self, other: WorkerTally) {
        self.attempted += other.attempted;
        self.primary_success += other.primary_success;
        self.fallback_used += other.fallback_used;
        self.stubbed += other.stubbed;
        self.persist_failures += other.persist_failures;
    }
}

pub struct EnrichmentCoordinator {
    primary: Arc<dyn DetailSource>,
    fallbacks: Vec<Arc<dyn DetailSource>>,
    store: Arc<dyn EnrichmentStore>,
    settings: EnrichSettings,
    bus_sender: Sender<EnrichmentEvent>,
}

impl EnrichmentCoordinator {
    pub fn new(
        primary: Arc<dyn DetailSource>,
        store: Arc<dyn EnrichmentStore>,
        settings: EnrichSettings,
    ) -> Self {
        let (bus_sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            primary,
            fallbacks: Vec::new(),
            store,
            settings,
            bus_sender,
        }
    }

    /// Appends a source to the fallback chain; sources are tried in the
    /// order they were added.
    pub fn with_fallback(mut self, source: Arc<dyn DetailSource>) -> Self {
        self.fallbacks.push(source);
        self
    }

    pub fn subscribe(&self) -> Receiver<EnrichmentEvent> {
        self.bus_sender.subscribe()
    }

    fn emit(&self, event: EnrichmentEvent) {
        let _ = self.bus_sender.send(event);
    }

    pub fn load_work_items(&self) -> Result<Vec<WorkItem>, StorageError> {
        if self.settings.refresh {
            self.store.get_all_records()
        } else {
            self.store.get_records_missing_details()
        }
    }

    /// Loads the work list and runs it to completion.
    pub fn run_pending(&self) -> Result<RunReport, StorageError> {
        let items = self.load_work_items()?;
        Ok(self.run(&items))
    }

    pub fn run(&self, items: &[WorkItem]) -> RunReport {
        let total = items.len();
        let workers = self.settings.workers.clamp(1, total.max(1));
        let limiter = RequestRateLimiter::per_minute(
            self.settings.requests_per_minute,
            RATE_LIMIT_BURST,
        );
        let cancel = CancellationSignal::new();
        let next_index = AtomicUsize::new(0);

        info!(
            "Enrichment: starting run over {} items with {} workers at {} requests/minute",
            total,
            workers,
            limiter.requests_per_minute()
        );
        self.emit(EnrichmentEvent::RunStarted { total, workers });

        let mut tally = WorkerTally::default();
        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for worker_index in 0..workers {
                let spawned = std::thread::Builder::new()
                    .name(format!("enrich-worker-{worker_index}"))
                    .spawn_scoped(scope, || {
                        self.worker_loop(items, &next_index, &limiter, &cancel)
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(spawn_error) => {
                        error!(
                            "Enrichment: failed to spawn worker {}: {}",
                            worker_index, spawn_error
                        );
                    }
                }
            }
            for handle in handles {
                match handle.join() {
                    Ok(worker_tally) => tally.merge(worker_tally),
                    Err(_) => error!("Enrichment: a worker panicked; its items are unresolved"),
                }
            }
        });

        let resolved = tally.primary_success + tally.fallback_used + tally.stubbed;
        let status = if cancel.is_cancelled() {
            RunStatus::Aborted
        } else {
            RunStatus::Completed
        };
        let report = RunReport {
            status,
            total,
            attempted: tally.attempted,
            primary_success: tally.primary_success,
            fallback_used: tally.fallback_used,
            stubbed: tally.stubbed,
            skipped: total.saturating_sub(resolved),
            persist_failures: tally.persist_failures,
        };
        info!(
            "Enrichment: run {:?}; {} attempted, {} primary, {} fallback, {} stubbed, {} skipped",
            report.status,
            report.attempted,
            report.primary_success,
            report.fallback_used,
            report.stubbed,
            report.skipped
        );
        self.emit(EnrichmentEvent::RunFinished(report.clone()));
        report
    }

    fn worker_loop(
        &self,
        items: &[WorkItem],
        next_index: &AtomicUsize,
        limiter: &RequestRateLimiter,
        cancel: &CancellationSignal,
    ) -> WorkerTally {
        let mut tally = WorkerTally::default();
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let index = next_index.fetch_add(1, Ordering::SeqCst);
            let Some(item) = items.get(index) else {
                break;
            };
            tally.attempted += 1;
            self.emit(EnrichmentEvent::ItemStarted {
                position: index + 1,
                total: items.len(),
                app_id: item.app_id,
                label: item.label.clone(),
            });

            let (resolution, result) = match self.resolve_item(item, limiter, cancel) {
                ItemOutcome::Resolved { resolution, result } => (resolution, result),
                ItemOutcome::RateLimited | ItemOutcome::Cancelled => continue,
            };
            if let Err(persist_error) = self.store.upsert_details(item.app_id, &result) {
                error!(
                    "Enrichment[{}:{}]: failed to persist details: {}",
                    item.app_id, item.label, persist_error
                );
                tally.persist_failures += 1;
                self.emit(EnrichmentEvent::PersistFailed {
                    app_id: item.app_id,
                    label: item.label.clone(),
                    error: persist_error.to_string(),
                });
            }
            tally.record(resolution);
        }
        tally
    }

    fn resolve_item(
        &self,
        item: &WorkItem,
        limiter: &RequestRateLimiter,
        cancel: &CancellationSignal,
    ) -> ItemOutcome {
        let primary_result = match self.primary.cached_details(item) {
            Some(cached) => {
                debug!(
                    "Enrichment[{}:{}]: {} cache hit",
                    item.app_id,
                    item.label,
                    self.primary.name()
                );
                Ok(cached)
            }
            None => {
                if limiter.acquire(cancel).is_err() {
                    return ItemOutcome::Cancelled;
                }
                self.primary.fetch_details(item, cancel)
            }
        };

        // Only a failed request falls through to the fallbacks; a store answer
        // without details is final.
        let mut stub_reason = match primary_result {
            Ok(DetailResult::Success(payload)) => {
                return ItemOutcome::Resolved {
                    resolution: ItemResolution::Primary,
                    result: DetailResult::Success(payload),
                };
            }
            Ok(DetailResult::Failed) => {
                debug!(
                    "Enrichment[{}:{}]: {} has no details",
                    item.app_id,
                    item.label,
                    self.primary.name()
                );
                return self.stub(item, format!("{} has no details", self.primary.name()));
            }
            Err(source_error) if source_error.is_rate_limited() => {
                if cancel.cancel() {
                    warn!(
                        "Enrichment[{}:{}]: {} rate limit exceeded; stopping dispatch",
                        item.app_id,
                        item.label,
                        self.primary.name()
                    );
                }
                self.emit(EnrichmentEvent::RateLimited {
                    app_id: item.app_id,
                });
                return ItemOutcome::RateLimited;
            }
            Err(source_error) if source_error.is_cancelled() => return ItemOutcome::Cancelled,
            Err(source_error) => {
                warn!(
                    "Enrichment[{}:{}]: {} failed: {}",
                    item.app_id,
                    item.label,
                    self.primary.name(),
                    source_error
                );
                source_error.to_string()
            }
        };

        if self.settings.fallback_enabled {
            // Fallbacks finish even after the run is cancelled.
            let detached = CancellationSignal::new();
            for source in &self.fallbacks {
                let fallback_result = match source.cached_details(item) {
                    Some(cached) => Ok(cached),
                    None => source.fetch_details(item, &detached),
                };
                match fallback_result {
                    Ok(DetailResult::Success(payload)) => {
                        info!(
                            "Enrichment[{}:{}]: resolved via {}",
                            item.app_id,
                            item.label,
                            source.name()
                        );
                        self.emit(EnrichmentEvent::FallbackUsed {
                            app_id: item.app_id,
                            label: item.label.clone(),
                            source: source.name(),
                        });
                        return ItemOutcome::Resolved {
                            resolution: ItemResolution::Fallback,
                            result: DetailResult::Success(payload),
                        };
                    }
                    Ok(DetailResult::Failed) => {
                        debug!(
                            "Enrichment[{}:{}]: {} has no details",
                            item.app_id,
                            item.label,
                            source.name()
                        );
                    }
                    Err(source_error) => {
                        debug!(
                            "Enrichment[{}:{}]: {} failed: {}",
                            item.app_id,
                            item.label,
                            source.name(),
                            source_error
                        );
                        stub_reason = source_error.to_string();
                    }
                }
            }
        }

        self.stub(item, stub_reason)
    }

    fn stub(&self, item: &WorkItem, reason: String) -> ItemOutcome {
        warn!(
            "Enrichment[{}:{}]: storing unavailable stub ({})",
            item.app_id, item.label, reason
        );
        self.emit(EnrichmentEvent::Stubbed {
            app_id: item.app_id,
            label: item.label.clone(),
            reason,
        });
        ItemOutcome::Resolved {
            resolution: ItemResolution::Stub,
            result: DetailResult::Failed,
        }
    }
}
