//! Command handlers: wire config, caches, clients and storage for each
//! subcommand and print user-facing output.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast::{error::RecvError, Receiver};

use crate::cache::{CacheError, TtlCache};
use crate::cancellation::CancellationSignal;
use crate::config::{sanitize_workers, Config, ConfigError};
use crate::credentials::{self, CredentialError};
use crate::db_manager::{DbManager, StorageError};
use crate::enrichment::{EnrichSettings, EnrichmentCoordinator};
use crate::http::{RetryPolicy, RetryingClient, UreqTransport};
use crate::library::{
    filter_unplayed, pick_game, picker_rng, LastUserStore, LibraryError, OwnedGame, OwnedGames,
    PickedGame, SteamWebApiClient, SyncPlan,
};
use crate::protocol::{DetailTag, EnrichmentEvent, RunReport, RunStatus};
use crate::sources::{PcGamingWikiSource, SteamStoreSource};

const EXIT_ABORTED: u8 = 2;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Library(#[from] LibraryError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("failed to start progress reporter: {0}")]
    Reporter(std::io::Error),
    #[error("failed to encode JSON output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no entropy source for picking: {0}")]
    Entropy(#[from] getrandom::Error),
}

/// Command-line overrides for one `enrich` invocation.
#[derive(Debug, Default, Clone)]
pub struct EnrichOverrides {
    pub refresh: bool,
    pub workers: Option<usize>,
    pub rate_limit_per_minute: Option<u32>,
    pub no_fallback: bool,
}

impl EnrichOverrides {
    pub fn apply(&self, mut settings: EnrichSettings) -> EnrichSettings {
        settings.refresh |= self.refresh;
        if let Some(workers) = self.workers {
            settings.workers = sanitize_workers(workers);
        }
        if let Some(rate) = self.rate_limit_per_minute {
            settings.requests_per_minute = rate.max(1);
        }
        if self.no_fallback {
            settings.fallback_enabled = false;
        }
        settings
    }
}

/// Opens a cache under the configured root, encrypted when a recipient is set.
fn open_cache<T: Serialize + DeserializeOwned>(config: &Config) -> Result<TtlCache<T>, CacheError> {
    let cache = match config.cache_dir() {
        Some(dir) => TtlCache::open(dir)?,
        None => TtlCache::open_default()?,
    };
    Ok(match config.gpg_recipient() {
        Some(recipient) => cache.with_encryption(recipient),
        None => cache,
    })
}

fn open_database(config: &Config) -> Result<DbManager, StorageError> {
    let path = match config.database_path() {
        Some(path) => path,
        None => DbManager::default_path()?,
    };
    debug!("Storage: opening {}", path.display());
    DbManager::open(&path)
}

fn http_client(config: &Config) -> RetryingClient {
    RetryingClient::new(
        Arc::new(UreqTransport::new(config.request_timeout())),
        RetryPolicy::default(),
    )
}

fn spawn_reporter(
    mut receiver: Receiver<EnrichmentEvent>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("enrich-reporter".to_string())
        .spawn(move || loop {
            match receiver.blocking_recv() {
                Ok(EnrichmentEvent::RunFinished(_)) | Err(RecvError::Closed) => break,
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Reporter: skipped {} progress events", skipped);
                }
            }
        })
}

fn print_event(event: &EnrichmentEvent) {
    match event {
        EnrichmentEvent::RunStarted { total: 0, .. } => println!("No games to enrich."),
        EnrichmentEvent::RunStarted { total, workers } => {
            println!("Found {total} games to enrich ({workers} workers).");
        }
        EnrichmentEvent::ItemStarted {
            position,
            total,
            app_id,
            label,
        } => println!("[{position}/{total}] Fetching details for {label} ({app_id})..."),
        EnrichmentEvent::FallbackUsed { label, source, .. } => {
            println!("Found details for {label} on {source}.");
        }
        EnrichmentEvent::Stubbed {
            app_id,
            label,
            reason,
        } => eprintln!("Failed to fetch details for {label} ({app_id}): {reason}"),
        EnrichmentEvent::PersistFailed {
            app_id,
            label,
            error,
        } => eprintln!("Failed to save details for {label} ({app_id}): {error}"),
        EnrichmentEvent::RateLimited { .. } => {
            eprintln!("Rate limit exceeded! Stopping enrichment.");
        }
        EnrichmentEvent::RunFinished(_) => {}
    }
}

fn print_report(report: &RunReport) {
    println!(
        "Attempted {}: {} from store, {} via fallback, {} marked unavailable, {} skipped.",
        report.attempted,
        report.primary_success,
        report.fallback_used,
        report.stubbed,
        report.skipped
    );
    println!("Saved {} of {} records.", report.persisted(), report.total);
    if report.persist_failures > 0 {
        eprintln!("{} records could not be saved.", report.persist_failures);
    }
}

pub fn run_enrich(config: &Config, overrides: &EnrichOverrides) -> Result<ExitCode, CommandError> {
    let settings = overrides.apply(config.enrich_settings());
    let database = Arc::new(open_database(config)?);
    let client = http_client(config);
    let store_source = SteamStoreSource::new(client.clone())
        .with_cache(open_cache(config)?, config.cache_ttl());
    let wiki_source =
        PcGamingWikiSource::new(client).with_cache(open_cache(config)?, config.cache_ttl());
    let coordinator =
        EnrichmentCoordinator::new(Arc::new(store_source), database, settings.clone())
            .with_fallback(Arc::new(wiki_source));

    if settings.refresh {
        println!("Refresh enabled: Fetching all owned games...");
    } else {
        println!("Fetching games missing details...");
    }
    let reporter = spawn_reporter(coordinator.subscribe()).map_err(CommandError::Reporter)?;
    let report = coordinator.run_pending();
    drop(coordinator);
    if reporter.join().is_err() {
        warn!("Reporter: progress thread panicked");
    }
    let report = report?;
    if report.total == 0 {
        return Ok(ExitCode::SUCCESS);
    }

    print_report(&report);
    match report.status {
        RunStatus::Completed => {
            println!("Enrichment complete.");
            Ok(ExitCode::SUCCESS)
        }
        RunStatus::Aborted => {
            eprintln!("Enrichment stopped: upstream rate limit exceeded. Re-run later to continue.");
            Ok(ExitCode::from(EXIT_ABORTED))
        }
    }
}

pub fn run_sync(
    config: &Config,
    steam_id: Option<&str>,
    vanity: Option<&str>,
    include_free_to_play: bool,
) -> Result<ExitCode, CommandError> {
    let api_key = credentials::resolve_api_key(&config.steam.api_key)?;
    let api = SteamWebApiClient::new(
        api_key,
        http_client(config),
        open_cache(config)?,
        open_cache(config)?,
        config.cache_ttl(),
        config.auth_ttl(),
    );
    let last_user = LastUserStore::new(open_cache(config)?);
    let cancel = CancellationSignal::new();
    let steam_id = last_user.resolve_steam_id(
        &api,
        steam_id,
        vanity,
        &config.steam.steam_id,
        &config.steam.vanity,
        &cancel,
    )?;
    let database = open_database(config)?;

    println!("Fetching games for SteamID: {steam_id}");
    let include_free = include_free_to_play || config.steam.include_free_to_play;
    let games = match api.get_owned_games(&steam_id, include_free, &cancel)? {
        OwnedGames::Games(games) => games,
        OwnedGames::EmptyOrPrivate => {
            warn!("Library: no games returned for {}", steam_id);
            eprintln!(
                "Steam returned no games. The library is empty or the profile's game details are private."
            );
            return Ok(ExitCode::SUCCESS);
        }
    };

    let existing = database.get_owned_games()?;
    let plan = SyncPlan::build(games, &existing);
    println!(
        "Sync Summary: {} new, {} updated, {} unchanged.",
        plan.new.len(),
        plan.updated.len(),
        plan.unchanged
    );

    let to_save = plan.games_to_save();
    if to_save.is_empty() {
        println!("Database is already up to date.");
    } else {
        println!("Saving {} games to database...", to_save.len());
        database.upsert_games(&to_save)?;
    }
    info!("Library: synced {} games for {}", to_save.len(), steam_id);
    println!("Sync complete.");
    Ok(ExitCode::SUCCESS)
}

pub fn run_cache(config: &Config, clear: bool) -> Result<ExitCode, CommandError> {
    let cache: TtlCache<serde_json::Value> = open_cache(config)?;
    if clear {
        cache.clear()?;
        println!("Cache cleared.");
        return Ok(ExitCode::SUCCESS);
    }

    let stats = cache.stats()?;
    println!("Cache Directory: {}", cache.dir().display());
    println!("Files: {}", stats.file_count);
    println!("Size: {} bytes", stats.total_bytes);
    if cache.is_encrypted() {
        println!("Encryption: gpg ({} entries)", crate::cache::ENCRYPTED_EXTENSION);
    }
    Ok(ExitCode::SUCCESS)
}

/// Stored games with no playtime, truncated to `limit` when it is non-zero.
fn load_unplayed(config: &Config, limit: usize) -> Result<Vec<OwnedGame>, CommandError> {
    let mut unplayed = filter_unplayed(&open_database(config)?.get_owned_games()?);
    if limit > 0 {
        unplayed.truncate(limit);
    }
    Ok(unplayed)
}

pub fn run_list(config: &Config, limit: usize, json: bool) -> Result<ExitCode, CommandError> {
    let unplayed = load_unplayed(config, limit)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&unplayed)?);
    } else if unplayed.is_empty() {
        println!("No unplayed games found. Run `steam-pick sync` to refresh the library.");
    } else {
        for game in &unplayed {
            println!("{}: {}", game.appid, game.name);
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub fn run_pick(config: &Config, seed: Option<u64>, json: bool) -> Result<ExitCode, CommandError> {
    let unplayed = load_unplayed(config, 0)?;
    let mut rng = picker_rng(seed)?;
    let Some(game) = pick_game(&unplayed, &mut rng) else {
        eprintln!("No unplayed games found.");
        return Ok(ExitCode::SUCCESS);
    };
    debug!("Library: picked {} from {} unplayed games", game.appid, unplayed.len());

    let picked = PickedGame::from(game);
    if json {
        println!("{}", serde_json::to_string_pretty(&picked)?);
    } else {
        println!("Name: {}", picked.name);
        println!("AppID: {}", picked.appid);
        println!("Store URL: {}", picked.store_url);
    }
    Ok(ExitCode::SUCCESS)
}

pub fn run_show(config: &Config, app_id: u32) -> Result<ExitCode, CommandError> {
    let database = open_database(config)?;
    let Some(details) = database.get_details(app_id)? else {
        eprintln!("No stored details for {app_id}. Run `steam-pick enrich` first.");
        return Ok(ExitCode::FAILURE);
    };

    let join = |values: &[String]| values.join(", ");
    let tags = |tags: &[DetailTag]| {
        tags.iter()
            .map(|tag| tag.description.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    println!("{} ({app_id})", details.name);
    if !details.short_description.is_empty() {
        println!("{}", details.short_description);
    }
    println!("Developers: {}", join(&details.developers));
    println!("Publishers: {}", join(&details.publishers));
    println!("Genres: {}", tags(&details.genres));
    println!("Categories: {}", tags(&details.categories));
    if !details.website.is_empty() {
        println!("Website: {}", details.website);
    }
    Ok(ExitCode::SUCCESS)
}

pub fn run_login(api_key: &str) -> Result<ExitCode, CommandError> {
    credentials::store_api_key(api_key)?;
    println!("API key saved to the system keyring.");
    Ok(ExitCode::SUCCESS)
}

/// Resolves `--config` or the default config location.
pub fn config_path(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    match explicit {
        Some(path) => Ok(path),
        None => Config::default_path(),
    }
}
