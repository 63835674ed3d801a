//! Persistent application configuration model and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;

use crate::enrichment::EnrichSettings;

const MAX_WORKERS: usize = 32;
const MAX_REQUEST_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Steam account and Web API access.
    pub steam: SteamConfig,
    #[serde(default)]
    /// Enrichment run defaults.
    pub enrich: EnrichConfig,
    #[serde(default)]
    /// On-disk response cache.
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SteamConfig {
    /// Web API key; empty means environment variable or keyring.
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub steam_id: String,
    #[serde(default)]
    pub vanity: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub include_free_to_play: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EnrichConfig {
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub refresh: bool,
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,
    /// TTL for vanity-name resolutions.
    #[serde(default = "default_auth_ttl_minutes")]
    pub auth_ttl_minutes: u64,
    /// gpg recipient; empty disables encryption.
    #[serde(default)]
    pub gpg_recipient: String,
    /// Cache root; empty means the platform cache directory.
    #[serde(default)]
    pub dir: String,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StorageConfig {
    /// SQLite file; empty means the platform data directory.
    #[serde(default)]
    pub database_path: String,
}

impl Default for SteamConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            steam_id: String::new(),
            vanity: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
            include_free_to_play: false,
        }
    }
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: default_rate_limit_per_minute(),
            workers: default_workers(),
            refresh: false,
            fallback_enabled: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
            auth_ttl_minutes: default_auth_ttl_minutes(),
            gpg_recipient: String::new(),
            dir: String::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_rate_limit_per_minute() -> u32 {
    30
}

fn default_workers() -> usize {
    1
}

fn default_ttl_hours() -> u64 {
    24
}

fn default_auth_ttl_minutes() -> u64 {
    30
}

impl Config {
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(dirs::config_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join("steam-pick")
            .join("config.toml"))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_hours.saturating_mul(60 * 60))
    }

    pub fn auth_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.auth_ttl_minutes.saturating_mul(60))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.steam.request_timeout_secs)
    }

    pub fn gpg_recipient(&self) -> Option<&str> {
        Some(self.cache.gpg_recipient.trim()).filter(|recipient| !recipient.is_empty())
    }

    pub fn cache_dir(&self) -> Option<PathBuf> {
        Some(PathBuf::from(self.cache.dir.trim())).filter(|dir| !dir.as_os_str().is_empty())
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        Some(PathBuf::from(self.storage.database_path.trim()))
            .filter(|path| !path.as_os_str().is_empty())
    }

    /// Run settings from config, before any command-line override.
    pub fn enrich_settings(&self) -> EnrichSettings {
        EnrichSettings {
            workers: self.enrich.workers,
            requests_per_minute: self.enrich.rate_limit_per_minute,
            refresh: self.enrich.refresh,
            fallback_enabled: self.enrich.fallback_enabled,
        }
    }
}

pub fn sanitize_config(config: Config) -> Config {
    Config {
        steam: SteamConfig {
            request_timeout_secs: config
                .steam
                .request_timeout_secs
                .clamp(1, MAX_REQUEST_TIMEOUT_SECS),
            ..config.steam
        },
        enrich: EnrichConfig {
            rate_limit_per_minute: config.enrich.rate_limit_per_minute.max(1),
            workers: config.enrich.workers.clamp(1, MAX_WORKERS),
            ..config.enrich
        },
        cache: CacheConfig {
            ttl_hours: config.cache.ttl_hours.max(1),
            auth_ttl_minutes: config.cache.auth_ttl_minutes.max(1),
            ..config.cache
        },
        storage: config.storage,
    }
}

/// Clamps a command-line worker count the same way as the config value.
pub fn sanitize_workers(workers: usize) -> usize {
    workers.clamp(1, MAX_WORKERS)
}

pub fn persist_config_file(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let io_error = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    let config_text = toml::to_string(config)?;
    std::fs::write(path, config_text).map_err(io_error)
}

/// Reads the config at `path`, writing a default one first if it is missing.
pub fn load_or_create(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        persist_config_file(&Config::default(), path)?;
    }

    let config_content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = toml::from_str::<Config>(&config_content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(sanitize_config(config))
}

#[cfg(test)]
mod tests {
    use super::{load_or_create, persist_config_file, sanitize_config, Config};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_is_created_with_defaults() {
        let temp = TempDir::new().expect("temp dir should be created");
        let path = temp.path().join("steam-pick").join("config.toml");

        let config = load_or_create(&path).expect("config should load");
        assert!(path.exists());
        assert_eq!(config, Config::default());
        assert_eq!(config.enrich.rate_limit_per_minute, 30);
        assert_eq!(config.enrich.workers, 1);
        assert!(config.enrich.fallback_enabled);
        assert_eq!(config.cache_ttl(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.auth_ttl(), Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [enrich]
            workers = 4

            [cache]
            gpg_recipient = "me@example.com"
            "#,
        )
        .expect("partial config should parse");

        assert_eq!(config.enrich.workers, 4);
        assert_eq!(config.enrich.rate_limit_per_minute, 30);
        assert_eq!(config.gpg_recipient(), Some("me@example.com"));
        assert_eq!(config.steam.request_timeout_secs, 30);
        assert_eq!(config.cache_dir(), None);
    }

    #[test]
    fn test_sanitize_clamps_workers_and_rates() {
        let mut config = Config::default();
        config.enrich.workers = 500;
        config.enrich.rate_limit_per_minute = 0;
        config.cache.ttl_hours = 0;

        let sanitized = sanitize_config(config.clone());
        assert_eq!(sanitized.enrich.workers, 32);
        assert_eq!(sanitized.enrich.rate_limit_per_minute, 1);
        assert_eq!(sanitized.cache.ttl_hours, 1);

        config.enrich.workers = 0;
        assert_eq!(sanitize_config(config).enrich.workers, 1);
    }

    #[test]
    fn test_huge_durations_saturate_instead_of_overflowing() {
        let mut config = Config::default();
        config.cache.ttl_hours = u64::MAX;
        config.cache.auth_ttl_minutes = u64::MAX;
        config.steam.request_timeout_secs = u64::MAX;

        assert_eq!(config.cache_ttl(), Duration::from_secs(u64::MAX));
        assert_eq!(config.auth_ttl(), Duration::from_secs(u64::MAX));
        assert_eq!(
            sanitize_config(config).request_timeout(),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn test_persisted_config_round_trips() {
        let temp = TempDir::new().expect("temp dir should be created");
        let path = temp.path().join("config.toml");
        let mut config = Config::default();
        config.steam.vanity = "someone".to_string();
        config.storage.database_path = "/tmp/games.db".to_string();

        persist_config_file(&config, &path).expect("config should persist");
        let loaded = load_or_create(&path).expect("config should load");
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.database_path(),
            Some(std::path::PathBuf::from("/tmp/games.db"))
        );
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let temp = TempDir::new().expect("temp dir should be created");
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[enrich\nworkers = ").expect("write");
        assert!(load_or_create(&path).is_err());
    }
}
