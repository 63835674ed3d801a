//! Generic TTL cache persisted as one JSON file per key.
//!
//! Each file holds a `{timestamp, data}` envelope. Reads degrade to a miss on
//! absence, expiry or a payload that no longer parses; only a decryption
//! failure on an existing encrypted artifact is surfaced as an error.

use std::fs;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::debug;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::encryption::{EncryptionCommand, GpgCommand, ENCRYPTED_EXTENSION};

const APP_CACHE_DIR_NAME: &str = "steam-pick";

static TEMP_FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("no user cache directory is available on this platform")]
    NoCacheDir,
    #[error("cache I/O failed for {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize cache entry")]
    Serialize(#[source] serde_json::Error),
    #[error("encrypting {path} failed: {message}")]
    Encryption { path: PathBuf, message: String },
    #[error("decrypting {path} failed: {message}")]
    Decryption { path: PathBuf, message: String },
}

#[derive(Serialize, Deserialize)]
struct CacheEntry<T> {
    /// Write time in unix milliseconds.
    timestamp: u64,
    data: T,
}

/// File count and byte size of a cache directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub file_count: usize,
    pub total_bytes: u64,
}

struct CacheEncryption {
    recipient: String,
    command: Arc<dyn EncryptionCommand>,
}

/// Key/value store for one payload type.
///
/// Key uniqueness is the caller's responsibility: the key is used verbatim as
/// the file stem.
pub struct TtlCache<T> {
    dir: PathBuf,
    encryption: Option<CacheEncryption>,
    _value: PhantomData<fn() -> T>,
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(
        ".{file_name}.{}.{}.tmp",
        std::process::id(),
        TEMP_FILE_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&temp_path, bytes).map_err(io_error(&temp_path))?;
    if let Err(source) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(CacheError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

impl<T> TtlCache<T> {
    /// Returns the per-user cache root shared by every cache instance.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|path| path.join(APP_CACHE_DIR_NAME))
    }

    /// Opens the cache rooted at the per-user default directory.
    pub fn open_default() -> Result<Self, CacheError> {
        Self::open(Self::default_dir().ok_or(CacheError::NoCacheDir)?)
    }

    /// Opens (creating if needed) a cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        Ok(Self {
            dir,
            encryption: None,
            _value: PhantomData,
        })
    }

    /// Encrypts entries for `recipient` with the system `gpg` binary.
    pub fn with_encryption(self, recipient: impl Into<String>) -> Self {
        self.with_encryption_command(recipient, Arc::new(GpgCommand))
    }

    pub fn with_encryption_command(
        mut self,
        recipient: impl Into<String>,
        command: Arc<dyn EncryptionCommand>,
    ) -> Self {
        self.encryption = Some(CacheEncryption {
            recipient: recipient.into(),
            command,
        });
        self
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        if self.encryption.is_some() {
            self.dir.join(format!("{key}.json.{ENCRYPTED_EXTENSION}"))
        } else {
            self.dir.join(format!("{key}.json"))
        }
    }

    /// Deletes the whole cache root. Succeeds when it is already gone.
    pub fn clear(&self) -> Result<(), CacheError> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Io {
                path: self.dir.clone(),
                source,
            }),
        }
    }

    /// Counts regular files directly under the cache root.
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Ok(CacheStats::default());
            }
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut stats = CacheStats::default();
        for entry in entries.flatten() {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            stats.file_count += 1;
            stats.total_bytes = stats.total_bytes.saturating_add(metadata.len());
        }
        Ok(stats)
    }
}

impl<T: Serialize + DeserializeOwned> TtlCache<T> {
    /// Returns the cached value for `key` if present, parseable and no older
    /// than `ttl`.
    pub fn get(&self, key: &str, ttl: Duration) -> Result<Option<T>, CacheError> {
        let path = self.entry_path(key);
        let bytes = match &self.encryption {
            Some(encryption) => {
                if !path.exists() {
                    return Ok(None);
                }
                match encryption.command.decrypt(&path) {
                    Ok(bytes) => bytes,
                    Err(_) if !path.exists() => return Ok(None),
                    Err(message) => return Err(CacheError::Decryption { path, message }),
                }
            }
            None => match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
                Err(source) => return Err(CacheError::Io { path, source }),
            },
        };

        let entry: CacheEntry<T> = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(error) => {
                debug!("Cache[{key}]: unreadable entry treated as miss: {error}");
                return Ok(None);
            }
        };

        let age_ms = now_unix_ms().saturating_sub(entry.timestamp);
        if u128::from(age_ms) > ttl.as_millis() {
            return Ok(None);
        }
        Ok(Some(entry.data))
    }

    /// Writes `value` under `key`, replacing any previous entry.
    pub fn set(&self, key: &str, value: &T) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;
        let payload = serde_json::to_vec(&CacheEntry {
            timestamp: now_unix_ms(),
            data: value,
        })
        .map_err(CacheError::Serialize)?;

        let path = self.entry_path(key);
        match &self.encryption {
            Some(encryption) => encryption
                .command
                .encrypt(&encryption.recipient, &payload, &path)
                .map_err(|message| CacheError::Encryption { path, message }),
            None => write_atomic(&path, &payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheError, TtlCache};
    use crate::cache::encryption::EncryptionCommand;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
    struct TestData {
        value: String,
    }

    /// Reversible byte transform standing in for gpg.
    struct XorCommand;

    impl EncryptionCommand for XorCommand {
        fn encrypt(&self, recipient: &str, plaintext: &[u8], output: &Path) -> Result<(), String> {
            assert_eq!(recipient, "test-key");
            let encrypted: Vec<u8> = plaintext.iter().map(|byte| byte ^ 0x5a).collect();
            fs::write(output, encrypted).map_err(|error| error.to_string())
        }

        fn decrypt(&self, input: &Path) -> Result<Vec<u8>, String> {
            let bytes = fs::read(input).map_err(|error| error.to_string())?;
            Ok(bytes.iter().map(|byte| byte ^ 0x5a).collect())
        }
    }

    struct BrokenDecryptCommand;

    impl EncryptionCommand for BrokenDecryptCommand {
        fn encrypt(&self, _recipient: &str, plaintext: &[u8], output: &Path) -> Result<(), String> {
            fs::write(output, plaintext).map_err(|error| error.to_string())
        }

        fn decrypt(&self, _input: &Path) -> Result<Vec<u8>, String> {
            Err("no secret key".to_string())
        }
    }

    fn sample(value: &str) -> TestData {
        TestData {
            value: value.to_string(),
        }
    }

    #[test]
    fn test_get_after_set_returns_written_value() {
        let temp = TempDir::new().expect("temp dir should be created");
        let cache = TtlCache::<TestData>::open(temp.path().join("cache")).expect("cache opens");

        cache.set("test-key", &sample("hello")).expect("set should succeed");
        let got = cache
            .get("test-key", Duration::from_secs(60))
            .expect("get should succeed");
        assert_eq!(got, Some(sample("hello")));
        assert!(temp.path().join("cache").join("test-key.json").exists());
    }

    #[test]
    fn test_get_after_ttl_elapsed_is_miss() {
        let temp = TempDir::new().expect("temp dir should be created");
        let cache = TtlCache::<TestData>::open(temp.path()).expect("cache opens");

        cache.set("short", &sample("stale")).expect("set should succeed");
        thread::sleep(Duration::from_millis(10));
        let got = cache
            .get("short", Duration::from_nanos(1))
            .expect("expired entry is not an error");
        assert_eq!(got, None);
    }

    #[test]
    fn test_get_missing_key_is_miss_without_error() {
        let temp = TempDir::new().expect("temp dir should be created");
        let cache = TtlCache::<TestData>::open(temp.path()).expect("cache opens");
        let got = cache
            .get("missing", Duration::from_secs(60))
            .expect("missing entry is not an error");
        assert_eq!(got, None);
    }

    #[test]
    fn test_corrupt_entry_degrades_to_miss() {
        let temp = TempDir::new().expect("temp dir should be created");
        let cache = TtlCache::<TestData>::open(temp.path()).expect("cache opens");
        fs::write(temp.path().join("garbled.json"), b"{\"timestamp\": 1, \"da")
            .expect("write garbage");

        let got = cache
            .get("garbled", Duration::from_secs(60))
            .expect("corrupt entry is not an error");
        assert_eq!(got, None);
    }

    #[test]
    fn test_set_overwrites_previous_entry() {
        let temp = TempDir::new().expect("temp dir should be created");
        let cache = TtlCache::<TestData>::open(temp.path()).expect("cache opens");
        cache.set("key", &sample("first")).expect("first set");
        cache.set("key", &sample("second")).expect("second set");

        let got = cache.get("key", Duration::from_secs(60)).expect("get");
        assert_eq!(got, Some(sample("second")));
        assert_eq!(cache.stats().expect("stats").file_count, 1);
    }

    #[test]
    fn test_stats_and_clear() {
        let temp = TempDir::new().expect("temp dir should be created");
        let root = temp.path().join("cache");
        let cache = TtlCache::<TestData>::open(&root).expect("cache opens");
        cache.set("a", &sample("one")).expect("set a");
        cache.set("b", &sample("two")).expect("set b");
        fs::create_dir_all(root.join("nested")).expect("nested dir");

        let stats = cache.stats().expect("stats should succeed");
        assert_eq!(stats.file_count, 2);
        assert!(stats.total_bytes > 0);

        cache.clear().expect("clear should succeed");
        assert!(!root.exists());
        cache.clear().expect("second clear is a no-op");

        let stats = cache.stats().expect("stats on missing root");
        assert_eq!(stats.file_count, 0);
        assert_eq!(stats.total_bytes, 0);
    }

    #[test]
    fn test_set_after_clear_recreates_root() {
        let temp = TempDir::new().expect("temp dir should be created");
        let cache = TtlCache::<TestData>::open(temp.path().join("cache")).expect("cache opens");
        cache.clear().expect("clear");
        cache.set("again", &sample("back")).expect("set after clear");
        assert_eq!(
            cache.get("again", Duration::from_secs(60)).expect("get"),
            Some(sample("back"))
        );
    }

    #[test]
    fn test_encrypted_round_trip_uses_encrypted_extension() {
        let temp = TempDir::new().expect("temp dir should be created");
        let cache = TtlCache::<TestData>::open(temp.path())
            .expect("cache opens")
            .with_encryption_command("test-key", Arc::new(XorCommand));
        assert!(cache.is_encrypted());

        cache.set("secret", &sample("hidden")).expect("set should succeed");
        let artifact = temp.path().join("secret.json.gpg");
        assert!(artifact.exists());
        let raw = fs::read(&artifact).expect("artifact readable");
        assert!(serde_json::from_slice::<serde_json::Value>(&raw).is_err());

        let got = cache
            .get("secret", Duration::from_secs(60))
            .expect("get should succeed");
        assert_eq!(got, Some(sample("hidden")));
    }

    #[test]
    fn test_encrypted_missing_entry_is_miss() {
        let temp = TempDir::new().expect("temp dir should be created");
        let cache = TtlCache::<TestData>::open(temp.path())
            .expect("cache opens")
            .with_encryption_command("test-key", Arc::new(BrokenDecryptCommand));
        let got = cache
            .get("absent", Duration::from_secs(60))
            .expect("absent entry is not an error");
        assert_eq!(got, None);
    }

    #[test]
    fn test_decryption_failure_on_existing_artifact_is_error() {
        let temp = TempDir::new().expect("temp dir should be created");
        let cache = TtlCache::<TestData>::open(temp.path())
            .expect("cache opens")
            .with_encryption_command("test-key", Arc::new(BrokenDecryptCommand));
        cache.set("locked", &sample("value")).expect("set should succeed");

        let result = cache.get("locked", Duration::from_secs(60));
        assert!(matches!(result, Err(CacheError::Decryption { .. })));
    }
}
