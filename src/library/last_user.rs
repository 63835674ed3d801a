//! Remembers which account the last sync targeted.

use std::time::Duration;

use log::{debug, warn};

use super::{LibraryError, SteamWebApiClient};
use crate::cache::TtlCache;
use crate::cancellation::CancellationSignal;

const LAST_USER_KEY: &str = "last_user";
const LAST_USER_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct LastUser {
    pub steamid64: String,
    #[serde(default)]
    pub vanity: String,
}

pub struct LastUserStore {
    cache: TtlCache<LastUser>,
}

impl LastUserStore {
    /// `cache` should share the encryption setting of the other caches since
    /// the entry identifies the account.
    pub fn new(cache: TtlCache<LastUser>) -> Self {
        Self { cache }
    }

    pub fn remember(&self, steam_id: &str, vanity: &str) {
        let entry = LastUser {
            steamid64: steam_id.to_string(),
            vanity: vanity.to_string(),
        };
        if let Err(error) = self.cache.set(LAST_USER_KEY, &entry) {
            warn!("Library: failed to remember last user: {}", error);
        }
    }

    pub fn recall(&self) -> Option<LastUser> {
        match self.cache.get(LAST_USER_KEY, LAST_USER_TTL) {
            Ok(entry) => entry,
            Err(error) => {
                warn!("Library: failed to read last user: {}", error);
                None
            }
        }
    }

    /// Picks the account to sync: explicit id, then vanity name, then the
    /// remembered user, then the configured id or vanity.
    pub fn resolve_steam_id(
        &self,
        api: &SteamWebApiClient,
        steam_id_flag: Option<&str>,
        vanity_flag: Option<&str>,
        configured_id: &str,
        configured_vanity: &str,
        cancel: &CancellationSignal,
    ) -> Result<String, LibraryError> {
        if let Some(steam_id) = steam_id_flag.filter(|id| !id.is_empty()) {
            self.remember(steam_id, "");
            return Ok(steam_id.to_string());
        }
        if let Some(vanity) = vanity_flag.filter(|name| !name.is_empty()) {
            let steam_id = api.resolve_vanity_url(vanity, cancel)?;
            self.remember(&steam_id, vanity);
            return Ok(steam_id);
        }
        if let Some(last) = self.recall() {
            debug!("Library: using remembered user {}", last.steamid64);
            return Ok(last.steamid64);
        }
        if !configured_id.is_empty() {
            return Ok(configured_id.to_string());
        }
        if !configured_vanity.is_empty() {
            return api.resolve_vanity_url(configured_vanity, cancel);
        }
        Err(LibraryError::MissingSteamId)
    }
}
