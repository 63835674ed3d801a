//! Steam Web API client for the owned-games catalog.

use std::time::Duration;

use log::{debug, warn};

use super::LibraryError;
use crate::cache::TtlCache;
use crate::cancellation::CancellationSignal;
use crate::http::{HttpRequest, RetryingClient};

const STEAM_WEB_API_BASE_URL: &str = "https://api.steampowered.com";
const VANITY_RESOLVED: i32 = 1;

/// One owned title as returned by `IPlayerService/GetOwnedGames`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct OwnedGame {
    pub appid: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub playtime_forever: i64,
    #[serde(default)]
    pub img_icon_url: String,
    #[serde(default)]
    pub has_community_visible_stats: bool,
    #[serde(default)]
    pub playtime_windows_forever: i64,
    #[serde(default)]
    pub playtime_mac_forever: i64,
    #[serde(default)]
    pub playtime_linux_forever: i64,
    #[serde(default)]
    pub playtime_deck_forever: i64,
    #[serde(default)]
    pub rtime_last_played: i64,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct OwnedGamesResponse {
    #[serde(default)]
    pub response: OwnedGamesBody,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct OwnedGamesBody {
    #[serde(default)]
    pub game_count: u32,
    #[serde(default)]
    pub games: Vec<OwnedGame>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct VanityResponse {
    #[serde(default)]
    pub response: VanityBody,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct VanityBody {
    #[serde(default)]
    pub steamid: String,
    #[serde(default)]
    pub success: i32,
    #[serde(default)]
    pub message: String,
}

/// Result of an owned-games lookup.
///
/// Steam answers a private profile and an empty library identically, so a
/// response with no games and a zero count is reported as-is and left to the
/// caller to explain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnedGames {
    Games(Vec<OwnedGame>),
    EmptyOrPrivate,
}

pub struct SteamWebApiClient {
    api_key: String,
    client: RetryingClient,
    games_cache: TtlCache<OwnedGamesResponse>,
    vanity_cache: TtlCache<VanityResponse>,
    cache_ttl: Duration,
    auth_ttl: Duration,
    base_url: String,
}

impl SteamWebApiClient {
    pub fn new(
        api_key: String,
        client: RetryingClient,
        games_cache: TtlCache<OwnedGamesResponse>,
        vanity_cache: TtlCache<VanityResponse>,
        cache_ttl: Duration,
        auth_ttl: Duration,
    ) -> Self {
        Self {
            api_key,
            client,
            games_cache,
            vanity_cache,
            cache_ttl,
            auth_ttl,
            base_url: STEAM_WEB_API_BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    /// Cache key for user-supplied input; percent-encoding keeps path
    /// separators out of the file stem.
    fn user_cache_key(prefix: &str, value: &str) -> String {
        format!("{prefix}_{}", urlencoding::encode(value))
    }

    /// Resolves a community vanity name to a SteamID64.
    pub fn resolve_vanity_url(
        &self,
        vanity: &str,
        cancel: &CancellationSignal,
    ) -> Result<String, LibraryError> {
        let cache_key = Self::user_cache_key("vanity", vanity);
        match self.vanity_cache.get(&cache_key, self.auth_ttl) {
            Ok(Some(cached)) => return Ok(cached.response.steamid),
            Ok(None) => {}
            Err(error) => warn!("Library: vanity cache read failed: {}", error),
        }

        let request = HttpRequest::get(format!(
            "{}/ISteamUser/ResolveVanityURL/v1/",
            self.base_url
        ))
        .with_query(&[("key", self.api_key.as_str()), ("vanityurl", vanity)]);
        let result: VanityResponse = self
            .client
            .execute(&request, cancel)?
            .json()
            .map_err(|error| LibraryError::Decode(error.to_string()))?;

        if result.response.success != VANITY_RESOLVED {
            return Err(LibraryError::VanityNotResolved {
                vanity: vanity.to_string(),
                message: result.response.message,
            });
        }

        if let Err(error) = self.vanity_cache.set(&cache_key, &result) {
            warn!("Library: vanity cache write failed: {}", error);
        }
        Ok(result.response.steamid)
    }

    pub fn get_owned_games(
        &self,
        steam_id: &str,
        include_free: bool,
        cancel: &CancellationSignal,
    ) -> Result<OwnedGames, LibraryError> {
        let mut cache_key = Self::user_cache_key("owned_games", steam_id);
        if include_free {
            cache_key.push_str("_free");
        }
        match self.games_cache.get(&cache_key, self.cache_ttl) {
            Ok(Some(cached)) => {
                debug!("Library: owned games for {} served from cache", steam_id);
                return Ok(OwnedGames::Games(cached.response.games));
            }
            Ok(None) => {}
            Err(error) => warn!("Library: owned games cache read failed: {}", error),
        }

        let mut params = vec![
            ("key", self.api_key.as_str()),
            ("steamid", steam_id),
            ("include_appinfo", "1"),
            ("format", "json"),
        ];
        if include_free {
            params.push(("include_played_free_games", "1"));
        }
        let request = HttpRequest::get(format!(
            "{}/IPlayerService/GetOwnedGames/v1/",
            self.base_url
        ))
        .with_query(&params);
        let result: OwnedGamesResponse = self
            .client
            .execute(&request, cancel)?
            .json()
            .map_err(|error| LibraryError::Decode(error.to_string()))?;

        if result.response.games.is_empty() && result.response.game_count == 0 {
            return Ok(OwnedGames::EmptyOrPrivate);
        }

        if let Err(error) = self.games_cache.set(&cache_key, &result) {
            warn!("Library: owned games cache write failed: {}", error);
        }
        Ok(OwnedGames::Games(result.response.games))
    }
}
