//! Primary detail source: the Steam Store `appdetails` endpoint.

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, warn};

use super::{DetailSource, SourceError};
use crate::cache::TtlCache;
use crate::cancellation::CancellationSignal;
use crate::http::{HttpRequest, RetryingClient};
use crate::protocol::{DetailPayload, DetailResult, DetailTag, WorkItem};

const STORE_APPDETAILS_URL: &str = "https://store.steampowered.com/api/appdetails";
pub const STEAM_STORE_SOURCE_NAME: &str = "Steam Store";

/// Per-app entry of the `appdetails` response map.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AppDetailsEntry {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<StoreAppDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StoreAppDetails {
    #[serde(default)]
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
    pub website: Option<String>,
    #[serde(default)]
    pub developers: Vec<String>,
    #[serde(default)]
    pub publishers: Vec<String>,
    #[serde(default)]
    pub categories: Vec<StoreCategory>,
    #[serde(default)]
    pub genres: Vec<StoreGenre>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StoreCategory {
    #[serde(default)]
    pub id: i64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StoreGenre {
    #[serde(default)]
    pub id: String,
    pub description: String,
}

/// Canonical store lookup keyed by app id.
pub struct SteamStoreSource {
    client: RetryingClient,
    cache: Option<TtlCache<AppDetailsEntry>>,
    cache_ttl: Duration,
    base_url: String,
}

impl SteamStoreSource {
    pub fn new(client: RetryingClient) -> Self {
        Self {
            client,
            cache: None,
            cache_ttl: Duration::ZERO,
            base_url: STORE_APPDETAILS_URL.to_string(),
        }
    }

    pub fn with_cache(mut self, cache: TtlCache<AppDetailsEntry>, ttl: Duration) -> Self {
        self.cache = Some(cache);
        self.cache_ttl = ttl;
        self
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    fn cache_key(app_id: u32) -> String {
        format!("appdetails_{app_id}")
    }

    fn to_result(entry: AppDetailsEntry) -> DetailResult {
        match entry.data {
            Some(data) if entry.success => DetailResult::Success(DetailPayload {
                name: data.name,
                short_description: data.short_description,
                detailed_description: data.detailed_description,
                about_the_game: data.about_the_game,
                header_image: data.header_image,
                website: data.website.unwrap_or_default(),
                developers: data.developers,
                publishers: data.publishers,
                genres: data
                    .genres
                    .into_iter()
                    .map(|genre| DetailTag {
                        id: genre.id,
                        description: genre.description,
                    })
                    .collect(),
                categories: data
                    .categories
                    .into_iter()
                    .map(|category| DetailTag {
                        id: category.id.to_string(),
                        description: category.description,
                    })
                    .collect(),
            }),
            _ => DetailResult::Failed,
        }
    }
}

impl DetailSource for SteamStoreSource {
    fn name(&self) -> &'static str {
        STEAM_STORE_SOURCE_NAME
    }

    fn cached_details(&self, item: &WorkItem) -> Option<DetailResult> {
        let cache = self.cache.as_ref()?;
        match cache.get(&Self::cache_key(item.app_id), self.cache_ttl) {
            Ok(entry) => entry.map(Self::to_result),
            Err(error) => {
                warn!(
                    "Enrichment[{}:{}]: store cache read failed: {}",
                    item.app_id, item.label, error
                );
                None
            }
        }
    }

    fn fetch_details(
        &self,
        item: &WorkItem,
        cancel: &CancellationSignal,
    ) -> Result<DetailResult, SourceError> {
        let app_id = item.app_id.to_string();
        let request = HttpRequest::get(&self.base_url).with_query(&[("appids", app_id.as_str())]);
        let response = self.client.execute(&request, cancel)?;
        let mut parsed: HashMap<String, AppDetailsEntry> =
            response.json().map_err(|error| SourceError::Decode {
                source_name: STEAM_STORE_SOURCE_NAME,
                message: error.to_string(),
            })?;

        let entry = parsed.remove(&app_id).unwrap_or_default();
        if !entry.success {
            debug!(
                "Enrichment[{}:{}]: store reports no details",
                item.app_id, item.label
            );
        }
        if let Some(cache) = self.cache.as_ref() {
            if let Err(error) = cache.set(&Self::cache_key(item.app_id), &entry) {
                warn!(
                    "Enrichment[{}:{}]: store cache write failed: {}",
                    item.app_id, item.label, error
                );
            }
        }
        Ok(Self::to_result(entry))
    }
}
