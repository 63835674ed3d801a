//! Fallback detail source backed by the PCGamingWiki Cargo API.
//!
//! The wiki exposes developer, publisher and genre data for most titles the
//! store has delisted. It carries no description text or store categories, so
//! the payload it produces is intentionally thin and keeps the catalog label
//! as the display name.

use std::time::Duration;

use log::{debug, warn};

use super::{DetailSource, SourceError};
use crate::cache::TtlCache;
use crate::cancellation::CancellationSignal;
use crate::http::{HttpRequest, RetryingClient};
use crate::protocol::{DetailPayload, DetailResult, DetailTag, WorkItem};

const PCGW_API_URL: &str = "https://www.pcgamingwiki.com/w/api.php";
const CARGO_TABLE: &str = "Infobox_game";
const CARGO_FIELDS: &str = "Steam_AppID,Developers,Publishers,Genres";
const COMPANY_PREFIX: &str = "Company:";
pub const PCGAMINGWIKI_SOURCE_NAME: &str = "PCGamingWiki";

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CargoResponse {
    #[serde(default)]
    pub cargoquery: Vec<CargoRow>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CargoRow {
    pub title: CargoInfobox,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CargoInfobox {
    #[serde(default, rename = "Steam_AppID", alias = "Steam AppID")]
    pub steam_app_id: Option<String>,
    #[serde(default, rename = "Developers")]
    pub developers: Option<String>,
    #[serde(default, rename = "Publishers")]
    pub publishers: Option<String>,
    #[serde(default, rename = "Genres")]
    pub genres: Option<String>,
}

pub struct PcGamingWikiSource {
    client: RetryingClient,
    cache: Option<TtlCache<CargoResponse>>,
    cache_ttl: Duration,
    base_url: String,
}

impl PcGamingWikiSource {
    pub fn new(client: RetryingClient) -> Self {
        Self {
            client,
            cache: None,
            cache_ttl: Duration::ZERO,
            base_url: PCGW_API_URL.to_string(),
        }
    }

    pub fn with_cache(mut self, cache: TtlCache<CargoResponse>, ttl: Duration) -> Self {
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
        format!("pcgw_{app_id}")
    }

    /// Splits a comma separated wiki list, dropping blanks and `Company:`
    /// page prefixes.
    fn split_list(raw: Option<&str>) -> Vec<String> {
        raw.unwrap_or_default()
            .split(',')
            .map(str::trim)
            .map(|entry| entry.strip_prefix(COMPANY_PREFIX).unwrap_or(entry).trim())
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Prefers the row whose app id list names `app_id`; a title can list
    /// several store ids.
    fn pick_row(response: &CargoResponse, app_id: u32) -> Option<&CargoRow> {
        let app_id = app_id.to_string();
        response
            .cargoquery
            .iter()
            .find(|row| {
                row.title
                    .steam_app_id
                    .as_deref()
                    .is_some_and(|ids| ids.split(',').any(|id| id.trim() == app_id))
            })
            .or_else(|| response.cargoquery.first())
    }

    fn to_payload(item: &WorkItem, infobox: &CargoInfobox) -> DetailPayload {
        DetailPayload {
            name: item.label.clone(),
            short_description: "Data fetched from PCGamingWiki.".to_string(),
            detailed_description:
                "Data fetched from PCGamingWiki because Steam Store page is unavailable."
                    .to_string(),
            developers: Self::split_list(infobox.developers.as_deref()),
            publishers: Self::split_list(infobox.publishers.as_deref()),
            genres: Self::split_list(infobox.genres.as_deref())
                .into_iter()
                .map(|description| DetailTag {
                    id: String::new(),
                    description,
                })
                .collect(),
            categories: Vec::new(),
            ..DetailPayload::default()
        }
    }
}

impl DetailSource for PcGamingWikiSource {
    fn name(&self) -> &'static str {
        PCGAMINGWIKI_SOURCE_NAME
    }

    fn cached_details(&self, item: &WorkItem) -> Option<DetailResult> {
        let cache = self.cache.as_ref()?;
        match cache.get(&Self::cache_key(item.app_id), self.cache_ttl) {
            Ok(response) => response.as_ref().and_then(|response| {
                Self::pick_row(response, item.app_id)
                    .map(|row| DetailResult::Success(Self::to_payload(item, &row.title)))
            }),
            Err(error) => {
                warn!(
                    "Enrichment[{}:{}]: wiki cache read failed: {}",
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
        let filter = format!("Steam_AppID HOLDS \"{}\"", item.app_id);
        let request = HttpRequest::get(&self.base_url).with_query(&[
            ("action", "cargoquery"),
            ("tables", CARGO_TABLE),
            ("fields", CARGO_FIELDS),
            ("where", filter.as_str()),
            ("format", "json"),
        ]);
        let response: CargoResponse =
            self.client
                .execute(&request, cancel)?
                .json()
                .map_err(|error| SourceError::Decode {
                    source_name: PCGAMINGWIKI_SOURCE_NAME,
                    message: error.to_string(),
                })?;

        let Some(row) = Self::pick_row(&response, item.app_id) else {
            debug!(
                "Enrichment[{}:{}]: wiki has no infobox",
                item.app_id, item.label
            );
            return Err(SourceError::NoResults {
                source_name: PCGAMINGWIKI_SOURCE_NAME,
                app_id: item.app_id,
            });
        };
        let payload = Self::to_payload(item, &row.title);

        if let Some(cache) = self.cache.as_ref() {
            if let Err(error) = cache.set(&Self::cache_key(item.app_id), &response) {
                warn!(
                    "Enrichment[{}:{}]: wiki cache write failed: {}",
                    item.app_id, item.label, error
                );
            }
        }
        Ok(DetailResult::Success(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::PcGamingWikiSource;
    use crate::cache::TtlCache;
    use crate::cancellation::CancellationSignal;
    use crate::http::retrying_client::tests::{fast_policy, status, ScriptedTransport};
    use crate::http::RetryingClient;
    use crate::protocol::{DetailResult, WorkItem};
    use crate::sources::{DetailSource, SourceError};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const INFOBOX_RESPONSE: &str = r#"{
        "cargoquery": [{
            "title": {
                "Steam_AppID": "12345",
                "Developers": "Company:Looking Glass Studios,Company:Irrational Games",
                "Publishers": "Company:Electronic Arts",
                "Genres": "FPS, RPG,"
            }
        }]
    }"#;

    fn source(transport: &Arc<ScriptedTransport>) -> PcGamingWikiSource {
        PcGamingWikiSource::new(RetryingClient::new(transport.clone(), fast_policy()))
            .with_base_url("http://wiki.test/api.php")
    }

    #[test]
    fn test_infobox_maps_to_payload_with_catalog_label() {
        let transport = Arc::new(ScriptedTransport::new(vec![status(200, INFOBOX_RESPONSE)]));
        let result = source(&transport)
            .fetch_details(
                &WorkItem::new(12345, "System Shock 2"),
                &CancellationSignal::new(),
            )
            .expect("fetch should succeed");

        let DetailResult::Success(payload) = result else {
            panic!("expected success result");
        };
        assert_eq!(payload.name, "System Shock 2");
        assert_eq!(
            payload.developers,
            vec!["Looking Glass Studios", "Irrational Games"]
        );
        assert_eq!(payload.publishers, vec!["Electronic Arts"]);
        let genres: Vec<&str> = payload
            .genres
            .iter()
            .map(|genre| genre.description.as_str())
            .collect();
        assert_eq!(genres, vec!["FPS", "RPG"]);
        assert!(payload.categories.is_empty());
    }

    #[test]
    fn test_query_targets_infobox_by_app_id() {
        let transport = Arc::new(ScriptedTransport::new(vec![status(200, INFOBOX_RESPONSE)]));
        source(&transport)
            .fetch_details(&WorkItem::new(10, "Counter-Strike"), &CancellationSignal::new())
            .expect("fetch should succeed");

        let urls = transport.urls.lock().expect("urls");
        assert!(urls[0].starts_with("http://wiki.test/api.php?action=cargoquery"));
        assert!(urls[0].contains("tables=Infobox_game"));
        assert!(urls[0].contains("where=Steam_AppID%20HOLDS%20%2210%22"));
    }

    #[test]
    fn test_row_listing_requested_id_is_preferred() {
        let transport = Arc::new(ScriptedTransport::new(vec![status(
            200,
            r#"{"cargoquery": [
                {"title": {"Steam_AppID": "1", "Genres": "Racing"}},
                {"title": {"Steam_AppID": "7,8", "Genres": "Puzzle"}}
            ]}"#,
        )]));
        let result = source(&transport)
            .fetch_details(&WorkItem::new(8, "Bundle"), &CancellationSignal::new())
            .expect("fetch should succeed");
        let DetailResult::Success(payload) = result else {
            panic!("expected success result");
        };
        assert_eq!(payload.genres[0].description, "Puzzle");
    }

    #[test]
    fn test_empty_result_is_no_results_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![status(
            200,
            r#"{"cargoquery": []}"#,
        )]));
        let error = source(&transport)
            .fetch_details(&WorkItem::new(99, "Unknown"), &CancellationSignal::new())
            .expect_err("empty result should fail");
        assert!(matches!(error, SourceError::NoResults { app_id: 99, .. }));
    }

    #[test]
    fn test_null_fields_produce_empty_lists() {
        let transport = Arc::new(ScriptedTransport::new(vec![status(
            200,
            r#"{"cargoquery": [{"title": {"Steam AppID": "5", "Developers": null}}]}"#,
        )]));
        let result = source(&transport)
            .fetch_details(&WorkItem::new(5, "Sparse"), &CancellationSignal::new())
            .expect("fetch should succeed");
        let DetailResult::Success(payload) = result else {
            panic!("expected success result");
        };
        assert!(payload.developers.is_empty());
        assert!(payload.genres.is_empty());
    }

    #[test]
    fn test_only_found_infobox_is_cached() {
        let temp = TempDir::new().expect("temp dir should be created");
        let transport = Arc::new(ScriptedTransport::new(vec![
            status(200, r#"{"cargoquery": []}"#),
            status(200, INFOBOX_RESPONSE),
        ]));
        let wiki = source(&transport).with_cache(
            TtlCache::open(temp.path()).expect("cache opens"),
            Duration::from_secs(3600),
        );
        let missing = WorkItem::new(1, "Missing");
        let found = WorkItem::new(12345, "System Shock 2");

        assert!(wiki
            .fetch_details(&missing, &CancellationSignal::new())
            .is_err());
        assert_eq!(wiki.cached_details(&missing), None);

        wiki.fetch_details(&found, &CancellationSignal::new())
            .expect("fetch should succeed");
        let cached = wiki.cached_details(&found).expect("infobox should be cached");
        assert!(matches!(cached, DetailResult::Success(_)));
    }
}
