use crate::enrichment::EnrichmentStore;
use crate::library::OwnedGame;
use crate::protocol::{DetailPayload, DetailResult, DetailTag, WorkItem};
use log::info;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

const STUB_NAME: &str = "Unavailable";
const EMPTY_JSON_ARRAY: &str = "[]";

/// Ordered schema migrations; each version is applied once.
const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    "CREATE TABLE IF NOT EXISTS owned_games (
        appid INTEGER PRIMARY KEY,
        name TEXT,
        playtime_forever INTEGER,
        rtime_last_played INTEGER,
        img_icon_url TEXT,
        has_community_visible_stats BOOLEAN,
        playtime_windows_forever INTEGER,
        playtime_mac_forever INTEGER,
        playtime_linux_forever INTEGER,
        playtime_deck_forever INTEGER,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );
    CREATE TABLE IF NOT EXISTS app_details (
        appid INTEGER PRIMARY KEY,
        name TEXT,
        short_description TEXT,
        detailed_description TEXT,
        about_the_game TEXT,
        header_image TEXT,
        website TEXT,
        developers TEXT,
        publishers TEXT,
        categories TEXT,
        genres TEXT,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );",
)];

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode details: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("could not determine data directory")]
    NoDataDir,
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub struct DbManager {
    conn: Mutex<Connection>,
}

impl DbManager {
    pub fn default_path() -> Result<PathBuf, StorageError> {
        Ok(dirs::data_dir()
            .ok_or(StorageError::NoDataDir)?
            .join("steam-pick")
            .join("steampick.db"))
    }

    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.exists()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        let db_manager = Self {
            conn: Mutex::new(conn),
        };
        db_manager.migrate()?;
        Ok(db_manager)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn migrate(&self) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        let current: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, sql) in MIGRATIONS.iter().filter(|(version, _)| *version > current) {
            info!("Storage: applying migration {}", version);
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_migrations (version) VALUES (?1)",
                params![version],
            )?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self.lock().query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?)
    }

    pub fn upsert_games(&self, games: &[OwnedGame]) -> Result<(), StorageError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO owned_games (
                    appid, name, playtime_forever, rtime_last_played, img_icon_url,
                    has_community_visible_stats, playtime_windows_forever,
                    playtime_mac_forever, playtime_linux_forever, playtime_deck_forever,
                    updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, CURRENT_TIMESTAMP)
                ON CONFLICT(appid) DO UPDATE SET
                    name = excluded.name,
                    playtime_forever = excluded.playtime_forever,
                    rtime_last_played = excluded.rtime_last_played,
                    img_icon_url = excluded.img_icon_url,
                    has_community_visible_stats = excluded.has_community_visible_stats,
                    playtime_windows_forever = excluded.playtime_windows_forever,
                    playtime_mac_forever = excluded.playtime_mac_forever,
                    playtime_linux_forever = excluded.playtime_linux_forever,
                    playtime_deck_forever = excluded.playtime_deck_forever,
                    updated_at = CURRENT_TIMESTAMP",
            )?;
            for game in games {
                stmt.execute(params![
                    game.appid,
                    game.name,
                    game.playtime_forever,
                    game.rtime_last_played,
                    game.img_icon_url,
                    game.has_community_visible_stats,
                    game.playtime_windows_forever,
                    game.playtime_mac_forever,
                    game.playtime_linux_forever,
                    game.playtime_deck_forever,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_owned_games(&self) -> Result<Vec<OwnedGame>, StorageError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT appid, name, playtime_forever, rtime_last_played
             FROM owned_games ORDER BY appid",
        )?;
        let game_iter = stmt.query_map([], |row| {
            Ok(OwnedGame {
                appid: row.get(0)?,
                name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                playtime_forever: row.get::<_, Option<i64>>(2)?.unwrap_or_default(),
                rtime_last_played: row.get::<_, Option<i64>>(3)?.unwrap_or_default(),
                ..OwnedGame::default()
            })
        })?;

        let mut games = Vec::new();
        for game in game_iter {
            games.push(game?);
        }
        Ok(games)
    }

    fn query_work_items(&self, sql: &str) -> Result<Vec<WorkItem>, StorageError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;
        let item_iter = stmt.query_map([], |row| {
            Ok(WorkItem::new(
                row.get(0)?,
                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            ))
        })?;

        let mut items = Vec::new();
        for item in item_iter {
            items.push(item?);
        }
        Ok(items)
    }

    /// Stored details for one app; stubs read back with the `Unavailable` name.
    pub fn get_details(&self, app_id: u32) -> Result<Option<DetailPayload>, StorageError> {
        let row = self
            .lock()
            .query_row(
                "SELECT name, short_description, detailed_description, about_the_game,
                        header_image, website, developers, publishers, genres, categories
                 FROM app_details WHERE appid = ?1",
                params![app_id],
                |row| {
                    let text = |index: usize| -> rusqlite::Result<String> {
                        Ok(row.get::<_, Option<String>>(index)?.unwrap_or_default())
                    };
                    Ok((
                        [text(0)?, text(1)?, text(2)?, text(3)?, text(4)?, text(5)?],
                        [text(6)?, text(7)?, text(8)?, text(9)?],
                    ))
                },
            )
            .optional()?;

        let Some((
            [name, short_description, detailed_description, about_the_game, header_image, website],
            [developers, publishers, genres, categories],
        )) = row
        else {
            return Ok(None);
        };

        Ok(Some(DetailPayload {
            name,
            short_description,
            detailed_description,
            about_the_game,
            header_image,
            website,
            developers: decode_json_list::<String>(&developers)?,
            publishers: decode_json_list::<String>(&publishers)?,
            genres: decode_json_list::<DetailTag>(&genres)?,
            categories: decode_json_list::<DetailTag>(&categories)?,
        }))
    }
}

fn decode_json_list<T: serde::de::DeserializeOwned>(raw: &str) -> Result<Vec<T>, StorageError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(raw)?)
}

impl EnrichmentStore for DbManager {
    fn get_all_records(&self) -> Result<Vec<WorkItem>, StorageError> {
        self.query_work_items("SELECT appid, name FROM owned_games ORDER BY appid")
    }

    fn get_records_missing_details(&self) -> Result<Vec<WorkItem>, StorageError> {
        self.query_work_items(
            "SELECT g.appid, g.name
             FROM owned_games g
             LEFT JOIN app_details ad ON g.appid = ad.appid
             WHERE ad.appid IS NULL
             ORDER BY g.appid",
        )
    }

    fn upsert_details(&self, app_id: u32, result: &DetailResult) -> Result<(), StorageError> {
        let stub = DetailPayload {
            name: STUB_NAME.to_string(),
            ..DetailPayload::default()
        };
        let (payload, developers, publishers, genres, categories) = match result {
            DetailResult::Success(payload) => (
                payload,
                serde_json::to_string(&payload.developers)?,
                serde_json::to_string(&payload.publishers)?,
                serde_json::to_string(&payload.genres)?,
                serde_json::to_string(&payload.categories)?,
            ),
            DetailResult::Failed => (
                &stub,
                EMPTY_JSON_ARRAY.to_string(),
                EMPTY_JSON_ARRAY.to_string(),
                EMPTY_JSON_ARRAY.to_string(),
                EMPTY_JSON_ARRAY.to_string(),
            ),
        };

        self.lock().execute(
            "INSERT INTO app_details (
                appid, name, short_description, detailed_description, about_the_game,
                header_image, website, developers, publishers, categories, genres, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, CURRENT_TIMESTAMP)
            ON CONFLICT(appid) DO UPDATE SET
                name = excluded.name,
                short_description = excluded.short_description,
                detailed_description = excluded.detailed_description,
                about_the_game = excluded.about_the_game,
                header_image = excluded.header_image,
                website = excluded.website,
                developers = excluded.developers,
                publishers = excluded.publishers,
                categories = excluded.categories,
                genres = excluded.genres,
                updated_at = CURRENT_TIMESTAMP",
            params![
                app_id,
                payload.name,
                payload.short_description,
                payload.detailed_description,
                payload.about_the_game,
                payload.header_image,
                payload.website,
                developers,
                publishers,
                categories,
                genres,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::DbManager;
    use crate::enrichment::EnrichmentStore;
    use crate::library::OwnedGame;
    use crate::protocol::{DetailPayload, DetailResult, DetailTag, WorkItem};
    use tempfile::TempDir;

    fn game(appid: u32, name: &str) -> OwnedGame {
        OwnedGame {
            appid,
            name: name.to_string(),
            playtime_forever: 42,
            rtime_last_played: 1_700_000_000,
            ..OwnedGame::default()
        }
    }

    fn seeded() -> DbManager {
        let db = DbManager::open_in_memory().expect("in-memory db should open");
        db.upsert_games(&[game(10, "Counter-Strike"), game(400, "Portal")])
            .expect("games should be stored");
        db
    }

    #[test]
    fn test_migrations_are_recorded_once() {
        let temp = TempDir::new().expect("temp dir should be created");
        let path = temp.path().join("nested").join("steampick.db");
        let first = DbManager::open(&path).expect("db should open");
        assert_eq!(first.schema_version().expect("version"), 1);
        drop(first);

        let reopened = DbManager::open(&path).expect("db should reopen");
        assert_eq!(reopened.schema_version().expect("version"), 1);
    }

    #[test]
    fn test_upsert_games_updates_existing_rows() {
        let db = seeded();
        let mut updated = game(400, "Portal");
        updated.playtime_forever = 500;
        db.upsert_games(&[updated]).expect("upsert should succeed");

        let games = db.get_owned_games().expect("games should load");
        assert_eq!(games.len(), 2);
        assert_eq!(games[1].playtime_forever, 500);
        assert_eq!(games[1].rtime_last_played, 1_700_000_000);
    }

    #[test]
    fn test_missing_details_shrinks_as_details_are_stored() {
        let db = seeded();
        assert_eq!(
            db.get_records_missing_details().expect("query"),
            vec![WorkItem::new(10, "Counter-Strike"), WorkItem::new(400, "Portal")]
        );

        let payload = DetailPayload {
            name: "Portal".to_string(),
            developers: vec!["Valve".to_string()],
            genres: vec![DetailTag {
                id: "1".to_string(),
                description: "Action".to_string(),
            }],
            ..DetailPayload::default()
        };
        db.upsert_details(400, &DetailResult::Success(payload.clone()))
            .expect("details should be stored");

        assert_eq!(
            db.get_records_missing_details().expect("query"),
            vec![WorkItem::new(10, "Counter-Strike")]
        );
        assert_eq!(db.get_all_records().expect("query").len(), 2);
        assert_eq!(db.get_details(400).expect("query"), Some(payload));
    }

    #[test]
    fn test_failed_result_persists_unavailable_stub() {
        let db = seeded();
        db.upsert_details(10, &DetailResult::Failed)
            .expect("stub should be stored");

        let stub = db
            .get_details(10)
            .expect("query")
            .expect("stub row should exist");
        assert_eq!(stub.name, "Unavailable");
        assert!(stub.genres.is_empty());
        assert!(stub.categories.is_empty());
        assert!(!db
            .get_records_missing_details()
            .expect("query")
            .iter()
            .any(|item| item.app_id == 10));
    }

    #[test]
    fn test_details_for_unknown_app_is_none() {
        let db = seeded();
        assert_eq!(db.get_details(999).expect("query"), None);
    }
}
