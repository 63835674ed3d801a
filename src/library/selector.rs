//! Unplayed-game filtering and random picking over the stored catalog.

use rand::{rngs::StdRng, RngExt, SeedableRng};

use super::OwnedGame;

const STORE_APP_URL: &str = "https://store.steampowered.com/app";

/// A game chosen by `pick`, as printed to the user.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PickedGame {
    pub appid: u32,
    pub name: String,
    pub store_url: String,
}

impl From<&OwnedGame> for PickedGame {
    fn from(game: &OwnedGame) -> Self {
        Self {
            appid: game.appid,
            name: game.name.clone(),
            store_url: format!("{STORE_APP_URL}/{}", game.appid),
        }
    }
}

/// Games with no recorded playtime, in catalog order.
pub fn filter_unplayed(games: &[OwnedGame]) -> Vec<OwnedGame> {
    games
        .iter()
        .filter(|game| game.playtime_forever == 0)
        .cloned()
        .collect()
}

/// Builds the picking RNG. A seed makes the pick reproducible; without one
/// the OS entropy source is used.
pub fn picker_rng(seed: Option<u64>) -> Result<StdRng, getrandom::Error> {
    match seed {
        Some(seed) => Ok(StdRng::seed_from_u64(seed)),
        None => {
            let mut seed = [0u8; 32];
            getrandom::fill(&mut seed)?;
            Ok(StdRng::from_seed(seed))
        }
    }
}

pub fn pick_game<'a>(games: &'a [OwnedGame], rng: &mut StdRng) -> Option<&'a OwnedGame> {
    if games.is_empty() {
        return None;
    }
    games.get(rng.random_range(0..games.len()))
}
