//! Owned-games catalog: Web API access, user resolution, sync planning and
//! unplayed-game picks.

pub mod last_user;
pub mod selector;
pub mod steam_web_api;
pub mod sync_plan;

pub use last_user::LastUserStore;
pub use selector::{filter_unplayed, pick_game, picker_rng, PickedGame};
pub use steam_web_api::{OwnedGame, OwnedGames, SteamWebApiClient};
pub use sync_plan::SyncPlan;

use crate::http::HttpError;

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("invalid Steam Web API response: {0}")]
    Decode(String),
    #[error("vanity name '{vanity}' could not be resolved: {message}")]
    VanityNotResolved { vanity: String, message: String },
    #[error("a Steam ID is required: pass --steamid or --vanity, or set steam.steam_id in the config")]
    MissingSteamId,
}
