use std::collections::HashMap;

use super::OwnedGame;

/// Difference between the fetched catalog and the stored one.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub new: Vec<OwnedGame>,
    /// Stored games whose playtime or last-played time changed.
    pub updated: Vec<OwnedGame>,
    pub unchanged: usize,
}

impl SyncPlan {
    pub fn build(fetched: Vec<OwnedGame>, existing: &[OwnedGame]) -> Self {
        let existing: HashMap<u32, &OwnedGame> =
            existing.iter().map(|game| (game.appid, game)).collect();
        let mut plan = Self::default();
        for game in fetched {
            match existing.get(&game.appid) {
                None => plan.new.push(game),
                Some(stored)
                    if stored.playtime_forever != game.playtime_forever
                        || stored.rtime_last_played != game.rtime_last_played =>
                {
                    plan.updated.push(game)
                }
                Some(_) => plan.unchanged += 1,
            }
        }
        plan
    }

    pub fn games_to_save(&self) -> Vec<OwnedGame> {
        self.new.iter().chain(self.updated.iter()).cloned().collect()
    }
}
