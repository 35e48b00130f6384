use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::database::queries::Store;
use crate::database::structs::*;
use crate::platform::SteamId;

/// In-memory `Store` used by the test suites.
#[derive(Default)]
pub struct MockStore {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    users: HashMap<i64, User>,
    matches: HashMap<i64, MatchRow>,
    match_players: Vec<MatchPlayerRow>,
    counter: i64,
}

impl MockStore {
    /// Register a player directly, bypassing `upsert_player`'s async signature.
    pub fn push_user(&self, player_id: i64, steam_id: u64, rating: i32) {
        let mut state = self.state.lock().unwrap();
        state.users.insert(
            player_id,
            User {
                player_id,
                steam_id: SteamId(steam_id),
                rating,
                registered_at: Utc::now().naive_utc(),
            },
        );
    }

    pub fn expect_match(&self, match_id: i64) -> MatchRow {
        self.state
            .lock()
            .unwrap()
            .matches
            .get(&match_id)
            .cloned()
            .expect("match id not in mock store")
    }

    pub fn match_players(&self, match_id: i64) -> Vec<MatchPlayerRow> {
        self.state
            .lock()
            .unwrap()
            .match_players
            .iter()
            .filter(|p| p.match_id == match_id)
            .cloned()
            .collect()
    }

    pub fn expect_rating(&self, player_id: i64) -> i32 {
        self.state
            .lock()
            .unwrap()
            .users
            .get(&player_id)
            .expect("player id not in mock store")
            .rating
    }
}

#[async_trait]
impl Store for MockStore {
    async fn migrate(&self) -> Result<()> {
        Ok(())
    }

    async fn player(&self, player_id: i64) -> Result<Option<User>> {
        Ok(self.state.lock().unwrap().users.get(&player_id).cloned())
    }

    async fn upsert_player(&self, user: &User) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.users.insert(user.player_id, user.clone());
        Ok(())
    }

    async fn rating(&self, player_id: i64) -> Result<Option<i32>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .get(&player_id)
            .map(|u| u.rating))
    }

    async fn set_rating(&self, player_id: i64, rating: i32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.users.get_mut(&player_id) {
            Some(user) => {
                user.rating = rating;
                Ok(())
            }
            None => Err(anyhow!("no such player: {}", player_id)),
        }
    }

    async fn steam_id(&self, player_id: i64) -> Result<Option<SteamId>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .get(&player_id)
            .map(|u| u.steam_id))
    }

    async fn next_game_id(&self) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        state.counter += 1;
        Ok(state.counter)
    }

    async fn insert_match(&self, row: &MatchRow, players: &[MatchPlayerRow]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.matches.contains_key(&row.match_id) {
            return Err(anyhow!("duplicate match id: {}", row.match_id));
        }
        state.matches.insert(row.match_id, row.clone());
        state.match_players.extend_from_slice(players);
        Ok(())
    }

    async fn finalize_match(&self, match_id: i64, winning_team: WinningTeam) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.matches.get_mut(&match_id) {
            Some(row) => {
                row.state = MatchState::Ended;
                row.winning_team = winning_team;
                Ok(())
            }
            None => Err(anyhow!("no such match: {}", match_id)),
        }
    }

    async fn unfinished_matches(&self) -> Result<Vec<MatchRow>> {
        let mut rows: Vec<MatchRow> = self
            .state
            .lock()
            .unwrap()
            .matches
            .values()
            .filter(|row| row.state != MatchState::Ended)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.game_id);
        Ok(rows)
    }
}
