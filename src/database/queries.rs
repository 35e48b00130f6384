use anyhow::Result;
use async_trait::async_trait;

use crate::database::structs::*;
use crate::platform::SteamId;

/// The persistent operations the controller needs. Each call is one
/// transaction; failures bubble up and the caller decides whether to
/// retry or surface them.
#[async_trait]
pub trait Store: Send + Sync {
    /// Check for pending database migrations and execute them.
    async fn migrate(&self) -> Result<()>;

    /// Return the specified player, or `None` if no such player is registered.
    async fn player(&self, player_id: i64) -> Result<Option<User>>;

    /// Register a player, or update their platform id and rating if the
    /// player already exists.
    async fn upsert_player(&self, user: &User) -> Result<()>;

    /// The player's current rating, or `None` if the player is unknown.
    async fn rating(&self, player_id: i64) -> Result<Option<i32>>;

    /// Overwrite the player's rating.
    async fn set_rating(&self, player_id: i64, rating: i32) -> Result<()>;

    /// The player's 64-bit platform id, or `None` if the player is unknown.
    async fn steam_id(&self, player_id: i64) -> Result<Option<SteamId>>;

    /// Bump and return the sequential game counter.
    async fn next_game_id(&self) -> Result<i64>;

    /// Insert a match row together with all of its roster rows.
    ///
    /// The row and its players are written in a single transaction, so a
    /// match can never be observed without its roster.
    async fn insert_match(&self, row: &MatchRow, players: &[MatchPlayerRow]) -> Result<()>;

    /// Mark a match as ended with the given outcome.
    async fn finalize_match(&self, match_id: i64, winning_team: WinningTeam) -> Result<()>;

    /// List all matches that have not reached the `ended` state.
    async fn unfinished_matches(&self) -> Result<Vec<MatchRow>>;
}
