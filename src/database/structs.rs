use chrono::NaiveDateTime;
use postgres_types::{FromSql, ToSql};
use serde_repr::Serialize_repr;

use crate::platform::SteamId;

/// Database player that registered with the league.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    /// Opaque identity key handed in by the upstream surface.
    pub player_id: i64,

    /// The player's 64-bit platform community id.
    pub steam_id: SteamId,

    /// The player's league rating.
    pub rating: i32,

    /// The moment this player was registered.
    pub registered_at: NaiveDateTime,
}

/// Lifecycle state of a match row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ToSql, FromSql)]
#[postgres(name = "match_state")]
pub enum MatchState {
    #[postgres(name = "pending")]
    Pending,
    #[postgres(name = "running")]
    Running,
    #[postgres(name = "ended")]
    Ended,
}

/// Which side won a match. `None` covers matches that were finalized
/// without a known outcome, f.e. when the watchdog declared a hung
/// session over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ToSql, FromSql)]
#[postgres(name = "winning_team")]
pub enum WinningTeam {
    #[postgres(name = "none")]
    None,
    #[postgres(name = "radiant")]
    Radiant,
    #[postgres(name = "dire")]
    Dire,
}

/// The two combat sides of a lobby; also the `team` discriminant of
/// `match_players` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr)]
#[repr(i16)]
pub enum Side {
    Radiant = 0,
    Dire = 1,
}

impl Side {
    pub fn winner(self) -> WinningTeam {
        match self {
            Side::Radiant => WinningTeam::Radiant,
            Side::Dire => WinningTeam::Dire,
        }
    }
}

/// Database match.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRow {
    /// The platform's match id, assigned when the lobby starts.
    pub match_id: i64,

    /// The platform's lobby id.
    pub lobby_id: i64,

    /// Our own sequential game id.
    pub game_id: i64,

    pub game_mode: i32,
    pub server_region: i32,
    pub lobby_type: i32,
    pub league_id: i32,

    pub state: MatchState,
    pub winning_team: WinningTeam,
}

/// One roster seat of a match, with the player's rating frozen at the
/// moment the match started.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchPlayerRow {
    pub match_id: i64,
    pub player_id: i64,
    pub team: Side,
    pub rating_at_start: i32,
}

impl From<tokio_postgres::Row> for User {
    fn from(row: tokio_postgres::Row) -> Self {
        User {
            player_id: row.get("player_id"),
            steam_id: SteamId(row.get::<_, i64>("steam_id") as u64),
            rating: row.get("rating"),
            registered_at: row.get("registered_at"),
        }
    }
}

impl From<tokio_postgres::Row> for MatchRow {
    fn from(row: tokio_postgres::Row) -> Self {
        MatchRow {
            match_id: row.get("match_id"),
            lobby_id: row.get("lobby_id"),
            game_id: row.get("game_id"),
            game_mode: row.get("game_mode"),
            server_region: row.get("server_region"),
            lobby_type: row.get("lobby_type"),
            league_id: row.get("league_id"),
            state: row.get("state"),
            winning_team: row.get("winning_team"),
        }
    }
}
