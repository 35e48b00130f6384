use crate::database::WinningTeam;
use crate::platform::MatchOutcome;

/// Attributes of the external match backing a game, collected by the
/// supervisor when the lobby starts. Carries plain data only; nothing
/// in here references the supervisor's thread.
#[derive(Debug, Clone)]
pub struct MatchInfo {
    /// The platform's match id, or 0 if the lobby update omitted it.
    pub match_id: i64,
    pub lobby_id: i64,
    pub game_mode: i32,
    pub server_region: i32,
    pub league_id: i32,
}

/// Milestones a supervisor reports back to the controller. Delivered
/// over a channel into the control loop; per game id they arrive in
/// order, across game ids there is no ordering.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// The lobby left the setup phase and the match is being played.
    LobbyRunning { game_id: i64, info: MatchInfo },

    /// The match ended, either observed (postgame lobby state) or
    /// synthesized by the watchdog with an unknown outcome.
    LobbyEnded {
        game_id: i64,
        outcome: MatchOutcome,
    },

    /// The supervisor's session died before the game ended, f.e. a
    /// failed login. The controller cancels the game and reclaims the
    /// slot.
    Terminated { game_id: i64, reason: String },
}

/// Events the controller emits to whatever upstream surface is
/// listening (a chat bot, a CLI, the logs).
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// A game was formed and its lobby is being set up.
    GameFormed {
        game_id: i64,
        radiant: Vec<i64>,
        dire: Vec<i64>,
        /// Players that stayed in the queue this round; their selection
        /// weight keeps growing with their wait time.
        waited: Vec<i64>,
        password: String,
    },

    /// The lobby reached the running state.
    GameRunning { game_id: i64, match_id: i64 },

    /// The match was finalized.
    GameEnded {
        game_id: i64,
        match_id: i64,
        winning_team: WinningTeam,
    },

    /// The game was canceled before (or while) running; no ratings
    /// changed.
    GameCanceled { game_id: i64 },

    /// An admin rebalanced the rosters of an active game.
    GameRebalanced {
        game_id: i64,
        radiant: Vec<i64>,
        dire: Vec<i64>,
    },
}
