use std::path::PathBuf;
use std::time::Duration;

use lazy_static::*;
use serde::{Deserialize, Serialize};

lazy_static! {
    /// Controller version.
    pub static ref VERSION: String = env!("CARGO_PKG_VERSION").to_string();
}

/// Exponent of the power mean used to aggregate a team's ratings.
///
/// Higher exponents emphasize the top-end players of a team, which
/// makes stacking one strong player with four weak ones score worse
/// than a mean-equal spread.
pub const POWER_MEAN_EXPONENT: i32 = 5;

/// Divisor of the Elo expectation formula. The conventional value is 400;
/// this league runs a flatter curve so that the spread of team aggregates
/// (which are power means, not single ratings) maps to sane win
/// probabilities.
pub const ELO_DIVISOR: f64 = 3322.0;

/// How many of the lowest-scoring team partitions are kept when forming
/// a game. One of these is then sampled, weighted by inverse score, so
/// that repeated games with the same queue do not always produce
/// identical teams.
pub const PARTITION_KEEP: usize = 5;

/// Added to partition scores before taking their inverse as a sampling
/// weight, so a perfectly fair partition does not divide by zero.
pub const SCORE_EPSILON: f64 = 1e-6;

/// Lobby passwords are uniform 4-digit numbers from this range.
pub const PASSWORD_RANGE: std::ops::RangeInclusive<u32> = 1000..=9999;

/// How long a supervisor may take to log in and finish the
/// game-coordinator handshake before `create_lobby` fails.
pub const READY_TIMEOUT: Duration = Duration::from_secs(60);

/// How long `teardown` waits for a supervisor thread to exit before
/// detaching it.
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// While a game runs, the supervisor probes the platform's lobby list
/// whenever it has not heard anything for this long.
pub const WATCHDOG_SOFT_IDLE: Duration = Duration::from_secs(120);

/// After this long without any platform event, the supervisor re-runs
/// the game-coordinator handshake before probing again.
pub const WATCHDOG_HARD_IDLE: Duration = Duration::from_secs(300);

/// Minimum spacing between two lobby-list probes.
pub const WATCHDOG_PROBE_INTERVAL: Duration = Duration::from_secs(20);

/// After this many consecutive probes in which the owned lobby is absent
/// from the platform's lobby list, the game is declared over with an
/// unknown outcome.
pub const WATCHDOG_MAX_NO_LOBBY: u32 = 6;

/// Wall-time cap on a single game. Sessions that exceed it are assumed
/// to be silently dropped by the platform.
pub const WATCHDOG_MAX_GAME: Duration = Duration::from_secs(3 * 60 * 60);

/// Lobby type stamped on match rows; this service only creates
/// practice lobbies.
pub const LOBBY_TYPE_PRACTICE: i32 = 1;

/// Login credentials of one automated game-client account.
#[derive(Clone, Deserialize, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never log the password.
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish()
    }
}

/// Controller config.
#[derive(Clone, Deserialize, Serialize)]
pub struct Config {
    /// Connection configuration parsed from libpq-style connection strings, f.e.
    /// `host=127.0.0.1 port=5432 user=postgres password=123 connect_timeout=10`.
    ///
    /// Reference: https://www.postgresql.org/docs/9.3/libpq-connect.html#LIBPQ-CONNSTRING
    pub postgres_connection: String,

    /// One entry per automated game-client account. The number of entries
    /// bounds how many lobbies can run at the same time.
    pub credentials: Vec<Credentials>,

    /// Players per team. The matchmaker selects `2 * team_size` players
    /// per game.
    #[serde(default = "default_team_size")]
    pub team_size: usize,

    /// Per-match K-factor of the Elo update.
    pub elo_k: i32,

    /// Exponent `q` of the rank-matched unfairness score. Higher values
    /// penalize single large skill gaps more than several small ones.
    #[serde(default = "default_unfairness_exponent")]
    pub unfairness_exponent: i32,

    /// Enables the platform's "allow cheats" lobby flag, for testing
    /// against lobbies that never fill with real players.
    #[serde(default)]
    pub debug_mode: bool,

    /// The external league identifier stamped on every lobby.
    pub league_id: i32,

    /// Display name used as the lobby-name prefix,
    /// f.e. `"Gargamel League"` produces `"Gargamel League Game 17"`.
    pub league_name: String,

    /// The platform's numeric server-region selector for created lobbies.
    #[serde(default = "default_server_region")]
    pub server_region: i32,

    /// The platform's numeric game-mode selector for created lobbies.
    #[serde(default = "default_game_mode")]
    pub game_mode: i32,
}

fn default_team_size() -> usize {
    5
}

fn default_unfairness_exponent() -> i32 {
    2
}

fn default_server_region() -> i32 {
    2
}

fn default_game_mode() -> i32 {
    22 // all pick
}

impl Config {
    /// Read the config file listed in the `MARSHAL_CONFIG` environment variable.
    ///
    /// # Panics
    /// - when `MARSHAL_CONFIG` is not set
    /// - when `MARSHAL_CONFIG` does not point to a valid TOML config
    /// - when the config is inconsistent (no credentials, oversized teams)
    pub fn load() -> Config {
        let f = Self::path().unwrap_or_else(|| {
            panic!("cannot locate config: use the '{}' env var", CONFIG_ENV_VAR)
        });
        let f_str = std::fs::read_to_string(f).expect("failed to read config file");
        let cfg: Config = toml::from_str(&f_str).expect("failed to parse config file");
        cfg.validate();
        cfg
    }

    fn validate(&self) {
        assert!(
            !self.credentials.is_empty(),
            "config needs at least one client credential pair"
        );
        assert!(
            (1..=8).contains(&self.team_size),
            "team_size must be in 1..=8; partitions are enumerated exhaustively"
        );
        assert!(self.elo_k > 0, "elo_k must be positive");
        assert!(
            self.unfairness_exponent > 0,
            "unfairness_exponent must be positive"
        );
    }

    fn path() -> Option<PathBuf> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(f) => Some(PathBuf::from(f)).filter(|p| p.is_file()),
            Err(_) => None,
        }
    }
}

const CONFIG_ENV_VAR: &str = "MARSHAL_CONFIG";
