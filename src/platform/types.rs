use std::collections::BTreeMap;

use serde_repr::Serialize_repr;

/// A 64-bit platform "community" id. All routing (invites, rosters,
/// messages) uses this form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SteamId(pub u64);

impl SteamId {
    /// The 32-bit "account" projection, required by the kick-from-team
    /// call. The account number occupies the low 32 bits of the
    /// community form; the high bits carry universe/type/instance.
    pub fn account_id(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }
}

impl std::fmt::Display for SteamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an external lobby, as reported in lobby updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr)]
#[repr(u8)]
pub enum LobbyState {
    Ui = 0,
    ServerSetup = 1,
    Run = 2,
    Postgame = 3,
}

/// In-game progression, carried by some lobby updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr)]
#[repr(u8)]
pub enum GameState {
    Init = 0,
    Starting = 1,
    HeroSelection = 2,
    StrategyTime = 3,
    PreGame = 4,
    InProgress = 5,
    PostGame = 6,
}

/// Outcome of a finished match. The numeric values mirror the
/// platform's wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr)]
#[repr(u8)]
pub enum MatchOutcome {
    Unknown = 0,
    RadiantWin = 2,
    DireWin = 3,
}

/// Seat assignment of one lobby member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyTeam {
    /// The radiant side.
    GoodGuys,
    /// The dire side.
    BadGuys,
    Spectator,
    /// Member has not picked a seat.
    Unassigned,
}

/// One entry of a lobby update's member list.
#[derive(Debug, Clone)]
pub struct LobbyMember {
    pub steam_id: SteamId,
    pub team: LobbyTeam,
    pub name: String,
    pub slot: u32,
}

/// Snapshot delivered with every `lobby_changed` event.
#[derive(Debug, Clone)]
pub struct LobbyUpdate {
    pub lobby_id: u64,
    pub state: LobbyState,
    pub game_state: Option<GameState>,
    /// Assigned by the platform once the lobby starts.
    pub match_id: Option<u64>,
    pub match_outcome: Option<MatchOutcome>,
    pub members: Vec<LobbyMember>,
}

/// Relationship status of a friend-list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendRelationship {
    Friend,
    /// The other party sent us a friend request.
    RequestRecipient,
    /// We sent them a request that is still pending.
    RequestInitiator,
}

/// A scalar value of one lobby-configuration key.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Int(i64),
    Bool(bool),
    Text(String),
}

/// Lobby configuration as a key→scalar map, the shape in which the
/// platform's dynamic config snapshot is handled. Ordered so that logs
/// and tests are stable.
pub type LobbyOptions = BTreeMap<String, OptionValue>;

/// The lobby-configuration keys this service is willing to read back
/// from a snapshot and push again. Everything else the platform may
/// have stashed in the snapshot is dropped rather than round-tripped.
pub const LOBBY_OPTION_WHITELIST: [&str; 16] = [
    "game_name",
    "server_region",
    "game_mode",
    "visibility",
    "pass_key",
    "series_type",
    "dota_tv_delay",
    "allow_cheats",
    "fill_with_bots",
    "intro_mode",
    "start_setup",
    "pause_setting",
    "leagueid",
    "bot_difficulty",
    "allow_spectating",
    "allchat",
];

/// Keep only the whitelisted keys of a lobby-options snapshot.
pub fn filter_options(snapshot: LobbyOptions) -> LobbyOptions {
    snapshot
        .into_iter()
        .filter(|(key, _)| LOBBY_OPTION_WHITELIST.contains(&key.as_str()))
        .collect()
}
