use thiserror::Error;

use crate::config::Credentials;
use crate::platform::types::*;

/// Events pushed by the platform into a supervisor's inbox.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    /// The account session is established.
    LoggedOn,

    /// The game-coordinator handshake finished; lobby calls are now
    /// possible.
    Ready,

    /// The account's friend list changed in some way; the receiver
    /// should re-enumerate it.
    Friendlist,

    /// The client entered a lobby.
    LobbyNew { lobby_id: u64 },

    /// Anything about the current lobby changed.
    LobbyChanged(LobbyUpdate),

    /// Display-name information for some player arrived.
    PersonaState { steam_id: SteamId, name: String },
}

/// Failure of a single platform call.
///
/// `Transient` failures are logged and tolerated; `Fatal` ones mean
/// the session is unusable and the supervisor has to terminate.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform call failed: {0}")]
    Transient(String),

    #[error("platform session unrecoverable: {0}")]
    Fatal(String),
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// Where a client session delivers its events. Implemented over the
/// supervisor's inbox channel; boxed so client implementations do not
/// see the inbox type.
pub trait EventSink: Send {
    fn post(&self, event: PlatformEvent);
}

/// The capability set the supervisor requires of a game-client
/// session.
///
/// A session is single-threaded-cooperative: every method must be
/// called from the thread that owns the session, and calls may block
/// for network round-trips. Events arrive through the `EventSink`
/// passed to `Connector::connect`.
pub trait GameClient: Send {
    /// Start the account session.
    fn login(&mut self, credentials: &Credentials) -> PlatformResult<()>;

    /// Run the game-coordinator handshake. Also used by the watchdog to
    /// re-establish a silently dropped session.
    fn launch(&mut self) -> PlatformResult<()>;

    fn create_practice_lobby(
        &mut self,
        password: &str,
        options: &LobbyOptions,
    ) -> PlatformResult<()>;

    fn config_practice_lobby(&mut self, options: &LobbyOptions) -> PlatformResult<()>;

    /// Snapshot of the current lobby's configuration, as a key→scalar
    /// map.
    fn lobby_options(&self) -> PlatformResult<LobbyOptions>;

    fn launch_practice_lobby(&mut self) -> PlatformResult<()>;

    fn leave_practice_lobby(&mut self) -> PlatformResult<()>;

    fn abandon_current_game(&mut self) -> PlatformResult<()>;

    fn invite_to_lobby(&mut self, steam_id: SteamId) -> PlatformResult<()>;

    /// Kick a member off their team seat (not out of the lobby). Takes
    /// the 32-bit account projection.
    fn kick_from_team(&mut self, account_id: u32) -> PlatformResult<()>;

    /// Ids of the practice lobbies visible under the given password.
    fn practice_lobby_list(&mut self, password: &str) -> PlatformResult<Vec<u64>>;

    /// The account's current friend list.
    fn friends(&self) -> Vec<(SteamId, FriendRelationship)>;

    /// Send or accept a friend request.
    fn add_friend(&mut self, steam_id: SteamId) -> PlatformResult<()>;

    /// Direct message to another player.
    fn send_message(&mut self, steam_id: SteamId, text: &str) -> PlatformResult<()>;

    fn logout(&mut self);

    fn disconnect(&mut self);
}

/// Opens game-client sessions. The production implementation wraps
/// whatever client library talks to the platform; tests use the
/// scripted mock.
pub trait Connector: Send + Sync {
    /// Open a session that posts its events into `sink`. The returned
    /// client is handed to exactly one supervisor thread and never
    /// shared.
    fn connect(&self, sink: Box<dyn EventSink>) -> anyhow::Result<Box<dyn GameClient>>;
}
