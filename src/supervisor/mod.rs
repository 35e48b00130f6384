use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

use crate::config::{
    Config, Credentials, READY_TIMEOUT, TEARDOWN_TIMEOUT, WATCHDOG_HARD_IDLE, WATCHDOG_MAX_GAME,
    WATCHDOG_MAX_NO_LOBBY, WATCHDOG_PROBE_INTERVAL, WATCHDOG_SOFT_IDLE,
};
use crate::event::SupervisorEvent;
use crate::platform::{Connector, PlatformEvent, SteamId};

mod session;
mod watchdog;

/// Why a supervisor operation was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SupervisorError {
    /// The client session did not reach readiness in time.
    #[error("client session not ready")]
    NotReady,

    /// Swapping needs the two players on opposite teams.
    #[error("players are not on opposing teams")]
    NotOpposingTeams,

    #[error("player {0} is already in the game")]
    PlayerAlreadyInGame(SteamId),

    #[error("player {0} is not in the game")]
    PlayerNotInGame(SteamId),

    /// The lobby for this game already exists; `create_lobby` is
    /// one-shot.
    #[error("lobby already created")]
    LobbyAlreadyCreated,

    /// The session is dead; only teardown remains.
    #[error("supervisor terminated")]
    Terminated,

    #[error("platform call failed: {0}")]
    Platform(String),
}

pub(crate) type Reply = oneshot::Sender<Result<(), SupervisorError>>;

/// Commands marshaled onto the supervisor's thread. Every variant that
/// expects completion carries a reply channel.
pub(crate) enum SupervisorCommand {
    CreateLobby {
        radiant: Vec<SteamId>,
        dire: Vec<SteamId>,
        password: String,
        reply: Reply,
    },
    Swap {
        a: SteamId,
        b: SteamId,
        reply: Reply,
    },
    Replace {
        leaving: SteamId,
        joining: SteamId,
        reply: Reply,
    },
    UpdateTeams {
        radiant: Vec<SteamId>,
        dire: Vec<SteamId>,
        reply: Reply,
    },
    ChangeMode {
        game_mode: i32,
        reply: Reply,
    },
    Shutdown,
}

impl SupervisorCommand {
    /// Answer the command without executing it.
    pub(crate) fn reply(self, res: Result<(), SupervisorError>) {
        match self {
            SupervisorCommand::CreateLobby { reply, .. }
            | SupervisorCommand::Swap { reply, .. }
            | SupervisorCommand::Replace { reply, .. }
            | SupervisorCommand::UpdateTeams { reply, .. }
            | SupervisorCommand::ChangeMode { reply, .. } => {
                let _ = reply.send(res);
            }
            SupervisorCommand::Shutdown => {}
        }
    }
}

/// Everything that lands in a supervisor's inbox: controller commands
/// and platform events, interleaved.
pub(crate) enum Mail {
    Command(SupervisorCommand),
    Platform(PlatformEvent),
}

/// Options applied to the lobby this supervisor creates.
#[derive(Debug, Clone)]
pub struct LobbyDefaults {
    pub game_name: String,
    pub server_region: i32,
    pub game_mode: i32,
    pub league_id: i32,
    pub allow_cheats: bool,
}

impl LobbyDefaults {
    pub fn for_game(config: &Config, game_id: i64) -> LobbyDefaults {
        LobbyDefaults {
            game_name: format!("{} Game {}", config.league_name, game_id),
            server_region: config.server_region,
            game_mode: config.game_mode,
            league_id: config.league_id,
            allow_cheats: config.debug_mode,
        }
    }
}

/// Timing knobs of one supervisor; production values come from the
/// constants in `config`, tests shrink them.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub ready_timeout: Duration,

    /// Inbox poll interval; bounds watchdog latency.
    pub tick: Duration,

    pub soft_idle: Duration,
    pub hard_idle: Duration,
    pub probe_interval: Duration,
    pub max_no_lobby: u32,
    pub max_game: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        SupervisorSettings {
            ready_timeout: READY_TIMEOUT,
            tick: Duration::from_millis(250),
            soft_idle: WATCHDOG_SOFT_IDLE,
            hard_idle: WATCHDOG_HARD_IDLE,
            probe_interval: WATCHDOG_PROBE_INTERVAL,
            max_no_lobby: WATCHDOG_MAX_NO_LOBBY,
            max_game: WATCHDOG_MAX_GAME,
        }
    }
}

/// Handle to one lobby supervisor.
///
/// The supervisor owns a game-client session on its own OS thread,
/// because the client library is single-threaded-cooperative within a
/// session and not thread-safe across them. Public operations are
/// marshaled onto that thread and awaited without blocking the
/// caller's scheduler; milestones come back asynchronously through the
/// controller's event channel.
pub struct Supervisor {
    game_id: i64,
    slot: usize,
    inbox: Mutex<Sender<Mail>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// Spawn the supervisor thread and start its login handshake.
    pub fn spawn(
        game_id: i64,
        slot: usize,
        credentials: Credentials,
        lobby: LobbyDefaults,
        settings: SupervisorSettings,
        connector: Arc<dyn Connector>,
        events: UnboundedSender<SupervisorEvent>,
    ) -> Arc<Supervisor> {
        let (inbox_tx, inbox_rx) = mpsc::channel();

        let ctx = session::SessionContext {
            game_id,
            credentials,
            lobby,
            settings,
            connector,
            events,
            inbox: inbox_rx,
            inbox_tx: inbox_tx.clone(),
        };
        let thread = std::thread::Builder::new()
            .name(format!("supervisor-{}", game_id))
            .spawn(move || session::run(ctx))
            .expect("failed to spawn supervisor thread");

        Arc::new(Supervisor {
            game_id,
            slot,
            inbox: Mutex::new(inbox_tx),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn game_id(&self) -> i64 {
        self.game_id
    }

    /// The credential slot this supervisor owns until teardown.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Create the lobby. Must be called exactly once; fails with
    /// `NotReady` if the session does not become ready within the
    /// configured timeout.
    pub async fn create_lobby(
        &self,
        radiant: Vec<SteamId>,
        dire: Vec<SteamId>,
        password: String,
    ) -> Result<(), SupervisorError> {
        self.request(|reply| SupervisorCommand::CreateLobby {
            radiant,
            dire,
            password,
            reply,
        })
        .await
    }

    /// Swap two players across teams. Fails with `NotOpposingTeams`
    /// unless they sit on opposite sides.
    pub async fn swap(&self, a: SteamId, b: SteamId) -> Result<(), SupervisorError> {
        self.request(|reply| SupervisorCommand::Swap { a, b, reply }).await
    }

    /// Replace one roster member with a player outside the game.
    pub async fn replace(
        &self,
        leaving: SteamId,
        joining: SteamId,
    ) -> Result<(), SupervisorError> {
        self.request(|reply| SupervisorCommand::Replace {
            leaving,
            joining,
            reply,
        })
        .await
    }

    /// Replace both rosters wholesale; currently-seated members that
    /// are no longer in the roster are kicked off their seats.
    pub async fn update_teams(
        &self,
        radiant: Vec<SteamId>,
        dire: Vec<SteamId>,
    ) -> Result<(), SupervisorError> {
        self.request(|reply| SupervisorCommand::UpdateTeams {
            radiant,
            dire,
            reply,
        })
        .await
    }

    /// Change the lobby's game mode, preserving the rest of its
    /// configuration.
    pub async fn change_mode(&self, game_mode: i32) -> Result<(), SupervisorError> {
        self.request(|reply| SupervisorCommand::ChangeMode { game_mode, reply })
            .await
    }

    /// Stop the session and join the thread. Idempotent; swallows all
    /// errors. Waits a bounded time for the thread before detaching it.
    pub async fn teardown(&self) {
        {
            let inbox = self.inbox.lock().unwrap();
            let _ = inbox.send(Mail::Command(SupervisorCommand::Shutdown));
        }
        let handle = self.thread.lock().unwrap().take();
        let Some(handle) = handle else {
            return;
        };
        let game_id = self.game_id;
        let join = tokio::task::spawn_blocking(move || {
            if handle.join().is_err() {
                log::error!("[game {}] supervisor thread panicked", game_id);
            }
        });
        if tokio::time::timeout(TEARDOWN_TIMEOUT, join).await.is_err() {
            log::error!(
                "[game {}] supervisor thread did not exit within {:?}; detaching",
                self.game_id,
                TEARDOWN_TIMEOUT
            );
        }
    }

    async fn request(
        &self,
        build: impl FnOnce(Reply) -> SupervisorCommand,
    ) -> Result<(), SupervisorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let inbox = self.inbox.lock().unwrap();
            inbox
                .send(Mail::Command(build(reply_tx)))
                .map_err(|_| SupervisorError::Terminated)?;
        }
        reply_rx.await.map_err(|_| SupervisorError::Terminated)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockCall, MockConnector, MockPlan};
    use crate::platform::{
        GameState, LobbyMember, LobbyState, LobbyTeam, LobbyUpdate, MatchOutcome, PlatformEvent,
    };
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn test_settings() -> SupervisorSettings {
        SupervisorSettings {
            ready_timeout: Duration::from_millis(200),
            tick: Duration::from_millis(5),
            soft_idle: Duration::from_millis(60),
            hard_idle: Duration::from_millis(80),
            probe_interval: Duration::from_millis(20),
            max_no_lobby: 3,
            max_game: Duration::from_secs(3600),
        }
    }

    fn test_lobby() -> LobbyDefaults {
        LobbyDefaults {
            game_name: "Test League Game 1".to_string(),
            server_region: 2,
            game_mode: 22,
            league_id: 99,
            allow_cheats: false,
        }
    }

    fn test_credentials() -> Credentials {
        Credentials {
            username: "bot_0".to_string(),
            password: "hunter2".to_string(),
        }
    }

    fn radiant_ids() -> Vec<SteamId> {
        (1..=5).map(SteamId).collect()
    }

    fn dire_ids() -> Vec<SteamId> {
        (6..=10).map(SteamId).collect()
    }

    fn spawn_supervisor(
        connector: &Arc<MockConnector>,
    ) -> (Arc<Supervisor>, UnboundedReceiver<SupervisorEvent>) {
        let (events_tx, events_rx) = unbounded_channel();
        let supervisor = Supervisor::spawn(
            1,
            0,
            test_credentials(),
            test_lobby(),
            test_settings(),
            connector.clone() as Arc<dyn Connector>,
            events_tx,
        );
        (supervisor, events_rx)
    }

    fn member(id: u64, team: LobbyTeam) -> LobbyMember {
        LobbyMember {
            steam_id: SteamId(id),
            team,
            name: format!("player{}", id),
            slot: id as u32,
        }
    }

    fn update(state: LobbyState, members: Vec<LobbyMember>) -> LobbyUpdate {
        LobbyUpdate {
            lobby_id: 9001,
            state,
            game_state: None,
            match_id: None,
            match_outcome: None,
            members,
        }
    }

    fn all_seated() -> Vec<LobbyMember> {
        (1..=5)
            .map(|id| member(id, LobbyTeam::GoodGuys))
            .chain((6..=10).map(|id| member(id, LobbyTeam::BadGuys)))
            .collect()
    }

    fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !cond() {
            if std::time::Instant::now() > deadline {
                panic!("timed out waiting for {}", what);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[tokio::test]
    async fn create_lobby_invites_the_roster() {
        let connector = MockConnector::new();
        let (supervisor, _events) = spawn_supervisor(&connector);

        supervisor
            .create_lobby(radiant_ids(), dire_ids(), "4321".to_string())
            .await
            .expect("create_lobby failed");

        let session = connector.wait_for_session(0, Duration::from_secs(1));
        assert_eq!(
            session.count_calls(|c| matches!(c, MockCall::CreateLobby { password, .. } if password == "4321")),
            1
        );
        // The LobbyNew event triggers invites for all ten members.
        wait_until("all invites", || {
            session.count_calls(|c| matches!(c, MockCall::Invite(_))) == 10
        });
        assert_eq!(
            session.count_calls(|c| matches!(c, MockCall::Message(_, text) if text.contains("4321"))),
            10
        );
        supervisor.teardown().await;
    }

    #[tokio::test]
    async fn create_lobby_times_out_when_never_ready() {
        let connector = MockConnector::new();
        connector.set_plan(MockPlan {
            stall_ready: true,
            ..Default::default()
        });
        let (supervisor, _events) = spawn_supervisor(&connector);

        let err = supervisor
            .create_lobby(radiant_ids(), dire_ids(), "4321".to_string())
            .await
            .unwrap_err();
        assert_eq!(err, SupervisorError::NotReady);
        supervisor.teardown().await;
    }

    #[tokio::test]
    async fn create_lobby_is_one_shot() {
        let connector = MockConnector::new();
        let (supervisor, _events) = spawn_supervisor(&connector);

        supervisor
            .create_lobby(radiant_ids(), dire_ids(), "4321".to_string())
            .await
            .unwrap();
        let err = supervisor
            .create_lobby(radiant_ids(), dire_ids(), "4321".to_string())
            .await
            .unwrap_err();
        assert_eq!(err, SupervisorError::LobbyAlreadyCreated);
        supervisor.teardown().await;
    }

    #[tokio::test]
    async fn failed_login_terminates_the_supervisor() {
        let connector = MockConnector::new();
        connector.set_plan(MockPlan {
            fail_login: true,
            ..Default::default()
        });
        let (supervisor, mut events) = spawn_supervisor(&connector);

        let event = events.recv().await.expect("no event");
        assert!(matches!(event, SupervisorEvent::Terminated { game_id: 1, .. }));

        let err = supervisor
            .create_lobby(radiant_ids(), dire_ids(), "4321".to_string())
            .await
            .unwrap_err();
        assert_eq!(err, SupervisorError::Terminated);
        supervisor.teardown().await;
    }

    #[tokio::test]
    async fn seating_enforcement_converges_and_launches_once() {
        let connector = MockConnector::new();
        let (supervisor, mut events) = spawn_supervisor(&connector);
        supervisor
            .create_lobby(radiant_ids(), dire_ids(), "4321".to_string())
            .await
            .unwrap();
        let session = connector.wait_for_session(0, Duration::from_secs(1));

        // Player 1 on the wrong side, player 99 seated without being in
        // the game, player 50 spectating: two kicks, no launch.
        let mut members = all_seated();
        members[0].team = LobbyTeam::BadGuys;
        members.push(member(99, LobbyTeam::GoodGuys));
        members.push(member(50, LobbyTeam::Spectator));
        session.emit(PlatformEvent::LobbyChanged(update(LobbyState::Ui, members)));

        wait_until("kicks", || {
            session.count_calls(|c| matches!(c, MockCall::KickFromTeam(_))) == 2
        });
        assert_eq!(
            session.count_calls(|c| matches!(c, MockCall::KickFromTeam(1))),
            1
        );
        assert_eq!(
            session.count_calls(|c| matches!(c, MockCall::KickFromTeam(99))),
            1
        );
        assert_eq!(
            session.count_calls(|c| matches!(c, MockCall::LaunchLobby)),
            0
        );

        // Everyone correct: exactly one launch, even across repeated
        // updates.
        session.emit(PlatformEvent::LobbyChanged(update(
            LobbyState::Ui,
            all_seated(),
        )));
        wait_until("launch", || {
            session.count_calls(|c| matches!(c, MockCall::LaunchLobby)) == 1
        });
        session.emit(PlatformEvent::LobbyChanged(update(
            LobbyState::Ui,
            all_seated(),
        )));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(
            session.count_calls(|c| matches!(c, MockCall::LaunchLobby)),
            1
        );

        // RUN reports the running milestone exactly once.
        let mut run = update(LobbyState::Run, all_seated());
        run.match_id = Some(42);
        session.emit(PlatformEvent::LobbyChanged(run.clone()));
        session.emit(PlatformEvent::LobbyChanged(run));

        let event = events.recv().await.expect("no event");
        match event {
            SupervisorEvent::LobbyRunning { game_id, info } => {
                assert_eq!(game_id, 1);
                assert_eq!(info.match_id, 42);
                assert_eq!(info.lobby_id, 9001);
            }
            other => panic!("unexpected event {:?}", other),
        }

        // POSTGAME ends the game exactly once.
        let mut post = update(LobbyState::Postgame, all_seated());
        post.match_id = Some(42);
        post.match_outcome = Some(MatchOutcome::RadiantWin);
        post.game_state = Some(GameState::PostGame);
        session.emit(PlatformEvent::LobbyChanged(post.clone()));
        session.emit(PlatformEvent::LobbyChanged(post));

        let event = events.recv().await.expect("no event");
        match event {
            SupervisorEvent::LobbyEnded { game_id, outcome } => {
                assert_eq!(game_id, 1);
                assert_eq!(outcome, MatchOutcome::RadiantWin);
            }
            other => panic!("unexpected event {:?}", other),
        }
        supervisor.teardown().await;

        // No duplicate milestones made it out.
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn swap_requires_opposing_teams() {
        let connector = MockConnector::new();
        let (supervisor, _events) = spawn_supervisor(&connector);
        supervisor
            .create_lobby(radiant_ids(), dire_ids(), "4321".to_string())
            .await
            .unwrap();
        let session = connector.wait_for_session(0, Duration::from_secs(1));

        // 1 radiant, 6 dire: fine; both get reseated via kicks.
        supervisor.swap(SteamId(1), SteamId(6)).await.unwrap();
        wait_until("swap kicks", || {
            session.count_calls(|c| matches!(c, MockCall::KickFromTeam(_))) == 2
        });

        // After the swap, 1 sits dire and 2 radiant: still opposing.
        supervisor.swap(SteamId(1), SteamId(2)).await.unwrap();

        // 3 and 4 are both radiant.
        let err = supervisor.swap(SteamId(3), SteamId(4)).await.unwrap_err();
        assert_eq!(err, SupervisorError::NotOpposingTeams);

        // An unknown player cannot be swapped either.
        let err = supervisor.swap(SteamId(3), SteamId(77)).await.unwrap_err();
        assert_eq!(err, SupervisorError::NotOpposingTeams);
        supervisor.teardown().await;
    }

    #[tokio::test]
    async fn replace_checks_roster_membership() {
        let connector = MockConnector::new();
        let (supervisor, _events) = spawn_supervisor(&connector);
        supervisor
            .create_lobby(radiant_ids(), dire_ids(), "4321".to_string())
            .await
            .unwrap();
        let session = connector.wait_for_session(0, Duration::from_secs(1));

        let err = supervisor
            .replace(SteamId(1), SteamId(6))
            .await
            .unwrap_err();
        assert_eq!(err, SupervisorError::PlayerAlreadyInGame(SteamId(6)));

        let err = supervisor
            .replace(SteamId(77), SteamId(88))
            .await
            .unwrap_err();
        assert_eq!(err, SupervisorError::PlayerNotInGame(SteamId(77)));

        supervisor.replace(SteamId(1), SteamId(11)).await.unwrap();
        wait_until("replace kick", || {
            session.count_calls(|c| matches!(c, MockCall::KickFromTeam(1))) == 1
        });
        // The newcomer is invited.
        assert_eq!(
            session.count_calls(|c| matches!(c, MockCall::Invite(SteamId(11)))),
            1
        );

        // The old player is out, so swapping them in again fails.
        let err = supervisor.swap(SteamId(1), SteamId(6)).await.unwrap_err();
        assert_eq!(err, SupervisorError::NotOpposingTeams);
        supervisor.teardown().await;
    }

    #[tokio::test]
    async fn update_teams_kicks_members_outside_the_new_roster() {
        let connector = MockConnector::new();
        let (supervisor, _events) = spawn_supervisor(&connector);
        supervisor
            .create_lobby(radiant_ids(), dire_ids(), "4321".to_string())
            .await
            .unwrap();
        let session = connector.wait_for_session(0, Duration::from_secs(1));

        // Seat everyone first so the session has a member list.
        session.emit(PlatformEvent::LobbyChanged(update(
            LobbyState::Ui,
            all_seated(),
        )));
        wait_until("launch", || {
            session.count_calls(|c| matches!(c, MockCall::LaunchLobby)) == 1
        });

        // Drop 5 and 10, bring in 11 and 12.
        let radiant: Vec<SteamId> = vec![1, 2, 3, 4, 11].into_iter().map(SteamId).collect();
        let dire: Vec<SteamId> = vec![6, 7, 8, 9, 12].into_iter().map(SteamId).collect();
        supervisor.update_teams(radiant, dire).await.unwrap();

        wait_until("stale kicks", || {
            session.count_calls(|c| matches!(c, MockCall::KickFromTeam(5))) == 1
                && session.count_calls(|c| matches!(c, MockCall::KickFromTeam(10))) == 1
        });
        supervisor.teardown().await;
    }

    #[tokio::test]
    async fn change_mode_round_trips_whitelisted_options() {
        use crate::platform::{LobbyOptions, OptionValue};

        let connector = MockConnector::new();
        let (supervisor, _events) = spawn_supervisor(&connector);
        supervisor
            .create_lobby(radiant_ids(), dire_ids(), "4321".to_string())
            .await
            .unwrap();
        let session = connector.wait_for_session(0, Duration::from_secs(1));

        let mut snapshot = LobbyOptions::new();
        snapshot.insert("game_name".to_string(), OptionValue::Text("x".to_string()));
        snapshot.insert("game_mode".to_string(), OptionValue::Int(22));
        snapshot.insert("pass_key".to_string(), OptionValue::Text("4321".to_string()));
        // Not whitelisted; must not be pushed back.
        snapshot.insert("previous_match_override".to_string(), OptionValue::Int(7));
        session.set_lobby_options(snapshot);

        supervisor.change_mode(2).await.unwrap();

        let configs: Vec<_> = session
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::ConfigLobby(options) => Some(options),
                _ => None,
            })
            .collect();
        assert_eq!(configs.len(), 1);
        let pushed = &configs[0];
        assert_eq!(pushed.get("game_mode"), Some(&OptionValue::Int(2)));
        assert_eq!(
            pushed.get("pass_key"),
            Some(&OptionValue::Text("4321".to_string()))
        );
        assert!(!pushed.contains_key("previous_match_override"));
        supervisor.teardown().await;
    }

    #[tokio::test]
    async fn friend_requests_from_roster_members_get_lobby_invites() {
        use crate::platform::FriendRelationship;

        let connector = MockConnector::new();
        let (supervisor, _events) = spawn_supervisor(&connector);
        supervisor
            .create_lobby(radiant_ids(), dire_ids(), "4321".to_string())
            .await
            .unwrap();
        let session = connector.wait_for_session(0, Duration::from_secs(1));
        let invites_before = session.count_calls(|c| matches!(c, MockCall::Invite(_)));

        session.set_friends(vec![
            (SteamId(3), FriendRelationship::RequestRecipient),
            (SteamId(77), FriendRelationship::RequestRecipient),
            (SteamId(4), FriendRelationship::Friend),
        ]);
        session.emit(PlatformEvent::Friendlist);

        wait_until("friend accepts", || {
            session.count_calls(|c| matches!(c, MockCall::AddFriend(_))) >= 2
        });
        // Both requesters are accepted; only the roster member gets an
        // invite.
        assert_eq!(
            session.count_calls(|c| matches!(c, MockCall::AddFriend(SteamId(77)))),
            1
        );
        wait_until("roster invite", || {
            session.count_calls(|c| matches!(c, MockCall::Invite(SteamId(3)))) >= 1
        });
        let invites_after = session.count_calls(|c| matches!(c, MockCall::Invite(_)));
        assert_eq!(invites_after, invites_before + 1);
        supervisor.teardown().await;
    }

    #[tokio::test]
    async fn watchdog_synthesizes_an_unknown_ending() {
        let connector = MockConnector::new();
        let (supervisor, mut events) = spawn_supervisor(&connector);
        supervisor
            .create_lobby(radiant_ids(), dire_ids(), "4321".to_string())
            .await
            .unwrap();
        let session = connector.wait_for_session(0, Duration::from_secs(1));

        // The platform's lobby list never contains our lobby.
        session.set_lobby_list(vec![]);

        let mut run = update(LobbyState::Run, all_seated());
        run.match_id = Some(42);
        session.emit(PlatformEvent::LobbyChanged(run));
        match events.recv().await.expect("no event") {
            SupervisorEvent::LobbyRunning { .. } => {}
            other => panic!("unexpected event {:?}", other),
        }

        // Feed nothing further: soft idle passes, probes miss, the
        // supervisor gives the session up.
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("watchdog never fired")
            .expect("event channel closed");
        match event {
            SupervisorEvent::LobbyEnded { game_id, outcome } => {
                assert_eq!(game_id, 1);
                assert_eq!(outcome, MatchOutcome::Unknown);
            }
            other => panic!("unexpected event {:?}", other),
        }
        // The silence also triggered a re-handshake attempt.
        assert!(session.count_calls(|c| matches!(c, MockCall::Launch)) >= 2);
        supervisor.teardown().await;
    }

    #[tokio::test]
    async fn teardown_is_idempotent_and_logs_out() {
        let connector = MockConnector::new();
        let (supervisor, _events) = spawn_supervisor(&connector);
        supervisor
            .create_lobby(radiant_ids(), dire_ids(), "4321".to_string())
            .await
            .unwrap();
        let session = connector.wait_for_session(0, Duration::from_secs(1));

        supervisor.teardown().await;
        supervisor.teardown().await;

        assert_eq!(session.count_calls(|c| matches!(c, MockCall::Logout)), 1);
        assert_eq!(
            session.count_calls(|c| matches!(c, MockCall::Disconnect)),
            1
        );
        // Commands after teardown fail cleanly.
        let err = supervisor.swap(SteamId(1), SteamId(6)).await.unwrap_err();
        assert_eq!(err, SupervisorError::Terminated);
    }
}
