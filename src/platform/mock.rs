use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::Credentials;
use crate::platform::calls::*;
use crate::platform::types::*;

/// A scripted stand-in for the real game-client library.
///
/// Every `connect` produces one `MockSession` that records all calls
/// made against it and lets a test inject platform events, exactly the
/// way a live client would deliver them.
#[derive(Default)]
pub struct MockConnector {
    sessions: Mutex<Vec<Arc<MockSession>>>,
    plan: Mutex<MockPlan>,
}

/// Behavior knobs applied to sessions opened after the change.
#[derive(Clone)]
pub struct MockPlan {
    /// `login` fails with a fatal error.
    pub fail_login: bool,

    /// `launch` succeeds but never posts `Ready`, as a dead
    /// game-coordinator would.
    pub stall_ready: bool,

    /// `create_practice_lobby` fails.
    pub fail_create: bool,

    /// Lobby id reported by the `LobbyNew` event after a create.
    pub lobby_id: u64,
}

impl Default for MockPlan {
    fn default() -> Self {
        MockPlan {
            fail_login: false,
            stall_ready: false,
            fail_create: false,
            lobby_id: 9001,
        }
    }
}

impl MockConnector {
    pub fn new() -> Arc<MockConnector> {
        Arc::new(MockConnector::default())
    }

    pub fn set_plan(&self, plan: MockPlan) {
        *self.plan.lock().unwrap() = plan;
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn session(&self, idx: usize) -> Arc<MockSession> {
        self.sessions.lock().unwrap()[idx].clone()
    }

    /// Supervisors connect from their own threads; tests use this to
    /// wait until the session under test exists.
    pub fn wait_for_session(&self, idx: usize, timeout: Duration) -> Arc<MockSession> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(session) = self.sessions.lock().unwrap().get(idx) {
                return session.clone();
            }
            if Instant::now() > deadline {
                panic!("no mock session {} after {:?}", idx, timeout);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Connector for MockConnector {
    fn connect(&self, sink: Box<dyn EventSink>) -> anyhow::Result<Box<dyn GameClient>> {
        let session = Arc::new(MockSession {
            sink: Mutex::new(sink),
            state: Mutex::new(SessionState::default()),
            plan: self.plan.lock().unwrap().clone(),
        });
        self.sessions.lock().unwrap().push(session.clone());
        Ok(Box::new(MockClient { session }))
    }
}

/// Everything a test can observe about, or inject into, one session.
pub struct MockSession {
    sink: Mutex<Box<dyn EventSink>>,
    state: Mutex<SessionState>,
    plan: MockPlan,
}

#[derive(Default)]
struct SessionState {
    calls: Vec<MockCall>,
    lobby_list: Vec<u64>,
    friends: Vec<(SteamId, FriendRelationship)>,
    lobby_options: LobbyOptions,
}

/// One recorded call against a mock session.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Login(String),
    Launch,
    CreateLobby { password: String, options: LobbyOptions },
    ConfigLobby(LobbyOptions),
    LaunchLobby,
    LeaveLobby,
    AbandonGame,
    Invite(SteamId),
    KickFromTeam(u32),
    LobbyList,
    AddFriend(SteamId),
    Message(SteamId, String),
    Logout,
    Disconnect,
}

impl MockSession {
    /// Deliver a platform event to the owning supervisor.
    pub fn emit(&self, event: PlatformEvent) {
        self.sink.lock().unwrap().post(event);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, matches: impl Fn(&MockCall) -> bool) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| matches(c))
            .count()
    }

    /// What the platform's lobby-list probe reports.
    pub fn set_lobby_list(&self, lobby_ids: Vec<u64>) {
        self.state.lock().unwrap().lobby_list = lobby_ids;
    }

    pub fn set_friends(&self, friends: Vec<(SteamId, FriendRelationship)>) {
        self.state.lock().unwrap().friends = friends;
    }

    pub fn set_lobby_options(&self, options: LobbyOptions) {
        self.state.lock().unwrap().lobby_options = options;
    }

    fn record(&self, call: MockCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

struct MockClient {
    session: Arc<MockSession>,
}

impl GameClient for MockClient {
    fn login(&mut self, credentials: &Credentials) -> PlatformResult<()> {
        self.session
            .record(MockCall::Login(credentials.username.clone()));
        if self.session.plan.fail_login {
            return Err(PlatformError::Fatal("invalid credentials".to_string()));
        }
        self.session.emit(PlatformEvent::LoggedOn);
        Ok(())
    }

    fn launch(&mut self) -> PlatformResult<()> {
        self.session.record(MockCall::Launch);
        if !self.session.plan.stall_ready {
            self.session.emit(PlatformEvent::Ready);
        }
        Ok(())
    }

    fn create_practice_lobby(
        &mut self,
        password: &str,
        options: &LobbyOptions,
    ) -> PlatformResult<()> {
        self.session.record(MockCall::CreateLobby {
            password: password.to_string(),
            options: options.clone(),
        });
        if self.session.plan.fail_create {
            return Err(PlatformError::Transient("lobby create rejected".to_string()));
        }
        self.session.emit(PlatformEvent::LobbyNew {
            lobby_id: self.session.plan.lobby_id,
        });
        Ok(())
    }

    fn config_practice_lobby(&mut self, options: &LobbyOptions) -> PlatformResult<()> {
        self.session.record(MockCall::ConfigLobby(options.clone()));
        Ok(())
    }

    fn lobby_options(&self) -> PlatformResult<LobbyOptions> {
        Ok(self.session.state.lock().unwrap().lobby_options.clone())
    }

    fn launch_practice_lobby(&mut self) -> PlatformResult<()> {
        self.session.record(MockCall::LaunchLobby);
        Ok(())
    }

    fn leave_practice_lobby(&mut self) -> PlatformResult<()> {
        self.session.record(MockCall::LeaveLobby);
        Ok(())
    }

    fn abandon_current_game(&mut self) -> PlatformResult<()> {
        self.session.record(MockCall::AbandonGame);
        Ok(())
    }

    fn invite_to_lobby(&mut self, steam_id: SteamId) -> PlatformResult<()> {
        self.session.record(MockCall::Invite(steam_id));
        Ok(())
    }

    fn kick_from_team(&mut self, account_id: u32) -> PlatformResult<()> {
        self.session.record(MockCall::KickFromTeam(account_id));
        Ok(())
    }

    fn practice_lobby_list(&mut self, _password: &str) -> PlatformResult<Vec<u64>> {
        self.session.record(MockCall::LobbyList);
        Ok(self.session.state.lock().unwrap().lobby_list.clone())
    }

    fn friends(&self) -> Vec<(SteamId, FriendRelationship)> {
        self.session.state.lock().unwrap().friends.clone()
    }

    fn add_friend(&mut self, steam_id: SteamId) -> PlatformResult<()> {
        self.session.record(MockCall::AddFriend(steam_id));
        Ok(())
    }

    fn send_message(&mut self, steam_id: SteamId, text: &str) -> PlatformResult<()> {
        self.session
            .record(MockCall::Message(steam_id, text.to_string()));
        Ok(())
    }

    fn logout(&mut self) {
        self.session.record(MockCall::Logout);
    }

    fn disconnect(&mut self) {
        self.session.record(MockCall::Disconnect);
    }
}
