use std::collections::HashMap;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::Instant;

use tokio::sync::mpsc::UnboundedSender;

use crate::event::{MatchInfo, SupervisorEvent};
use crate::platform::*;
use crate::supervisor::watchdog::{Watchdog, WatchdogVerdict};
use crate::supervisor::{
    LobbyDefaults, Mail, Reply, SupervisorCommand, SupervisorError, SupervisorSettings,
};

/// Everything the supervisor thread needs to run one session.
pub(crate) struct SessionContext {
    pub game_id: i64,
    pub credentials: crate::config::Credentials,
    pub lobby: LobbyDefaults,
    pub settings: SupervisorSettings,
    pub connector: std::sync::Arc<dyn Connector>,
    pub events: UnboundedSender<SupervisorEvent>,
    pub inbox: Receiver<Mail>,
    pub inbox_tx: Sender<Mail>,
}

/// Where the session is in the lobby lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for login and the game-coordinator handshake.
    Init,

    /// The client can create a lobby.
    Ready,

    /// Lobby exists; members are being herded onto their seats.
    Seating,

    /// The match is being played.
    Running,

    /// A terminal lobby state was observed or synthesized.
    Ended,

    /// The session is unusable; only shutdown remains.
    Terminated,
}

struct PendingCreate {
    radiant: Vec<SteamId>,
    dire: Vec<SteamId>,
    password: String,
    reply: Reply,
    deadline: Instant,
}

/// One game-client session, owned by exactly one thread.
///
/// The client library is single-threaded-cooperative: every call on
/// `client` happens here and nowhere else. Commands and platform
/// events arrive interleaved through the inbox; replies leave through
/// oneshot channels and milestones through the controller's event
/// channel.
struct Session {
    game_id: i64,
    client: Box<dyn GameClient>,
    phase: Phase,
    lobby: LobbyDefaults,
    settings: SupervisorSettings,
    events: UnboundedSender<SupervisorEvent>,

    radiant: Vec<SteamId>,
    dire: Vec<SteamId>,
    password: String,
    lobby_id: Option<u64>,
    pending_create: Option<PendingCreate>,

    /// Last member list seen, used by wholesale roster updates to kick
    /// now-unwanted members.
    members: Vec<LobbyMember>,

    /// Display names resolved from persona events, for readable logs.
    names: HashMap<SteamId, String>,

    launched: bool,
    running_emitted: bool,
    ended_emitted: bool,

    watchdog: Watchdog,
}

/// Thread body of one supervisor.
pub(crate) fn run(ctx: SessionContext) {
    let SessionContext {
        game_id,
        credentials,
        lobby,
        settings,
        connector,
        events,
        inbox,
        inbox_tx,
    } = ctx;

    let sink = Box::new(InboxSink(inbox_tx));
    let client = match connector.connect(sink) {
        Ok(client) => client,
        Err(err) => {
            log::error!("[game {}] platform connect failed: {}", game_id, err);
            let _ = events.send(SupervisorEvent::Terminated {
                game_id,
                reason: err.to_string(),
            });
            drain_terminated(game_id, inbox);
            return;
        }
    };

    let watchdog = Watchdog::new(
        settings.soft_idle,
        settings.hard_idle,
        settings.probe_interval,
        settings.max_no_lobby,
        settings.max_game,
    );
    let mut session = Session {
        game_id,
        client,
        phase: Phase::Init,
        lobby,
        settings,
        events,
        radiant: vec![],
        dire: vec![],
        password: String::new(),
        lobby_id: None,
        pending_create: None,
        members: vec![],
        names: HashMap::new(),
        launched: false,
        running_emitted: false,
        ended_emitted: false,
        watchdog,
    };

    if let Err(err) = session.client.login(&credentials) {
        log::error!("[game {}] login failed: {}", game_id, err);
        session.terminate(err.to_string());
    }

    loop {
        match inbox.recv_timeout(session.settings.tick) {
            Ok(Mail::Command(SupervisorCommand::Shutdown)) => break,
            Ok(Mail::Command(cmd)) => session.handle_command(cmd),
            Ok(Mail::Platform(ev)) => session.handle_platform(ev),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        session.poll_deadlines();
    }

    session.close();
}

/// Answer every remaining command with a terminated error until the
/// handle drops or asks for shutdown; used when no client session
/// could be opened at all.
fn drain_terminated(game_id: i64, inbox: Receiver<Mail>) {
    for mail in inbox.iter() {
        match mail {
            Mail::Command(SupervisorCommand::Shutdown) => break,
            Mail::Command(cmd) => {
                cmd.reply(Err(SupervisorError::Terminated));
            }
            Mail::Platform(_) => {}
        }
    }
    log::debug!("[game {}] dead supervisor drained", game_id);
}

/// Delivers platform events into the supervisor's inbox.
struct InboxSink(Sender<Mail>);

impl EventSink for InboxSink {
    fn post(&self, event: PlatformEvent) {
        // The session dropping its inbox just means events stop
        // mattering.
        let _ = self.0.send(Mail::Platform(event));
    }
}

impl Session {
    fn handle_command(&mut self, cmd: SupervisorCommand) {
        if self.phase == Phase::Terminated {
            cmd.reply(Err(SupervisorError::Terminated));
            return;
        }
        match cmd {
            SupervisorCommand::CreateLobby {
                radiant,
                dire,
                password,
                reply,
            } => self.on_create_lobby(radiant, dire, password, reply),
            SupervisorCommand::Swap { a, b, reply } => {
                let res = self.on_swap(a, b);
                let _ = reply.send(res);
            }
            SupervisorCommand::Replace {
                leaving,
                joining,
                reply,
            } => {
                let res = self.on_replace(leaving, joining);
                let _ = reply.send(res);
            }
            SupervisorCommand::UpdateTeams {
                radiant,
                dire,
                reply,
            } => {
                let res = self.on_update_teams(radiant, dire);
                let _ = reply.send(res);
            }
            SupervisorCommand::ChangeMode { game_mode, reply } => {
                let res = self.on_change_mode(game_mode);
                let _ = reply.send(res);
            }
            SupervisorCommand::Shutdown => unreachable!("handled by the loop"),
        }
    }

    fn on_create_lobby(
        &mut self,
        radiant: Vec<SteamId>,
        dire: Vec<SteamId>,
        password: String,
        reply: Reply,
    ) {
        match self.phase {
            Phase::Ready => {
                let res = self.create_lobby(radiant, dire, password);
                let _ = reply.send(res);
            }
            Phase::Init => {
                // Not ready yet; park the request until the handshake
                // finishes or the deadline passes.
                self.pending_create = Some(PendingCreate {
                    radiant,
                    dire,
                    password,
                    reply,
                    deadline: Instant::now() + self.settings.ready_timeout,
                });
            }
            _ => {
                let _ = reply.send(Err(SupervisorError::LobbyAlreadyCreated));
            }
        }
    }

    fn create_lobby(
        &mut self,
        radiant: Vec<SteamId>,
        dire: Vec<SteamId>,
        password: String,
    ) -> Result<(), SupervisorError> {
        let mut options = LobbyOptions::new();
        options.insert(
            "game_name".to_string(),
            OptionValue::Text(self.lobby.game_name.clone()),
        );
        options.insert(
            "server_region".to_string(),
            OptionValue::Int(self.lobby.server_region.into()),
        );
        options.insert(
            "game_mode".to_string(),
            OptionValue::Int(self.lobby.game_mode.into()),
        );
        options.insert(
            "allow_cheats".to_string(),
            OptionValue::Bool(self.lobby.allow_cheats),
        );
        options.insert("allow_spectating".to_string(), OptionValue::Bool(true));
        options.insert(
            "leagueid".to_string(),
            OptionValue::Int(self.lobby.league_id.into()),
        );

        self.client
            .create_practice_lobby(&password, &options)
            .map_err(|err| {
                log::error!("[game {}] create lobby failed: {}", self.game_id, err);
                SupervisorError::Platform(err.to_string())
            })?;

        log::info!(
            "[game {}] lobby '{}' created with password {}",
            self.game_id,
            self.lobby.game_name,
            password
        );
        self.radiant = radiant;
        self.dire = dire;
        self.password = password;
        self.launched = false;
        self.phase = Phase::Seating;
        Ok(())
    }

    fn on_swap(&mut self, a: SteamId, b: SteamId) -> Result<(), SupervisorError> {
        let a_radiant = self.radiant.iter().position(|id| *id == a);
        let a_dire = self.dire.iter().position(|id| *id == a);
        let b_radiant = self.radiant.iter().position(|id| *id == b);
        let b_dire = self.dire.iter().position(|id| *id == b);

        match (a_radiant, a_dire, b_radiant, b_dire) {
            (Some(ai), None, None, Some(bi)) => {
                self.radiant[ai] = b;
                self.dire[bi] = a;
            }
            (None, Some(ai), Some(bi), None) => {
                self.dire[ai] = b;
                self.radiant[bi] = a;
            }
            _ => return Err(SupervisorError::NotOpposingTeams),
        }
        log::info!("[game {}] swapped {} and {}", self.game_id, a, b);

        // Kicking both off their seats makes the platform reseat them
        // on their new sides.
        if self.lobby_id.is_some() {
            self.kick_seat(a);
            self.kick_seat(b);
        }
        Ok(())
    }

    fn on_replace(
        &mut self,
        leaving: SteamId,
        joining: SteamId,
    ) -> Result<(), SupervisorError> {
        if self.radiant.contains(&joining) || self.dire.contains(&joining) {
            return Err(SupervisorError::PlayerAlreadyInGame(joining));
        }
        let seat = self
            .radiant
            .iter_mut()
            .chain(self.dire.iter_mut())
            .find(|id| **id == leaving)
            .ok_or(SupervisorError::PlayerNotInGame(leaving))?;
        *seat = joining;

        log::info!(
            "[game {}] replaced {} with {}",
            self.game_id,
            leaving,
            joining
        );
        if self.lobby_id.is_some() {
            self.kick_seat(leaving);
            if let Err(err) = self.client.invite_to_lobby(joining) {
                log::warn!("[game {}] invite failed: {}", self.game_id, err);
            }
        }
        Ok(())
    }

    fn on_update_teams(
        &mut self,
        radiant: Vec<SteamId>,
        dire: Vec<SteamId>,
    ) -> Result<(), SupervisorError> {
        self.radiant = radiant;
        self.dire = dire;
        log::info!("[game {}] lobby teams updated", self.game_id);

        // Anyone seated who is no longer in the roster loses their seat.
        let stale: Vec<SteamId> = self
            .members
            .iter()
            .filter(|m| matches!(m.team, LobbyTeam::GoodGuys | LobbyTeam::BadGuys))
            .map(|m| m.steam_id)
            .filter(|id| !self.radiant.contains(id) && !self.dire.contains(id))
            .collect();
        for id in stale {
            self.kick_seat(id);
        }
        Ok(())
    }

    fn on_change_mode(&mut self, game_mode: i32) -> Result<(), SupervisorError> {
        let snapshot = self
            .client
            .lobby_options()
            .map_err(|err| SupervisorError::Platform(err.to_string()))?;
        let mut options = filter_options(snapshot);
        options.insert("game_mode".to_string(), OptionValue::Int(game_mode.into()));

        self.client
            .config_practice_lobby(&options)
            .map_err(|err| SupervisorError::Platform(err.to_string()))?;
        log::info!("[game {}] game mode set to {}", self.game_id, game_mode);
        Ok(())
    }

    fn handle_platform(&mut self, event: PlatformEvent) {
        self.watchdog.touch();
        match event {
            PlatformEvent::LoggedOn => {
                log::info!("[game {}] logged on", self.game_id);
                if let Err(err) = self.client.launch() {
                    log::error!("[game {}] coordinator handshake failed: {}", self.game_id, err);
                    if matches!(err, PlatformError::Fatal(_)) {
                        self.terminate(err.to_string());
                    }
                }
            }
            PlatformEvent::Ready => {
                log::info!("[game {}] client ready", self.game_id);
                if self.phase == Phase::Init {
                    self.phase = Phase::Ready;
                }
                if let Some(pending) = self.pending_create.take() {
                    let res =
                        self.create_lobby(pending.radiant, pending.dire, pending.password);
                    let _ = pending.reply.send(res);
                }
            }
            PlatformEvent::Friendlist => self.process_friend_list(),
            PlatformEvent::LobbyNew { lobby_id } => {
                self.lobby_id = Some(lobby_id);
                self.invite_roster();
            }
            PlatformEvent::PersonaState { steam_id, name } => {
                self.names.insert(steam_id, name);
            }
            PlatformEvent::LobbyChanged(update) => self.on_lobby_changed(update),
        }
    }

    /// Accept pending friend requests; requesters that belong to the
    /// roster are invited right away.
    fn process_friend_list(&mut self) {
        for (steam_id, relationship) in self.client.friends() {
            if relationship != FriendRelationship::RequestRecipient {
                continue;
            }
            log::info!("[game {}] friend request from {}", self.game_id, steam_id);
            if let Err(err) = self.client.add_friend(steam_id) {
                log::warn!("[game {}] accepting friend failed: {}", self.game_id, err);
                continue;
            }
            if self.in_roster(steam_id) {
                if let Err(err) = self.client.invite_to_lobby(steam_id) {
                    log::warn!("[game {}] invite failed: {}", self.game_id, err);
                }
            }
        }
    }

    /// Friend, invite and message every roster member; ran when the
    /// lobby comes up.
    fn invite_roster(&mut self) {
        let roster: Vec<SteamId> = self
            .radiant
            .iter()
            .chain(self.dire.iter())
            .copied()
            .collect();
        let friends: Vec<SteamId> = self.client.friends().iter().map(|(id, _)| *id).collect();
        let text = format!(
            "Just invited you to a lobby! The lobby name is '{}' and the password is {}",
            self.lobby.game_name, self.password
        );
        for steam_id in roster {
            if !friends.contains(&steam_id) {
                if let Err(err) = self.client.add_friend(steam_id) {
                    log::warn!("[game {}] friending {} failed: {}", self.game_id, steam_id, err);
                }
            }
            if let Err(err) = self.client.invite_to_lobby(steam_id) {
                log::warn!("[game {}] inviting {} failed: {}", self.game_id, steam_id, err);
                continue;
            }
            if let Err(err) = self.client.send_message(steam_id, &text) {
                log::debug!("[game {}] messaging {} failed: {}", self.game_id, steam_id, err);
            }
            log::info!("[game {}] invited {}", self.game_id, self.display(steam_id));
        }
    }

    fn on_lobby_changed(&mut self, update: LobbyUpdate) {
        self.lobby_id = Some(update.lobby_id);
        self.members = update.members.clone();

        let postgame = update.state == LobbyState::Postgame
            || update.game_state == Some(GameState::PostGame);

        if postgame {
            self.observe_ended(&update);
        } else if update.state == LobbyState::Run {
            self.observe_running(&update);
        } else if update.state == LobbyState::Ui && self.phase == Phase::Seating {
            self.enforce_seating(&update);
        } else {
            log::debug!(
                "[game {}] lobby state {:?} ignored in phase {:?}",
                self.game_id,
                update.state,
                self.phase
            );
        }
    }

    fn observe_running(&mut self, update: &LobbyUpdate) {
        if self.running_emitted {
            return;
        }
        self.running_emitted = true;
        self.phase = Phase::Running;
        self.watchdog.start_game();

        let match_id = update.match_id.unwrap_or_else(|| {
            log::warn!("[game {}] running lobby without match id", self.game_id);
            0
        });
        log::info!(
            "[game {}] lobby running, match id {}",
            self.game_id,
            match_id
        );
        let _ = self.events.send(SupervisorEvent::LobbyRunning {
            game_id: self.game_id,
            info: MatchInfo {
                match_id: match_id as i64,
                lobby_id: update.lobby_id as i64,
                game_mode: self.lobby.game_mode,
                server_region: self.lobby.server_region,
                league_id: self.lobby.league_id,
            },
        });
    }

    fn observe_ended(&mut self, update: &LobbyUpdate) {
        if self.ended_emitted {
            return;
        }
        self.ended_emitted = true;
        self.phase = Phase::Ended;

        let outcome = update.match_outcome.unwrap_or(MatchOutcome::Unknown);
        log::info!(
            "[game {}] game ended, outcome {:?}",
            self.game_id,
            outcome
        );
        if let Err(err) = self.client.leave_practice_lobby() {
            log::warn!("[game {}] leaving lobby failed: {}", self.game_id, err);
        }
        let _ = self.events.send(SupervisorEvent::LobbyEnded {
            game_id: self.game_id,
            outcome,
        });
    }

    /// Herd members onto their assigned sides, and launch once
    /// everyone sits correctly.
    fn enforce_seating(&mut self, update: &LobbyUpdate) {
        let mut correct = 0;
        for member in &update.members {
            let in_radiant = self.radiant.contains(&member.steam_id);
            let in_dire = self.dire.contains(&member.steam_id);

            if in_radiant && member.team != LobbyTeam::GoodGuys {
                log::info!(
                    "[game {}] {}: wrong team (should be radiant)",
                    self.game_id,
                    self.member_name(member)
                );
                self.kick_seat(member.steam_id);
            } else if in_dire && member.team != LobbyTeam::BadGuys {
                log::info!(
                    "[game {}] {}: wrong team (should be dire)",
                    self.game_id,
                    self.member_name(member)
                );
                self.kick_seat(member.steam_id);
            } else if (in_radiant && member.team == LobbyTeam::GoodGuys)
                || (in_dire && member.team == LobbyTeam::BadGuys)
            {
                correct += 1;
            } else if matches!(member.team, LobbyTeam::GoodGuys | LobbyTeam::BadGuys) {
                log::info!(
                    "[game {}] {} not part of this game",
                    self.game_id,
                    self.member_name(member)
                );
                self.kick_seat(member.steam_id);
            }
            // Unassigned members and spectators are left alone.
        }

        let full = self.radiant.len() + self.dire.len();
        if correct == full && full > 0 && !self.launched {
            match self.client.launch_practice_lobby() {
                Ok(()) => {
                    self.launched = true;
                    log::info!("[game {}] game launched", self.game_id);
                }
                Err(err) => {
                    log::error!("[game {}] launching lobby failed: {}", self.game_id, err);
                }
            }
        }
    }

    fn poll_deadlines(&mut self) {
        let now = Instant::now();

        if let Some(pending) = &self.pending_create {
            if now >= pending.deadline {
                log::error!(
                    "[game {}] client not ready within {:?}",
                    self.game_id,
                    self.settings.ready_timeout
                );
                if let Some(pending) = self.pending_create.take() {
                    let _ = pending.reply.send(Err(SupervisorError::NotReady));
                }
            }
        }

        if self.phase != Phase::Running {
            return;
        }
        match self.watchdog.check(now) {
            WatchdogVerdict::Idle => {}
            WatchdogVerdict::Rehandshake => {
                log::warn!(
                    "[game {}] no platform activity; re-running coordinator handshake",
                    self.game_id
                );
                if let Err(err) = self.client.launch() {
                    log::error!("[game {}] re-handshake failed: {}", self.game_id, err);
                }
                self.probe();
            }
            WatchdogVerdict::Probe => self.probe(),
            WatchdogVerdict::Expired => {
                log::error!("[game {}] exceeded maximum game time", self.game_id);
                self.synthesize_ended();
            }
        }
    }

    fn probe(&mut self) {
        let now = Instant::now();
        match self.client.practice_lobby_list(&self.password) {
            Ok(lobby_ids) => {
                let present = self
                    .lobby_id
                    .map(|id| lobby_ids.contains(&id))
                    .unwrap_or(false);
                log::debug!(
                    "[game {}] lobby probe: present={} misses accumulate",
                    self.game_id,
                    present
                );
                self.watchdog.probe_result(present, now);
            }
            Err(err) => {
                log::warn!("[game {}] lobby probe failed: {}", self.game_id, err);
                self.watchdog.probe_result(false, now);
            }
        }
        if self.watchdog.given_up() {
            log::error!(
                "[game {}] lobby gone from platform; declaring game over",
                self.game_id
            );
            self.synthesize_ended();
        }
    }

    fn synthesize_ended(&mut self) {
        if self.ended_emitted {
            return;
        }
        self.ended_emitted = true;
        self.phase = Phase::Ended;
        if let Err(err) = self.client.leave_practice_lobby() {
            log::debug!("[game {}] leaving dead lobby failed: {}", self.game_id, err);
        }
        let _ = self.events.send(SupervisorEvent::LobbyEnded {
            game_id: self.game_id,
            outcome: MatchOutcome::Unknown,
        });
    }

    fn terminate(&mut self, reason: String) {
        self.phase = Phase::Terminated;
        if let Some(pending) = self.pending_create.take() {
            let _ = pending.reply.send(Err(SupervisorError::Terminated));
        }
        let _ = self.events.send(SupervisorEvent::Terminated {
            game_id: self.game_id,
            reason,
        });
    }

    /// Leave, log out and disconnect, swallowing every error.
    fn close(&mut self) {
        if self.lobby_id.is_some() && self.phase != Phase::Ended {
            if let Err(err) = self.client.leave_practice_lobby() {
                log::debug!("[game {}] leave on close failed: {}", self.game_id, err);
            }
            if let Err(err) = self.client.abandon_current_game() {
                log::debug!("[game {}] abandon on close failed: {}", self.game_id, err);
            }
        }
        self.client.logout();
        self.client.disconnect();
        log::info!("[game {}] supervisor closed", self.game_id);
    }

    fn kick_seat(&mut self, steam_id: SteamId) {
        if let Err(err) = self.client.kick_from_team(steam_id.account_id()) {
            log::warn!(
                "[game {}] kicking {} from team failed: {}",
                self.game_id,
                steam_id,
                err
            );
        }
    }

    fn in_roster(&self, steam_id: SteamId) -> bool {
        self.radiant.contains(&steam_id) || self.dire.contains(&steam_id)
    }

    fn display(&self, steam_id: SteamId) -> String {
        match self.names.get(&steam_id) {
            Some(name) => format!("{} ({})", name, steam_id),
            None => steam_id.to_string(),
        }
    }

    fn member_name(&self, member: &LobbyMember) -> String {
        if member.name.is_empty() {
            self.display(member.steam_id)
        } else {
            member.name.clone()
        }
    }
}
