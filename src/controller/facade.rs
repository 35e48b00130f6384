use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;

use crate::command::{Command, CommandOutput};
use crate::config::Config;
use crate::controller::GameError;
use crate::database::Store;
use crate::event::{ControllerEvent, SupervisorEvent};
use crate::matchmaker::{Matchmaker, QueuedPlayer};
use crate::platform::{Connector, SteamId};
use crate::pool::CredentialPool;
use crate::supervisor::{Supervisor, SupervisorSettings};

/// One game the controller is tracking, from lobby creation to
/// teardown.
pub(super) struct GameEntry {
    pub supervisor: Arc<Supervisor>,

    /// Rosters with each player's rating at selection time.
    pub radiant: Vec<QueuedPlayer>,
    pub dire: Vec<QueuedPlayer>,

    pub password: String,

    /// The platform's match id, known once the lobby runs.
    pub match_id: Option<i64>,
}

impl GameEntry {
    pub fn player_ids(&self) -> (Vec<i64>, Vec<i64>) {
        (
            self.radiant.iter().map(|p| p.player_id).collect(),
            self.dire.iter().map(|p| p.player_id).collect(),
        )
    }
}

/// Games keyed by game id. `pending` holds games whose lobby exists
/// but has not reached the running state; `active` holds running
/// games. Only the control loop mutates either map.
#[derive(Default)]
pub(super) struct GameRegistry {
    pub pending: HashMap<i64, GameEntry>,
    pub active: HashMap<i64, GameEntry>,
}

impl GameRegistry {
    pub fn get(&self, game_id: i64) -> Option<&GameEntry> {
        self.pending.get(&game_id).or_else(|| self.active.get(&game_id))
    }

    pub fn get_mut(&mut self, game_id: i64) -> Option<&mut GameEntry> {
        match self.pending.get_mut(&game_id) {
            Some(entry) => Some(entry),
            None => self.active.get_mut(&game_id),
        }
    }

    pub fn remove(&mut self, game_id: i64) -> Option<GameEntry> {
        self.pending
            .remove(&game_id)
            .or_else(|| self.active.remove(&game_id))
    }
}

/// This facade ties the matchmaker, the credential pool, the store and
/// the supervisors together behind the command/event surface that
/// upstream (a chat bot, a CLI) talks to.
#[derive(Clone)]
pub struct Controller {
    pub(super) config: Config,
    pub(super) store: Arc<dyn Store>,
    pub(super) connector: Arc<dyn Connector>,
    pub(super) matchmaker: Arc<Matchmaker>,
    pub(super) pool: Arc<CredentialPool>,
    pub(super) games: Arc<RwLock<GameRegistry>>,
    pub(super) events: UnboundedSender<ControllerEvent>,
    pub(super) supervisor_events: UnboundedSender<SupervisorEvent>,
    pub(super) supervisor_settings: SupervisorSettings,
}

impl Controller {
    /// Wire up all subsystems. Returns the controller plus the two
    /// receiving ends the caller's event loop drains: supervisor
    /// milestones (feed them back through `on_supervisor_event`) and
    /// outgoing events for upstream.
    pub async fn init(
        config: Config,
        store: Arc<dyn Store>,
        connector: Arc<dyn Connector>,
    ) -> (
        Controller,
        UnboundedReceiver<SupervisorEvent>,
        UnboundedReceiver<ControllerEvent>,
    ) {
        Controller::init_with(config, store, connector, SupervisorSettings::default()).await
    }

    /// Like `init`, with supervisor timings overridden; used by the
    /// test suite to shrink the watchdog clock.
    pub async fn init_with(
        config: Config,
        store: Arc<dyn Store>,
        connector: Arc<dyn Connector>,
        supervisor_settings: SupervisorSettings,
    ) -> (
        Controller,
        UnboundedReceiver<SupervisorEvent>,
        UnboundedReceiver<ControllerEvent>,
    ) {
        let (events_tx, events_rx) = unbounded_channel();
        let (supervisor_tx, supervisor_rx) = unbounded_channel();

        let matchmaker = Arc::new(Matchmaker::new(
            config.team_size,
            config.unfairness_exponent,
        ));
        let pool = Arc::new(CredentialPool::new(config.credentials.clone()));

        let controller = Controller {
            config,
            store,
            connector,
            matchmaker,
            pool,
            games: Arc::new(RwLock::new(GameRegistry::default())),
            events: events_tx,
            supervisor_events: supervisor_tx,
            supervisor_settings,
        };

        // Matches interrupted by a restart need manual resolution; the
        // queue itself does not survive restarts.
        match controller.store.unfinished_matches().await {
            Ok(rows) if !rows.is_empty() => {
                for row in rows {
                    log::warn!(
                        "unfinished match {} (game {}) from a previous run",
                        row.match_id,
                        row.game_id
                    );
                }
            }
            Ok(_) => {}
            Err(err) => log::error!("failed to list unfinished matches: {}", err),
        }

        (controller, supervisor_rx, events_rx)
    }

    /// Feed one supervisor milestone through the lifecycle logic.
    pub async fn on_supervisor_event(&self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::LobbyRunning { game_id, info } => {
                self.on_lobby_running(game_id, info).await
            }
            SupervisorEvent::LobbyEnded { game_id, outcome } => {
                self.on_lobby_ended(game_id, outcome).await
            }
            SupervisorEvent::Terminated { game_id, reason } => {
                self.on_supervisor_terminated(game_id, reason).await
            }
        }
    }

    /// Execute one parsed upstream command.
    pub async fn on_command(&self, command: Command) -> CommandOutput {
        use Command::*;
        match command {
            Enqueue { player_id } => match self.enqueue(player_id).await {
                Ok(size) => CommandOutput::QueueSize(size),
                Err(err) => CommandOutput::Refused(err.to_string()),
            },
            Dequeue { player_id } => {
                if self.dequeue(player_id) {
                    CommandOutput::QueueSize(self.matchmaker.len())
                } else {
                    CommandOutput::Refused(format!("player {} is not queued", player_id))
                }
            }
            ShowQueue => CommandOutput::Queue(self.matchmaker.snapshot()),
            ClearQueue => {
                self.matchmaker.clear();
                CommandOutput::QueueSize(0)
            }
            FormGame => match self.form_game_now().await {
                Ok((game_id, password)) => CommandOutput::Formed { game_id, password },
                Err(err) => CommandOutput::Refused(err.to_string()),
            },
            Swap { game_id, a, b } => self.acknowledge(self.swap(game_id, a, b).await),
            Replace {
                game_id,
                leaving,
                joining,
            } => self.acknowledge(self.replace(game_id, leaving, joining).await),
            Cancel { game_id } => self.acknowledge(self.cancel_game(game_id).await),
            ChangeMode { game_id, game_mode } => {
                self.acknowledge(self.change_mode(game_id, game_mode).await)
            }
            Balance { game_id } => self.acknowledge(self.balance(game_id).await),
            Password { game_id } => match self.password(game_id).await {
                Ok(password) => CommandOutput::Password { game_id, password },
                Err(err) => CommandOutput::Refused(err.to_string()),
            },
        }
    }

    fn acknowledge(&self, res: Result<(), GameError>) -> CommandOutput {
        match res {
            Ok(()) => CommandOutput::Acknowledged,
            Err(err) => CommandOutput::Refused(err.to_string()),
        }
    }

    /// Queue a player. Refused unless the player has a stored rating.
    pub async fn enqueue(&self, player_id: i64) -> Result<usize, GameError> {
        let rating = self
            .store
            .rating(player_id)
            .await?
            .ok_or(GameError::UnknownPlayer(player_id))?;
        Ok(self.matchmaker.enqueue(player_id, rating))
    }

    /// Remove a player from the queue; returns whether they were queued.
    pub fn dequeue(&self, player_id: i64) -> bool {
        self.matchmaker.dequeue(player_id)
    }

    /// Oldest-first queue listing.
    pub fn queue(&self) -> Vec<QueuedPlayer> {
        self.matchmaker.snapshot()
    }

    /// Swap two players across the teams of a game.
    pub async fn swap(&self, game_id: i64, a: i64, b: i64) -> Result<(), GameError> {
        let supervisor = self.supervisor_of(game_id).await?;
        let a_steam = self.resolve_steam_id(a).await?;
        let b_steam = self.resolve_steam_id(b).await?;

        supervisor.swap(a_steam, b_steam).await?;

        let mut games = self.games.write().await;
        if let Some(entry) = games.get_mut(game_id) {
            swap_rosters(&mut entry.radiant, &mut entry.dire, a, b);
        }
        Ok(())
    }

    /// Replace a roster member with a player outside the game.
    pub async fn replace(
        &self,
        game_id: i64,
        leaving: i64,
        joining: i64,
    ) -> Result<(), GameError> {
        let supervisor = self.supervisor_of(game_id).await?;
        let leaving_steam = self.resolve_steam_id(leaving).await?;
        let joining_steam = self.resolve_steam_id(joining).await?;
        let joining_rating = self
            .store
            .rating(joining)
            .await?
            .ok_or(GameError::UnknownPlayer(joining))?;

        supervisor.replace(leaving_steam, joining_steam).await?;

        let mut games = self.games.write().await;
        if let Some(entry) = games.get_mut(game_id) {
            let seat = entry
                .radiant
                .iter_mut()
                .chain(entry.dire.iter_mut())
                .find(|p| p.player_id == leaving);
            if let Some(seat) = seat {
                *seat = QueuedPlayer {
                    player_id: joining,
                    rating: joining_rating,
                };
            }
        }
        Ok(())
    }

    /// Change the game mode of a lobby.
    pub async fn change_mode(&self, game_id: i64, game_mode: i32) -> Result<(), GameError> {
        let supervisor = self.supervisor_of(game_id).await?;
        supervisor.change_mode(game_mode).await?;
        Ok(())
    }

    /// The lobby password of a tracked game.
    pub async fn password(&self, game_id: i64) -> Result<String, GameError> {
        let games = self.games.read().await;
        games
            .get(game_id)
            .map(|entry| entry.password.clone())
            .ok_or(GameError::UnknownGame(game_id))
    }

    /// Current rosters of a tracked game.
    pub async fn rosters(&self, game_id: i64) -> Option<(Vec<i64>, Vec<i64>)> {
        let games = self.games.read().await;
        games.get(game_id).map(|entry| entry.player_ids())
    }

    pub(super) async fn supervisor_of(
        &self,
        game_id: i64,
    ) -> Result<Arc<Supervisor>, GameError> {
        let games = self.games.read().await;
        games
            .get(game_id)
            .map(|entry| entry.supervisor.clone())
            .ok_or(GameError::UnknownGame(game_id))
    }

    pub(super) async fn resolve_steam_id(&self, player_id: i64) -> Result<SteamId, GameError> {
        self.store
            .steam_id(player_id)
            .await?
            .ok_or(GameError::UnknownPlayer(player_id))
    }

    pub(super) fn emit(&self, event: ControllerEvent) {
        // A missing upstream listener is not our problem.
        let _ = self.events.send(event);
    }
}

/// Swap players `a` and `b` between the two rosters, whichever sides
/// they are on.
fn swap_rosters(radiant: &mut [QueuedPlayer], dire: &mut [QueuedPlayer], a: i64, b: i64) {
    let a_radiant = radiant.iter().position(|p| p.player_id == a);
    let a_dire = dire.iter().position(|p| p.player_id == a);
    let b_radiant = radiant.iter().position(|p| p.player_id == b);
    let b_dire = dire.iter().position(|p| p.player_id == b);

    match (a_radiant, a_dire, b_radiant, b_dire) {
        (Some(ai), None, None, Some(bi)) => std::mem::swap(&mut radiant[ai], &mut dire[bi]),
        (None, Some(ai), Some(bi), None) => std::mem::swap(&mut dire[ai], &mut radiant[bi]),
        _ => {}
    }
}
