use rand::Rng;

use crate::config::{LOBBY_TYPE_PRACTICE, PASSWORD_RANGE};
use crate::controller::facade::GameEntry;
use crate::controller::{Controller, GameError};
use crate::database::{MatchPlayerRow, MatchRow, MatchState, Side, WinningTeam};
use crate::event::{ControllerEvent, MatchInfo};
use crate::matchmaker::QueuedPlayer;
use crate::platform::{MatchOutcome, SteamId};
use crate::rating::{power_mean, EloShift};
use crate::supervisor::{LobbyDefaults, Supervisor};

impl Controller {
    /// Pull `2 * team_size` players out of the queue and start a lobby
    /// for them. Fails with `NotEnoughPlayers` if the queue is short.
    pub async fn form_game_now(&self) -> Result<(i64, String), GameError> {
        let formed = self.matchmaker.form_game()?;
        self.make_game(formed.radiant, formed.dire, formed.waited)
            .await
    }

    /// Acquire a slot, spawn a supervisor and drive it to a created
    /// lobby. On any failure the slot is reclaimed; when no slot is
    /// free at all, the selected players go straight back into the
    /// queue.
    pub(super) async fn make_game(
        &self,
        radiant: Vec<QueuedPlayer>,
        dire: Vec<QueuedPlayer>,
        waited: Vec<i64>,
    ) -> Result<(i64, String), GameError> {
        let game_id = self.store.next_game_id().await?;

        let Some(slot) = self.pool.acquire() else {
            log::warn!("unable to make game {}: all client slots busy", game_id);
            for player in radiant.iter().chain(dire.iter()) {
                self.matchmaker.enqueue(player.player_id, player.rating);
            }
            return Err(GameError::NoSlotAvailable);
        };

        let radiant_steam = match self.resolve_roster(&radiant).await {
            Ok(ids) => ids,
            Err(err) => {
                self.pool.release(slot);
                return Err(err);
            }
        };
        let dire_steam = match self.resolve_roster(&dire).await {
            Ok(ids) => ids,
            Err(err) => {
                self.pool.release(slot);
                return Err(err);
            }
        };

        let supervisor = Supervisor::spawn(
            game_id,
            slot,
            self.pool.credentials(slot).clone(),
            LobbyDefaults::for_game(&self.config, game_id),
            self.supervisor_settings.clone(),
            self.connector.clone(),
            self.supervisor_events.clone(),
        );

        let password = rand::thread_rng().gen_range(PASSWORD_RANGE).to_string();
        if let Err(err) = supervisor
            .create_lobby(radiant_steam, dire_steam, password.clone())
            .await
        {
            log::error!("game {}: lobby creation failed: {}", game_id, err);
            supervisor.teardown().await;
            self.pool.release(slot);
            return Err(err.into());
        }

        let (radiant_ids, dire_ids): (Vec<i64>, Vec<i64>) = (
            radiant.iter().map(|p| p.player_id).collect(),
            dire.iter().map(|p| p.player_id).collect(),
        );
        self.games.write().await.pending.insert(
            game_id,
            GameEntry {
                supervisor,
                radiant,
                dire,
                password: password.clone(),
                match_id: None,
            },
        );
        log::info!("game {} formed, lobby password {}", game_id, password);
        self.emit(ControllerEvent::GameFormed {
            game_id,
            radiant: radiant_ids,
            dire: dire_ids,
            waited,
            password: password.clone(),
        });
        Ok((game_id, password))
    }

    /// The lobby of a pending game started running: persist the match
    /// row together with its roster, and move the game to the active
    /// set. Effects run at most once per game id; events for unknown
    /// ids are stale and dropped.
    pub(super) async fn on_lobby_running(&self, game_id: i64, info: MatchInfo) {
        let mut entry = {
            let mut games = self.games.write().await;
            match games.pending.remove(&game_id) {
                Some(entry) => entry,
                None => {
                    log::info!("stale running event for game {}", game_id);
                    return;
                }
            }
        };
        entry.match_id = Some(info.match_id);

        let row = MatchRow {
            match_id: info.match_id,
            lobby_id: info.lobby_id,
            game_id,
            game_mode: info.game_mode,
            server_region: info.server_region,
            lobby_type: LOBBY_TYPE_PRACTICE,
            league_id: info.league_id,
            state: MatchState::Running,
            winning_team: WinningTeam::None,
        };
        let players: Vec<MatchPlayerRow> = entry
            .radiant
            .iter()
            .map(|p| (p, Side::Radiant))
            .chain(entry.dire.iter().map(|p| (p, Side::Dire)))
            .map(|(p, team)| MatchPlayerRow {
                match_id: info.match_id,
                player_id: p.player_id,
                team,
                rating_at_start: p.rating,
            })
            .collect();
        if let Err(err) = self.store.insert_match(&row, &players).await {
            log::error!("game {}: failed to persist match row: {}", game_id, err);
        }

        log::info!("game {} running as match {}", game_id, info.match_id);
        self.games.write().await.active.insert(game_id, entry);
        self.emit(ControllerEvent::GameRunning {
            game_id,
            match_id: info.match_id,
        });
    }

    /// A game ended, observed or synthesized: update ratings for known
    /// outcomes, finalize the match row, and reclaim the supervisor's
    /// slot. Effects run at most once per game id.
    pub(super) async fn on_lobby_ended(&self, game_id: i64, outcome: MatchOutcome) {
        let entry = {
            let mut games = self.games.write().await;
            match games.remove(game_id) {
                Some(entry) => entry,
                None => {
                    log::info!("stale ended event for game {}", game_id);
                    return;
                }
            }
        };
        let match_id = entry.match_id.unwrap_or_default();

        let winning_team = match outcome {
            MatchOutcome::RadiantWin => WinningTeam::Radiant,
            MatchOutcome::DireWin => WinningTeam::Dire,
            // Unknown outcomes (watchdog synthesis) finalize the match
            // without touching anyone's rating.
            MatchOutcome::Unknown => WinningTeam::None,
        };

        if winning_team != WinningTeam::None {
            if let Err(err) = self.update_ratings(&entry, winning_team).await {
                log::error!("game {}: rating update failed: {}", game_id, err);
            }
        }

        if entry.match_id.is_some() {
            if let Err(err) = self.store.finalize_match(match_id, winning_team).await {
                log::error!("game {}: failed to finalize match: {}", game_id, err);
            }
        }

        self.retire(&entry.supervisor).await;
        log::info!(
            "game {} ended, match {}, winner {:?}",
            game_id,
            match_id,
            winning_team
        );
        self.emit(ControllerEvent::GameEnded {
            game_id,
            match_id,
            winning_team,
        });
    }

    /// Apply the Elo update to every player of a decided match, based
    /// on current ratings.
    async fn update_ratings(
        &self,
        entry: &GameEntry,
        winner: WinningTeam,
    ) -> Result<(), GameError> {
        let radiant = self.current_ratings(&entry.radiant).await?;
        let dire = self.current_ratings(&entry.dire).await?;

        let radiant_mean = power_mean(&radiant.iter().map(|(_, r)| *r).collect::<Vec<_>>());
        let dire_mean = power_mean(&dire.iter().map(|(_, r)| *r).collect::<Vec<_>>());
        let shift = EloShift::decide(radiant_mean, dire_mean, winner, self.config.elo_k);
        log::info!(
            "rating shift: radiant {:+.1}, dire {:+.1}",
            shift.radiant,
            shift.dire
        );

        for (player_id, rating) in radiant {
            self.store
                .set_rating(player_id, EloShift::apply(rating, shift.radiant))
                .await?;
        }
        for (player_id, rating) in dire {
            self.store
                .set_rating(player_id, EloShift::apply(rating, shift.dire))
                .await?;
        }
        Ok(())
    }

    async fn current_ratings(
        &self,
        roster: &[QueuedPlayer],
    ) -> Result<Vec<(i64, i32)>, GameError> {
        let mut ratings = Vec::with_capacity(roster.len());
        for player in roster {
            // Fall back to the rating at selection if the row vanished.
            let rating = self
                .store
                .rating(player.player_id)
                .await?
                .unwrap_or(player.rating);
            ratings.push((player.player_id, rating));
        }
        Ok(ratings)
    }

    /// Tear the game down without writing results or touching ratings.
    pub async fn cancel_game(&self, game_id: i64) -> Result<(), GameError> {
        let entry = {
            let mut games = self.games.write().await;
            games
                .remove(game_id)
                .ok_or(GameError::UnknownGame(game_id))?
        };
        self.retire(&entry.supervisor).await;
        log::info!("game {} canceled", game_id);
        self.emit(ControllerEvent::GameCanceled { game_id });
        Ok(())
    }

    /// A supervisor died underneath its game (failed login, dead
    /// session). Reclaim the slot and report the game as canceled.
    pub(super) async fn on_supervisor_terminated(&self, game_id: i64, reason: String) {
        log::error!("supervisor for game {} terminated: {}", game_id, reason);
        match self.cancel_game(game_id).await {
            Ok(()) => {}
            Err(GameError::UnknownGame(_)) => {
                // Died before the game was tracked; make_game's error
                // path reclaims the slot.
            }
            Err(err) => log::error!("cleanup of game {} failed: {}", game_id, err),
        }
    }

    /// Recompute the fairest partition over a tracked game's players,
    /// using fresh ratings, and push the new rosters into the lobby.
    pub async fn balance(&self, game_id: i64) -> Result<(), GameError> {
        let (supervisor, roster) = {
            let games = self.games.read().await;
            let entry = games.get(game_id).ok_or(GameError::UnknownGame(game_id))?;
            let roster: Vec<i64> = entry
                .radiant
                .iter()
                .chain(entry.dire.iter())
                .map(|p| p.player_id)
                .collect();
            (entry.supervisor.clone(), roster)
        };

        let mut players = Vec::with_capacity(roster.len());
        for player_id in roster {
            let rating = self
                .store
                .rating(player_id)
                .await?
                .ok_or(GameError::UnknownPlayer(player_id))?;
            players.push(QueuedPlayer { player_id, rating });
        }

        let (radiant, dire) = self.matchmaker.partition_players(&players);
        let radiant_steam = self.resolve_roster(&radiant).await?;
        let dire_steam = self.resolve_roster(&dire).await?;

        supervisor.update_teams(radiant_steam, dire_steam).await?;

        let (radiant_ids, dire_ids): (Vec<i64>, Vec<i64>) = (
            radiant.iter().map(|p| p.player_id).collect(),
            dire.iter().map(|p| p.player_id).collect(),
        );
        {
            let mut games = self.games.write().await;
            if let Some(entry) = games.get_mut(game_id) {
                entry.radiant = radiant;
                entry.dire = dire;
            }
        }
        log::info!(
            "game {} rebalanced: radiant {:?}, dire {:?}",
            game_id,
            radiant_ids,
            dire_ids
        );
        self.emit(ControllerEvent::GameRebalanced {
            game_id,
            radiant: radiant_ids,
            dire: dire_ids,
        });
        Ok(())
    }

    async fn resolve_roster(
        &self,
        roster: &[QueuedPlayer],
    ) -> Result<Vec<SteamId>, GameError> {
        let mut steam_ids = Vec::with_capacity(roster.len());
        for player in roster {
            steam_ids.push(self.resolve_steam_id(player.player_id).await?);
        }
        Ok(steam_ids)
    }

    /// Tear a supervisor down and only then return its slot.
    async fn retire(&self, supervisor: &Supervisor) {
        supervisor.teardown().await;
        self.pool.release(supervisor.slot());
    }
}
