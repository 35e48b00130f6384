use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::{Config, Credentials};
use crate::controller::{Controller, GameError};
use crate::database::mock::MockStore;
use crate::database::{MatchState, Store, WinningTeam};
use crate::event::{ControllerEvent, SupervisorEvent};
use crate::matchmaker::NotEnoughPlayers;
use crate::platform::mock::{MockCall, MockConnector, MockPlan};
use crate::platform::{
    Connector, LobbyMember, LobbyState, LobbyTeam, LobbyUpdate, MatchOutcome, PlatformEvent,
    SteamId,
};
use crate::supervisor::{SupervisorError, SupervisorSettings};

const RATINGS: [i32; 10] = [3000, 3100, 2900, 3050, 2950, 3200, 2800, 3150, 2850, 3100];

fn test_config(num_clients: usize) -> Config {
    Config {
        postgres_connection: String::new(),
        credentials: (0..num_clients)
            .map(|i| Credentials {
                username: format!("bot_{}", i),
                password: "hunter2".to_string(),
            })
            .collect(),
        team_size: 5,
        elo_k: 50,
        unfairness_exponent: 2,
        debug_mode: false,
        league_id: 99,
        league_name: "Test League".to_string(),
        server_region: 2,
        game_mode: 22,
    }
}

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

struct Harness {
    controller: Controller,
    store: Arc<MockStore>,
    connector: Arc<MockConnector>,
    supervisor_rx: UnboundedReceiver<SupervisorEvent>,
    events_rx: UnboundedReceiver<ControllerEvent>,
}

/// Players 1..=10 with steam ids 1001..=1010 and the scenario ratings.
async fn harness(num_clients: usize) -> Harness {
    // Enable logging output
    let _ = env_logger::builder().is_test(true).try_init();

    let store = Arc::new(MockStore::default());
    for (i, rating) in RATINGS.iter().enumerate() {
        store.push_user(i as i64 + 1, 1000 + i as u64 + 1, *rating);
    }
    let connector = MockConnector::new();
    let (controller, supervisor_rx, events_rx) = Controller::init_with(
        test_config(num_clients),
        store.clone() as Arc<dyn Store>,
        connector.clone() as Arc<dyn Connector>,
        test_settings(),
    )
    .await;
    Harness {
        controller,
        store,
        connector,
        supervisor_rx,
        events_rx,
    }
}

impl Harness {
    async fn enqueue_all(&self) {
        for player_id in 1..=10 {
            self.controller.enqueue(player_id).await.unwrap();
        }
    }

    /// Apply the next supervisor milestone to the controller, the way
    /// the control loop in `main` does.
    async fn pump(&mut self) {
        let event = tokio::time::timeout(Duration::from_secs(5), self.supervisor_rx.recv())
            .await
            .expect("no supervisor event within 5s")
            .expect("supervisor event channel closed");
        self.controller.on_supervisor_event(event).await;
    }

    fn next_event(&mut self) -> ControllerEvent {
        self.events_rx
            .try_recv()
            .expect("expected an outgoing event")
    }
}

fn lobby_update(state: LobbyState) -> LobbyUpdate {
    LobbyUpdate {
        lobby_id: 9001,
        state,
        game_state: None,
        match_id: None,
        match_outcome: None,
        members: vec![],
    }
}

fn member(steam_id: u64, team: LobbyTeam) -> LobbyMember {
    LobbyMember {
        steam_id: SteamId(steam_id),
        team,
        name: String::new(),
        slot: 0,
    }
}

#[tokio::test]
async fn enqueue_refuses_players_without_a_rating() {
    let h = harness(1).await;
    match h.controller.enqueue(999).await {
        Err(GameError::UnknownPlayer(999)) => {}
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    assert_eq!(h.controller.enqueue(1).await.unwrap(), 1);
}

#[tokio::test]
async fn forming_a_game_creates_a_lobby_with_a_password() {
    let mut h = harness(1).await;
    h.enqueue_all().await;

    let (game_id, password) = h.controller.form_game_now().await.unwrap();
    assert_eq!(game_id, 1);
    let numeric: u32 = password.parse().expect("password is numeric");
    assert!((1000..=9999).contains(&numeric));
    assert_eq!(h.controller.password(game_id).await.unwrap(), password);

    match h.next_event() {
        ControllerEvent::GameFormed {
            game_id: 1,
            radiant,
            dire,
            waited,
            password: event_password,
        } => {
            assert_eq!(radiant.len(), 5);
            assert_eq!(dire.len(), 5);
            assert!(waited.is_empty());
            assert!(radiant.iter().all(|id| !dire.contains(id)));
            assert_eq!(event_password, password);
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert_eq!(h.controller.pool.active_count(), 1);
    let session = h.connector.wait_for_session(0, Duration::from_secs(1));
    assert_eq!(
        session.count_calls(
            |c| matches!(c, MockCall::CreateLobby { password: p, .. } if *p == password)
        ),
        1
    );
    assert!(h.controller.queue().is_empty());
}

#[tokio::test]
async fn forming_needs_ten_players() {
    let h = harness(1).await;
    for player_id in 1..=9 {
        h.controller.enqueue(player_id).await.unwrap();
    }

    match h.controller.form_game_now().await {
        Err(GameError::NotEnoughPlayers(NotEnoughPlayers { have: 9, need: 10 })) => {}
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    // The queue is untouched.
    assert_eq!(h.controller.queue().len(), 9);
    assert_eq!(h.controller.pool.active_count(), 0);
}

#[tokio::test]
async fn exhausted_pool_requeues_the_selection() {
    let mut h = harness(1).await;
    h.enqueue_all().await;
    h.controller.form_game_now().await.unwrap();
    let _ = h.next_event();

    // Ten fresh players while the only slot is busy.
    for player_id in 11..=20 {
        h.store.push_user(player_id, 1000 + player_id as u64, 3000);
        h.controller.enqueue(player_id).await.unwrap();
    }
    match h.controller.form_game_now().await {
        Err(GameError::NoSlotAvailable) => {}
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }

    // All ten are still (or again) queued, and no second lobby exists.
    let queued: Vec<i64> = h.controller.queue().iter().map(|p| p.player_id).collect();
    assert_eq!(queued.len(), 10);
    for player_id in 11..=20 {
        assert!(queued.contains(&player_id));
    }
    assert_eq!(h.controller.pool.active_count(), 1);
    assert_eq!(h.connector.session_count(), 1);
}

#[tokio::test]
async fn running_then_ending_updates_ratings_once() {
    let mut h = harness(1).await;
    h.enqueue_all().await;
    let (game_id, _) = h.controller.form_game_now().await.unwrap();

    let (radiant, dire) = match h.next_event() {
        ControllerEvent::GameFormed { radiant, dire, .. } => (radiant, dire),
        other => panic!("unexpected event {:?}", other),
    };

    let session = h.connector.wait_for_session(0, Duration::from_secs(1));
    let mut run = lobby_update(LobbyState::Run);
    run.match_id = Some(42);
    session.emit(PlatformEvent::LobbyChanged(run));
    h.pump().await;

    // The match row and its roster exist, in one piece.
    let row = h.store.expect_match(42);
    assert_eq!(row.state, MatchState::Running);
    assert_eq!(row.game_id, game_id);
    assert_eq!(row.lobby_id, 9001);
    assert_eq!(row.league_id, 99);
    let players = h.store.match_players(42);
    assert_eq!(players.len(), 10);
    for player in &players {
        assert_eq!(player.rating_at_start, RATINGS[player.player_id as usize - 1]);
    }
    match h.next_event() {
        ControllerEvent::GameRunning {
            game_id: g,
            match_id: 42,
        } => assert_eq!(g, game_id),
        other => panic!("unexpected event {:?}", other),
    }

    let before: Vec<(i64, i32)> = (1..=10).map(|id| (id, h.store.expect_rating(id))).collect();

    let mut post = lobby_update(LobbyState::Postgame);
    post.match_id = Some(42);
    post.match_outcome = Some(MatchOutcome::RadiantWin);
    session.emit(PlatformEvent::LobbyChanged(post));
    h.pump().await;

    // Winners rose, losers fell.
    for id in &radiant {
        let old = before.iter().find(|(p, _)| p == id).unwrap().1;
        assert!(h.store.expect_rating(*id) > old, "radiant {} did not rise", id);
    }
    for id in &dire {
        let old = before.iter().find(|(p, _)| p == id).unwrap().1;
        assert!(h.store.expect_rating(*id) < old, "dire {} did not fall", id);
    }

    // Elo drift from rounding stays within 2 * team_size points.
    let drift: i64 = (1..=10)
        .map(|id| {
            let old = before.iter().find(|(p, _)| *p == id).unwrap().1;
            (h.store.expect_rating(id) - old) as i64
        })
        .sum();
    assert!(drift.abs() <= 10, "drift {} too large", drift);

    let row = h.store.expect_match(42);
    assert_eq!(row.state, MatchState::Ended);
    assert_eq!(row.winning_team, WinningTeam::Radiant);

    match h.next_event() {
        ControllerEvent::GameEnded {
            match_id: 42,
            winning_team: WinningTeam::Radiant,
            ..
        } => {}
        other => panic!("unexpected event {:?}", other),
    }

    // The supervisor is gone and its slot is free again.
    assert_eq!(h.controller.pool.active_count(), 0);
    assert_eq!(session.count_calls(|c| matches!(c, MockCall::Logout)), 1);
}

#[tokio::test]
async fn duplicate_milestones_have_no_effect() {
    let mut h = harness(1).await;
    h.enqueue_all().await;
    let (game_id, _) = h.controller.form_game_now().await.unwrap();
    let _ = h.next_event();

    let session = h.connector.wait_for_session(0, Duration::from_secs(1));
    let mut run = lobby_update(LobbyState::Run);
    run.match_id = Some(42);
    session.emit(PlatformEvent::LobbyChanged(run));
    h.pump().await;
    let _ = h.next_event();

    let mut post = lobby_update(LobbyState::Postgame);
    post.match_id = Some(42);
    post.match_outcome = Some(MatchOutcome::RadiantWin);
    session.emit(PlatformEvent::LobbyChanged(post));
    h.pump().await;
    let _ = h.next_event();

    let after: Vec<i32> = (1..=10).map(|id| h.store.expect_rating(id)).collect();

    // Replay both milestones straight into the controller; they must
    // be recognized as stale.
    h.controller
        .on_supervisor_event(SupervisorEvent::LobbyEnded {
            game_id,
            outcome: MatchOutcome::RadiantWin,
        })
        .await;
    h.controller
        .on_supervisor_event(SupervisorEvent::LobbyEnded {
            game_id,
            outcome: MatchOutcome::DireWin,
        })
        .await;

    let unchanged: Vec<i32> = (1..=10).map(|id| h.store.expect_rating(id)).collect();
    assert_eq!(after, unchanged);
    let row = h.store.expect_match(42);
    assert_eq!(row.winning_team, WinningTeam::Radiant);
    assert!(h.events_rx.try_recv().is_err(), "stale event emitted something");
}

#[tokio::test]
async fn cancel_reclaims_the_slot_without_results() {
    let mut h = harness(1).await;
    h.enqueue_all().await;
    let (game_id, _) = h.controller.form_game_now().await.unwrap();
    let _ = h.next_event();

    let before: Vec<i32> = (1..=10).map(|id| h.store.expect_rating(id)).collect();
    h.controller.cancel_game(game_id).await.unwrap();

    assert_eq!(h.controller.pool.active_count(), 0);
    match h.next_event() {
        ControllerEvent::GameCanceled { game_id: g } => assert_eq!(g, game_id),
        other => panic!("unexpected event {:?}", other),
    }
    let after: Vec<i32> = (1..=10).map(|id| h.store.expect_rating(id)).collect();
    assert_eq!(before, after);

    match h.controller.cancel_game(game_id).await {
        Err(GameError::UnknownGame(_)) => {}
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }

    // A new game can use the freed slot right away.
    h.enqueue_all().await;
    let (next_game, _) = h.controller.form_game_now().await.unwrap();
    assert_eq!(next_game, game_id + 1);
    assert_eq!(h.controller.pool.active_count(), 1);
}

#[tokio::test]
async fn swap_moves_players_across_teams_only() {
    let mut h = harness(1).await;
    h.enqueue_all().await;
    let (game_id, _) = h.controller.form_game_now().await.unwrap();

    let (radiant, dire) = match h.next_event() {
        ControllerEvent::GameFormed { radiant, dire, .. } => (radiant, dire),
        other => panic!("unexpected event {:?}", other),
    };
    let (a, b) = (radiant[0], dire[0]);

    h.controller.swap(game_id, a, b).await.unwrap();
    let (now_radiant, now_dire) = h.controller.rosters(game_id).await.unwrap();
    assert!(now_radiant.contains(&b) && !now_radiant.contains(&a));
    assert!(now_dire.contains(&a) && !now_dire.contains(&b));

    // After the swap the two are on opposite teams again, so swapping
    // back also works.
    h.controller.swap(game_id, a, b).await.unwrap();
    let (now_radiant, now_dire) = h.controller.rosters(game_id).await.unwrap();
    assert_eq!(now_radiant, radiant);
    assert_eq!(now_dire, dire);

    // Two radiant players cannot swap.
    match h.controller.swap(game_id, radiant[1], radiant[2]).await {
        Err(GameError::Supervisor(SupervisorError::NotOpposingTeams)) => {}
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    let (unchanged_radiant, unchanged_dire) = h.controller.rosters(game_id).await.unwrap();
    assert_eq!(unchanged_radiant, radiant);
    assert_eq!(unchanged_dire, dire);
}

#[tokio::test]
async fn replace_swaps_one_seat_for_an_outsider() {
    let mut h = harness(1).await;
    h.enqueue_all().await;
    let (game_id, _) = h.controller.form_game_now().await.unwrap();
    let (radiant, dire) = match h.next_event() {
        ControllerEvent::GameFormed { radiant, dire, .. } => (radiant, dire),
        other => panic!("unexpected event {:?}", other),
    };

    // Replacing with someone already in the game is refused.
    match h.controller.replace(game_id, radiant[0], dire[0]).await {
        Err(GameError::Supervisor(SupervisorError::PlayerAlreadyInGame(_))) => {}
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }

    // Replacing with an unregistered player is refused.
    match h.controller.replace(game_id, radiant[0], 999).await {
        Err(GameError::UnknownPlayer(999)) => {}
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }

    h.store.push_user(11, 1011, 3333);
    h.controller.replace(game_id, radiant[0], 11).await.unwrap();
    let (now_radiant, _) = h.controller.rosters(game_id).await.unwrap();
    assert!(now_radiant.contains(&11));
    assert!(!now_radiant.contains(&radiant[0]));
}

#[tokio::test]
async fn balance_repartitions_with_fresh_ratings() {
    let mut h = harness(1).await;
    h.enqueue_all().await;
    let (game_id, _) = h.controller.form_game_now().await.unwrap();
    let _ = h.next_event();

    h.controller.balance(game_id).await.unwrap();

    match h.next_event() {
        ControllerEvent::GameRebalanced { radiant, dire, .. } => {
            assert_eq!(radiant.len(), 5);
            assert_eq!(dire.len(), 5);
            let mut all: Vec<i64> = radiant.iter().chain(dire.iter()).copied().collect();
            all.sort_unstable();
            assert_eq!(all, (1..=10).collect::<Vec<i64>>());
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn watchdog_ending_finalizes_without_rating_changes() {
    let mut h = harness(1).await;
    h.enqueue_all().await;
    let (game_id, _) = h.controller.form_game_now().await.unwrap();
    let _ = h.next_event();

    let session = h.connector.wait_for_session(0, Duration::from_secs(1));
    session.set_lobby_list(vec![]);
    let mut run = lobby_update(LobbyState::Run);
    run.match_id = Some(42);
    session.emit(PlatformEvent::LobbyChanged(run));
    h.pump().await;
    let _ = h.next_event();

    let before: Vec<i32> = (1..=10).map(|id| h.store.expect_rating(id)).collect();

    // Total silence: the supervisor's watchdog declares the game over.
    h.pump().await;

    let row = h.store.expect_match(42);
    assert_eq!(row.state, MatchState::Ended);
    assert_eq!(row.winning_team, WinningTeam::None);
    let after: Vec<i32> = (1..=10).map(|id| h.store.expect_rating(id)).collect();
    assert_eq!(before, after);

    match h.next_event() {
        ControllerEvent::GameEnded {
            game_id: g,
            winning_team: WinningTeam::None,
            ..
        } => assert_eq!(g, game_id),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(h.controller.pool.active_count(), 0);
}

#[tokio::test]
async fn failed_login_reclaims_the_slot() {
    let mut h = harness(1).await;
    h.connector.set_plan(MockPlan {
        fail_login: true,
        ..Default::default()
    });
    h.enqueue_all().await;

    match h.controller.form_game_now().await {
        Err(GameError::Supervisor(SupervisorError::Terminated)) => {}
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    assert_eq!(h.controller.pool.active_count(), 0);

    // The terminated milestone for the untracked game is dropped.
    h.pump().await;
    assert!(h.events_rx.try_recv().is_err());
}

#[tokio::test]
async fn seating_is_enforced_through_the_whole_flow() {
    let mut h = harness(1).await;
    h.enqueue_all().await;
    let (_, _) = h.controller.form_game_now().await.unwrap();
    let (radiant, dire) = match h.next_event() {
        ControllerEvent::GameFormed { radiant, dire, .. } => (radiant, dire),
        other => panic!("unexpected event {:?}", other),
    };
    let session = h.connector.wait_for_session(0, Duration::from_secs(1));

    // Everyone seated correctly (steam id is 1000 + player id).
    let members: Vec<LobbyMember> = radiant
        .iter()
        .map(|id| member(1000 + *id as u64, LobbyTeam::GoodGuys))
        .chain(
            dire.iter()
                .map(|id| member(1000 + *id as u64, LobbyTeam::BadGuys)),
        )
        .collect();
    let mut update = lobby_update(LobbyState::Ui);
    update.members = members;
    session.emit(PlatformEvent::LobbyChanged(update));

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while session.count_calls(|c| matches!(c, MockCall::LaunchLobby)) == 0 {
        if std::time::Instant::now() > deadline {
            panic!("lobby never launched");
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(
        session.count_calls(|c| matches!(c, MockCall::KickFromTeam(_))),
        0
    );
}
