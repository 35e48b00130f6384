use std::collections::BinaryHeap;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Instant;

use indexmap::IndexMap;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::config::{PARTITION_KEEP, SCORE_EPSILON};
use crate::rating::partition_score;

/// Forming a game needs `2 * team_size` queued players.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("not enough players queued: have {have}, need {need}")]
pub struct NotEnoughPlayers {
    pub have: usize,
    pub need: usize,
}

/// A queue entry as callers see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedPlayer {
    pub player_id: i64,
    pub rating: i32,
}

/// The result of one successful `form_game` call.
#[derive(Debug)]
pub struct FormedGame {
    pub radiant: Vec<QueuedPlayer>,
    pub dire: Vec<QueuedPlayer>,

    /// Players that stayed behind in the queue. Their selection weight
    /// keeps growing with elapsed time; nothing else is done for them
    /// here.
    pub waited: Vec<i64>,
}

struct Entry {
    rating: i32,
    joined_at: Instant,

    /// Uniform tie-breaker for players that joined within the same
    /// instant.
    nonce: f64,
}

struct QueueState {
    /// Keyed by player id; iteration order is join order, since
    /// re-enqueues are no-ops and removals shift.
    entries: IndexMap<i64, Entry>,
    rng: StdRng,
}

/// The player queue and team-partition logic.
///
/// All methods take one exclusive lock for their whole duration; none
/// of them suspends or performs I/O. With the conventional team size
/// of 5 there are `C(10, 5) = 252` partitions, so exhaustive
/// enumeration is trivial.
pub struct Matchmaker {
    state: Mutex<QueueState>,
    team_size: usize,
    unfairness_exponent: i32,
}

impl Matchmaker {
    pub fn new(team_size: usize, unfairness_exponent: i32) -> Matchmaker {
        Matchmaker::with_seed(team_size, unfairness_exponent, rand::thread_rng().gen())
    }

    /// Deterministic variant; selection and partition sampling replay
    /// identically for the same seed and queue history.
    pub fn with_seed(team_size: usize, unfairness_exponent: i32, seed: u64) -> Matchmaker {
        assert!(
            (1..=8).contains(&team_size),
            "partitions are enumerated over a 2 * team_size bitmask"
        );
        Matchmaker {
            state: Mutex::new(QueueState {
                entries: IndexMap::new(),
                rng: StdRng::seed_from_u64(seed),
            }),
            team_size,
            unfairness_exponent,
        }
    }

    /// Add a player to the queue; returns the queue size afterwards.
    ///
    /// Re-enqueueing a present player is a no-op: the original rating,
    /// join time and tie-breaker are preserved.
    pub fn enqueue(&self, player_id: i64, rating: i32) -> usize {
        let mut state = self.state.lock().unwrap();
        if !state.entries.contains_key(&player_id) {
            let nonce = state.rng.gen();
            state.entries.insert(
                player_id,
                Entry {
                    rating,
                    joined_at: Instant::now(),
                    nonce,
                },
            );
            log::info!("queued player {} (rating {})", player_id, rating);
        }
        state.entries.len()
    }

    /// Remove a player from the queue; returns whether they were present.
    pub fn dequeue(&self, player_id: i64) -> bool {
        let mut state = self.state.lock().unwrap();
        let removed = state.entries.shift_remove(&player_id).is_some();
        if removed {
            log::info!("removed player {} from queue", player_id);
        }
        removed
    }

    pub fn contains(&self, player_id: i64) -> bool {
        self.state.lock().unwrap().entries.contains_key(&player_id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.state.lock().unwrap().entries.clear();
        log::info!("queue cleared");
    }

    /// The queue ordered oldest-first (ties broken by the random
    /// nonce), for rendering a stable waiting list.
    pub fn snapshot(&self) -> Vec<QueuedPlayer> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<(&i64, &Entry)> = state.entries.iter().collect();
        entries.sort_by(|(_, a), (_, b)| {
            a.joined_at
                .cmp(&b.joined_at)
                .then(a.nonce.total_cmp(&b.nonce))
        });
        entries
            .into_iter()
            .map(|(player_id, entry)| QueuedPlayer {
                player_id: *player_id,
                rating: entry.rating,
            })
            .collect()
    }

    /// Select `2 * team_size` players and split them into two teams.
    ///
    /// Selection is random but weighted by waiting time squared, so
    /// long-waiting players are near-certain to be drawn without the
    /// pick becoming deterministic. The selected players are removed
    /// from the queue; everyone else stays and is reported in
    /// `waited`.
    pub fn form_game(&self) -> Result<FormedGame, NotEnoughPlayers> {
        let mut state = self.state.lock().unwrap();
        let need = 2 * self.team_size;
        if state.entries.len() < need {
            return Err(NotEnoughPlayers {
                have: state.entries.len(),
                need,
            });
        }

        let now = Instant::now();
        let ids: Vec<i64> = state.entries.keys().copied().collect();
        let weights: Vec<f64> = state
            .entries
            .values()
            .map(|e| {
                now.saturating_duration_since(e.joined_at)
                    .as_secs_f64()
                    .max(1.0)
                    .powi(2)
            })
            .collect();

        // Sample with replacement, keep first occurrences.
        let dist = WeightedIndex::new(&weights).expect("weights are positive");
        let mut chosen: Vec<i64> = Vec::with_capacity(need);
        let mut seen: HashSet<i64> = HashSet::with_capacity(need);
        for _ in 0..need {
            let id = ids[dist.sample(&mut state.rng)];
            if seen.insert(id) {
                chosen.push(id);
            }
        }
        // Replacement may have collapsed duplicates; backfill with the
        // longest-waiting players that were not drawn.
        for id in &ids {
            if chosen.len() >= need {
                break;
            }
            if seen.insert(*id) {
                chosen.push(*id);
            }
        }

        let players: Vec<QueuedPlayer> = chosen
            .iter()
            .map(|id| QueuedPlayer {
                player_id: *id,
                rating: state.entries[id].rating,
            })
            .collect();

        let (radiant, dire) = partition(
            &mut state.rng,
            &players,
            self.team_size,
            self.unfairness_exponent,
        );

        for id in &chosen {
            state.entries.shift_remove(id);
        }
        let waited: Vec<i64> = state.entries.keys().copied().collect();

        log::info!(
            "formed game: radiant {:?}, dire {:?}, {} waited",
            radiant.iter().map(|p| p.player_id).collect::<Vec<_>>(),
            dire.iter().map(|p| p.player_id).collect::<Vec<_>>(),
            waited.len()
        );
        Ok(FormedGame {
            radiant,
            dire,
            waited,
        })
    }

    /// Re-partition an already-selected set of `2 * team_size` players,
    /// f.e. when rebalancing an active game after a replacement.
    pub fn partition_players(
        &self,
        players: &[QueuedPlayer],
    ) -> (Vec<QueuedPlayer>, Vec<QueuedPlayer>) {
        let mut state = self.state.lock().unwrap();
        partition(
            &mut state.rng,
            players,
            self.team_size,
            self.unfairness_exponent,
        )
    }
}

/// A scored partition; the bitmask selects team one out of the
/// player slice.
struct Candidate {
    score: f64,
    mask: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score.total_cmp(&other.score)
    }
}

/// Enumerate all partitions of `players` into two teams of
/// `team_size`, keep the lowest-scoring few, and sample one of them
/// weighted by inverse score. The softened optimum keeps team
/// compositions from going stale when the same players requeue.
fn partition(
    rng: &mut StdRng,
    players: &[QueuedPlayer],
    team_size: usize,
    unfairness_exponent: i32,
) -> (Vec<QueuedPlayer>, Vec<QueuedPlayer>) {
    let n = players.len();
    debug_assert_eq!(n, 2 * team_size);

    // Max-heap of size PARTITION_KEEP, so the worst retained candidate
    // is dropped first.
    let mut best: BinaryHeap<Candidate> = BinaryHeap::with_capacity(PARTITION_KEEP + 1);
    for mask in 0u32..(1 << n) {
        if mask.count_ones() != team_size as u32 {
            continue;
        }
        let mut team_one: Vec<i32> = Vec::with_capacity(team_size);
        let mut team_two: Vec<i32> = Vec::with_capacity(team_size);
        for (i, player) in players.iter().enumerate() {
            if mask & (1 << i) != 0 {
                team_one.push(player.rating);
            } else {
                team_two.push(player.rating);
            }
        }
        team_one.sort_unstable();
        team_two.sort_unstable();

        let score = partition_score(&team_one, &team_two, unfairness_exponent);
        best.push(Candidate { score, mask });
        if best.len() > PARTITION_KEEP {
            best.pop();
        }
    }

    let candidates: Vec<Candidate> = best.into_vec();
    let weights: Vec<f64> = candidates
        .iter()
        .map(|c| 1.0 / (c.score + SCORE_EPSILON))
        .collect();
    let dist = WeightedIndex::new(&weights).expect("weights are positive");
    let mask = candidates[dist.sample(rng)].mask;

    let mut radiant = Vec::with_capacity(team_size);
    let mut dire = Vec::with_capacity(team_size);
    for (i, player) in players.iter().enumerate() {
        if mask & (1 << i) != 0 {
            radiant.push(*player);
        } else {
            dire.push(*player);
        }
    }
    (radiant, dire)
}
