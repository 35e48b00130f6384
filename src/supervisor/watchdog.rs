use std::time::{Duration, Instant};

/// Liveness tracking for a running game.
///
/// The platform occasionally drops a session without delivering any
/// terminal event; the lobby then sits in the running state forever.
/// The watchdog notices the silence, probes the platform's lobby list,
/// and eventually declares the game over with an unknown outcome.
pub(crate) struct Watchdog {
    soft_idle: Duration,
    hard_idle: Duration,
    probe_interval: Duration,
    max_no_lobby: u32,
    max_game: Duration,

    last_activity: Instant,
    game_started: Option<Instant>,
    last_probe: Option<Instant>,
    misses: u32,
    rehandshaken: bool,
}

/// What the session loop should do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchdogVerdict {
    Idle,

    /// Ask the platform for its practice-lobby list and report the
    /// result back via `probe_result`.
    Probe,

    /// Re-run the game-coordinator handshake, then probe.
    Rehandshake,

    /// The game exceeded its wall-time cap.
    Expired,
}

impl Watchdog {
    pub fn new(
        soft_idle: Duration,
        hard_idle: Duration,
        probe_interval: Duration,
        max_no_lobby: u32,
        max_game: Duration,
    ) -> Watchdog {
        Watchdog {
            soft_idle,
            hard_idle,
            probe_interval,
            max_no_lobby,
            max_game,
            last_activity: Instant::now(),
            game_started: None,
            last_probe: None,
            misses: 0,
            rehandshaken: false,
        }
    }

    /// Record platform activity. Any incoming event counts. Activity
    /// does not clear accumulated probe misses; only a probe that
    /// actually sees the lobby does, since a chatty session can still
    /// have lost its lobby.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.rehandshaken = false;
    }

    /// Start the wall-time clock; called when the lobby reaches the
    /// running state.
    pub fn start_game(&mut self) {
        self.game_started = Some(Instant::now());
        self.touch();
    }

    pub fn check(&mut self, now: Instant) -> WatchdogVerdict {
        if let Some(started) = self.game_started {
            if now.saturating_duration_since(started) >= self.max_game {
                return WatchdogVerdict::Expired;
            }
        }

        let idle = now.saturating_duration_since(self.last_activity);
        if idle < self.soft_idle {
            return WatchdogVerdict::Idle;
        }
        let probe_due = match self.last_probe {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.probe_interval,
        };
        if !probe_due {
            return WatchdogVerdict::Idle;
        }
        if idle >= self.hard_idle && !self.rehandshaken {
            self.rehandshaken = true;
            return WatchdogVerdict::Rehandshake;
        }
        WatchdogVerdict::Probe
    }

    /// Report whether the owned lobby was present in the probed list.
    pub fn probe_result(&mut self, lobby_present: bool, now: Instant) {
        self.last_probe = Some(now);
        if lobby_present {
            self.misses = 0;
        } else {
            self.misses += 1;
        }
    }

    /// The owned lobby has been absent from enough consecutive probes
    /// to give the session up for dead.
    pub fn given_up(&self) -> bool {
        self.misses >= self.max_no_lobby
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watchdog() -> Watchdog {
        Watchdog::new(
            Duration::from_millis(100),
            Duration::from_millis(300),
            Duration::from_millis(10),
            3,
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn quiet_period_before_soft_idle() {
        let mut dog = watchdog();
        assert_eq!(dog.check(Instant::now()), WatchdogVerdict::Idle);
    }

    #[test]
    fn probes_after_soft_idle() {
        let mut dog = watchdog();
        let later = Instant::now() + Duration::from_millis(150);
        assert_eq!(dog.check(later), WatchdogVerdict::Probe);
    }

    #[test]
    fn probes_are_rate_limited() {
        let mut dog = watchdog();
        let later = Instant::now() + Duration::from_millis(150);
        assert_eq!(dog.check(later), WatchdogVerdict::Probe);
        dog.probe_result(true, later);
        assert_eq!(dog.check(later + Duration::from_millis(1)), WatchdogVerdict::Idle);
        assert_eq!(
            dog.check(later + Duration::from_millis(20)),
            WatchdogVerdict::Probe
        );
    }

    #[test]
    fn rehandshakes_once_after_hard_idle() {
        let mut dog = watchdog();
        let later = Instant::now() + Duration::from_millis(400);
        assert_eq!(dog.check(later), WatchdogVerdict::Rehandshake);
        // Only once per silence.
        assert_eq!(dog.check(later), WatchdogVerdict::Probe);
        dog.touch();
        let much_later = Instant::now() + Duration::from_millis(400);
        assert_eq!(dog.check(much_later), WatchdogVerdict::Rehandshake);
    }

    #[test]
    fn gives_up_after_consecutive_misses() {
        let mut dog = watchdog();
        let now = Instant::now();
        dog.probe_result(false, now);
        dog.probe_result(false, now);
        assert!(!dog.given_up());
        // A sighting resets the count.
        dog.probe_result(true, now);
        dog.probe_result(false, now);
        dog.probe_result(false, now);
        dog.probe_result(false, now);
        assert!(dog.given_up());
    }

    #[test]
    fn expires_on_wall_time() {
        let mut dog = watchdog();
        dog.start_game();
        let later = Instant::now() + Duration::from_secs(3601);
        assert_eq!(dog.check(later), WatchdogVerdict::Expired);
    }
}
