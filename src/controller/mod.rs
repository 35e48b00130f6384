pub use facade::Controller;

use thiserror::Error;

use crate::matchmaker::NotEnoughPlayers;
use crate::supervisor::SupervisorError;

mod facade;
mod lifecycle;
#[cfg(test)]
mod tests;

/// Why a control-surface operation was refused.
#[derive(Debug, Error)]
pub enum GameError {
    #[error(transparent)]
    NotEnoughPlayers(#[from] NotEnoughPlayers),

    /// Every client slot is running a lobby; the selected players were
    /// put back into the queue.
    #[error("no client slot available")]
    NoSlotAvailable,

    #[error("unknown game {0}")]
    UnknownGame(i64),

    /// The player is not registered or has no rating yet.
    #[error("player {0} has no rating")]
    UnknownPlayer(i64),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("store error: {0}")]
    Store(anyhow::Error),
}

impl From<anyhow::Error> for GameError {
    fn from(err: anyhow::Error) -> Self {
        GameError::Store(err)
    }
}
