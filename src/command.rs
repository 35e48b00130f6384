use std::fmt::{Display, Formatter};

use crate::matchmaker::QueuedPlayer;

/// Commands the controller accepts from the upstream surface.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    /// Queue a player; refused if they have no rating.
    ///
    /// Usage: `enqueue <player_id>`
    Enqueue { player_id: i64 },

    /// Remove a player from the queue.
    ///
    /// Usage: `dequeue <player_id>`
    Dequeue { player_id: i64 },

    /// Print the queue, oldest first.
    ///
    /// Usage: `queue`
    ShowQueue,

    /// Empty the queue.
    ///
    /// Usage: `clear`
    ClearQueue,

    /// Form a game right now; fails if fewer than `2 * team_size`
    /// players are queued.
    ///
    /// Usage: `form`
    FormGame,

    /// Swap two players across the teams of a game.
    ///
    /// Usage: `swap <game_id> <player_a> <player_b>`
    Swap { game_id: i64, a: i64, b: i64 },

    /// Replace a roster member with a player outside the game.
    ///
    /// Usage: `replace <game_id> <leaving> <joining>`
    Replace {
        game_id: i64,
        leaving: i64,
        joining: i64,
    },

    /// Tear a game down without writing results.
    ///
    /// Usage: `cancel <game_id>`
    Cancel { game_id: i64 },

    /// Change the game mode of a lobby.
    ///
    /// Usage: `mode <game_id> <mode_id>`
    ChangeMode { game_id: i64, game_mode: i32 },

    /// Re-partition an active game's players with fresh ratings.
    ///
    /// Usage: `balance <game_id>`
    Balance { game_id: i64 },

    /// Print the lobby password of a game.
    ///
    /// Usage: `password <game_id>`
    Password { game_id: i64 },
}

impl Command {
    /// Parse one input line. Returns `None` for blank lines and for
    /// anything that is not a known command.
    pub fn parse(line: &str) -> Option<Command> {
        use Command::*;

        let parts: Vec<&str> = line.split_whitespace().collect();
        match &parts[..] {
            ["enqueue", id] => Some(Enqueue {
                player_id: id.parse().ok()?,
            }),
            ["dequeue", id] => Some(Dequeue {
                player_id: id.parse().ok()?,
            }),
            ["queue"] => Some(ShowQueue),
            ["clear"] => Some(ClearQueue),
            ["form"] => Some(FormGame),
            ["swap", game, a, b] => Some(Swap {
                game_id: game.parse().ok()?,
                a: a.parse().ok()?,
                b: b.parse().ok()?,
            }),
            ["replace", game, leaving, joining] => Some(Replace {
                game_id: game.parse().ok()?,
                leaving: leaving.parse().ok()?,
                joining: joining.parse().ok()?,
            }),
            ["cancel", game] => Some(Cancel {
                game_id: game.parse().ok()?,
            }),
            ["mode", game, mode] => Some(ChangeMode {
                game_id: game.parse().ok()?,
                game_mode: mode.parse().ok()?,
            }),
            ["balance", game] => Some(Balance {
                game_id: game.parse().ok()?,
            }),
            ["password", game] => Some(Password {
                game_id: game.parse().ok()?,
            }),
            _ => None,
        }
    }
}

/// Possible answers to upstream commands.
pub enum CommandOutput {
    /// The queue size after an enqueue/dequeue.
    QueueSize(usize),

    /// The queue, oldest first.
    Queue(Vec<QueuedPlayer>),

    /// A game was formed.
    Formed { game_id: i64, password: String },

    /// Answer to the `password` command.
    Password { game_id: i64, password: String },

    /// The command took effect.
    Acknowledged,

    /// The command was refused; the message says why.
    Refused(String),
}

impl Display for CommandOutput {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use CommandOutput::*;
        match self {
            QueueSize(size) => write!(f, "{} player(s) queued", size),

            Queue(players) => {
                if players.is_empty() {
                    return write!(f, "queue is empty");
                }
                writeln!(f, "queued, oldest first:")?;
                for (pos, player) in players.iter().enumerate() {
                    writeln!(
                        f,
                        "{:>3}. {} (rating {})",
                        pos + 1,
                        player.player_id,
                        player.rating
                    )?;
                }
                Ok(())
            }

            Formed { game_id, password } => {
                write!(f, "game {} formed; lobby password {}", game_id, password)
            }

            Password { game_id, password } => {
                write!(f, "game {}: lobby password {}", game_id, password)
            }

            Acknowledged => write!(f, "done"),

            Refused(reason) => write!(f, "refused: {}", reason),
        }
    }
}

/// Command reference printed for unrecognized input.
pub const COMMAND_REFERENCE: &str = "
Commands:
 -enqueue <player>            Queue a player.
 -dequeue <player>            Remove a player from the queue.
 -queue                       Show the queue, oldest first.
 -clear                       Empty the queue.
 -form                        Form a game from the queue.
 -swap <game> <a> <b>         Swap two players across teams.
 -replace <game> <old> <new>  Replace a player in a game.
 -balance <game>              Re-balance a game's teams.
 -mode <game> <mode>          Change a lobby's game mode.
 -password <game>             Show a lobby's password.
 -cancel <game>               Cancel a game.
";
