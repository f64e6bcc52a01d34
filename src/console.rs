//! Local terminal collaborator: prompts, board rendering and result wording.

use std::{
    io::{self, BufRead, Write},
    thread,
};

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

use crate::{
    services::namespace::OutcomeSnapshot,
    state::{
        board::{Board, COLUMNS},
        identity::{Identity, OutcomeReason, Verdict},
    },
};

/// Rejected column input; the prompt is repeated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColumnInputError {
    #[error("`{0}` is not a column number")]
    NotANumber(String),
    #[error("column {0} does not exist; pick 0-{max}", max = COLUMNS - 1)]
    OutOfRange(usize),
}

/// Interaction surface used by the match loop.
pub trait Console: Send + Sync {
    /// Print `prompt` and read one line; `None` once input is exhausted.
    fn read_line(&self, prompt: &str) -> BoxFuture<'_, io::Result<Option<String>>>;
    /// Draw the grid.
    fn show_board(&self, board: &Board);
    /// Print an informational line.
    fn notice(&self, message: &str);
}

/// [`Console`] bound to stdin/stdout.
///
/// Stdin is read on a detached thread so a pending prompt never holds the
/// runtime open at shutdown.
pub struct TerminalConsole {
    lines: Mutex<mpsc::UnboundedReceiver<io::Result<String>>>,
}

impl TerminalConsole {
    /// Console bound to the process's stdin and stdout.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        });
        Self {
            lines: Mutex::new(rx),
        }
    }
}

impl Default for TerminalConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for TerminalConsole {
    fn read_line(&self, prompt: &str) -> BoxFuture<'_, io::Result<Option<String>>> {
        let prompt = prompt.to_owned();
        Box::pin(async move {
            {
                let mut stdout = io::stdout().lock();
                write!(stdout, "{prompt}")?;
                stdout.flush()?;
            }
            // Receiving is cancel safe, so an abandoned prompt loses no input.
            self.lines.lock().await.recv().await.transpose()
        })
    }

    fn show_board(&self, board: &Board) {
        println!("{}", board.render());
    }

    fn notice(&self, message: &str) {
        println!("{message}");
    }
}

/// Parse a column typed by the player.
pub fn parse_column(input: &str) -> Result<usize, ColumnInputError> {
    let trimmed = input.trim();
    let column = trimmed
        .parse::<usize>()
        .map_err(|_| ColumnInputError::NotANumber(trimmed.to_owned()))?;
    if column >= COLUMNS {
        return Err(ColumnInputError::OutOfRange(column));
    }
    Ok(column)
}

/// Result line as seen by `perspective`.
pub fn describe_outcome(perspective: Identity, outcome: &OutcomeSnapshot) -> String {
    let winner = match outcome.verdict {
        None => return "The match ended without a recorded result.".to_owned(),
        Some(Verdict::Draw) => return "Draw: the board is full.".to_owned(),
        Some(Verdict::Winner(winner)) => winner,
    };
    let loser = outcome
        .verdict
        .and_then(Verdict::loser)
        .map_or("the opponent", Identity::as_str);

    if perspective == winner {
        return match outcome.reason {
            Some(OutcomeReason::FourInARow) => "You won with four in a row!".to_owned(),
            Some(OutcomeReason::Timeout) => format!("You won: {loser} ran out of time."),
            Some(OutcomeReason::Disconnection) => format!("You won: {loser} disconnected."),
            Some(OutcomeReason::BoardFull) | None => "You won!".to_owned(),
        };
    }

    if perspective.is_player() {
        return match outcome.reason {
            Some(OutcomeReason::FourInARow) => format!("You lost: {winner} connected four."),
            Some(OutcomeReason::Timeout) => "You lost: you timed out.".to_owned(),
            Some(OutcomeReason::Disconnection) => {
                "You lost: you were judged disconnected.".to_owned()
            }
            Some(OutcomeReason::BoardFull) | None => format!("You lost: {winner} won."),
        };
    }

    match outcome.reason {
        Some(OutcomeReason::FourInARow) => format!("{winner} won with four in a row."),
        Some(OutcomeReason::Timeout) => format!("{winner} won: {loser} timed out."),
        Some(OutcomeReason::Disconnection) => format!("{winner} won: {loser} disconnected."),
        Some(OutcomeReason::BoardFull) | None => format!("{winner} won."),
    }
}
