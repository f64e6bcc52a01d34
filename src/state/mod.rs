//! Local, per-process view of the match: who we are, the turn and game-over
//! signals, the forfeiture timers and the turn phase machine.

/// The 6x7 grid and its win detection.
pub mod board;
/// Seats, verdicts and outcome reasons with their wire form.
pub mod identity;
/// Cancellable forfeiture countdowns.
pub mod timer;
/// Phase machine driven by turn, quorum and outcome events.
pub mod turn_machine;

use std::{sync::Arc, time::Duration};

use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

use crate::services::namespace::MatchNamespace;

use self::{
    board::Board,
    identity::Identity,
    timer::ForfeitTimer,
    turn_machine::{TurnEvent, TurnMachine, TurnPhase},
};

/// Handle passed to every task of one participant.
pub type SharedMatch = Arc<MatchContext>;

/// Default for [`MatchSettings::turn_timeout`].
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(30);
/// Default for [`MatchSettings::disconnect_grace`].
pub const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_secs(30);
/// Default for [`MatchSettings::poll_interval`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Timing knobs of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSettings {
    /// How long the opponent may take before forfeiting by timeout.
    pub turn_timeout: Duration,
    /// How long the opponent may stay away before forfeiting by disconnection.
    pub disconnect_grace: Duration,
    /// Bound on every blocking wait before the game-over flag is re-checked.
    pub poll_interval: Duration,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// State shared between the main loop, the watch dispatcher and the timers.
pub struct MatchContext {
    identity: Identity,
    namespace: MatchNamespace,
    settings: MatchSettings,
    game_over: watch::Sender<bool>,
    my_turn: watch::Sender<bool>,
    turn_timer: ForfeitTimer,
    grace_timer: ForfeitTimer,
    phase: Mutex<TurnMachine>,
    board: Mutex<Board>,
}

impl MatchContext {
    /// Fresh context for `identity`, before the barrier and with no timers armed.
    pub fn new(
        identity: Identity,
        namespace: MatchNamespace,
        settings: MatchSettings,
    ) -> SharedMatch {
        let (game_over, _) = watch::channel(false);
        let (my_turn, _) = watch::channel(false);
        Arc::new(Self {
            identity,
            namespace,
            settings,
            game_over,
            my_turn,
            turn_timer: ForfeitTimer::new("turn-timeout"),
            grace_timer: ForfeitTimer::new("disconnect-grace"),
            phase: Mutex::new(TurnMachine::new()),
            board: Mutex::new(Board::empty()),
        })
    }

    /// Seat this process plays.
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Handle on the shared match entries.
    pub fn namespace(&self) -> &MatchNamespace {
        &self.namespace
    }

    /// Timings of this match.
    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    /// Countdown running while the opponent holds the turn.
    pub fn turn_timer(&self) -> &ForfeitTimer {
        &self.turn_timer
    }

    /// Countdown running while the opponent is missing from the registry.
    pub fn grace_timer(&self) -> &ForfeitTimer {
        &self.grace_timer
    }

    /// Whether a verdict has been observed.
    pub fn is_game_over(&self) -> bool {
        *self.game_over.borrow()
    }

    /// Subscribe to the game-over flag; used to abandon blocking waits.
    pub fn game_over_watcher(&self) -> watch::Receiver<bool> {
        self.game_over.subscribe()
    }

    /// Set the game-over flag. Returns `true` for the call that flipped it.
    pub fn mark_game_over(&self) -> bool {
        let flipped = self.game_over.send_if_modified(|over| !std::mem::replace(over, true));
        if flipped {
            self.my_turn.send_replace(false);
        }
        flipped
    }

    /// Subscribe to the "my turn" signal.
    pub fn turn_watcher(&self) -> watch::Receiver<bool> {
        self.my_turn.subscribe()
    }

    /// Raise the "my turn" signal unless the match is over.
    pub fn raise_turn_signal(&self) {
        if !self.is_game_over() {
            self.my_turn.send_replace(true);
        }
    }

    /// Lower the "my turn" signal.
    pub fn lower_turn_signal(&self) {
        self.my_turn.send_replace(false);
    }

    /// Lower the signal and report whether it was raised.
    pub fn take_turn_signal(&self) -> bool {
        self.my_turn.send_replace(false)
    }

    /// Local copy of the board, refreshed on reset, before each move and after each write.
    pub async fn board(&self) -> Board {
        self.board.lock().await.clone()
    }

    /// Replace the local board copy.
    pub async fn set_board(&self, board: Board) {
        *self.board.lock().await = board;
    }

    /// Current phase of the turn machine.
    pub async fn phase(&self) -> TurnPhase {
        self.phase.lock().await.phase()
    }

    /// Feed an event into the phase machine. Events arriving after the game ended are dropped.
    pub async fn apply(&self, event: TurnEvent) -> Option<TurnPhase> {
        let mut machine = self.phase.lock().await;
        let before = machine.phase();
        match machine.apply(event) {
            Ok(next) => {
                if next != before {
                    info!(
                        identity = %self.identity,
                        from = ?before,
                        to = ?next,
                        transition = machine.version(),
                        "turn phase changed"
                    );
                }
                Some(next)
            }
            Err(invalid) => {
                debug!(identity = %self.identity, error = %invalid, "ignored turn event");
                None
            }
        }
    }
}
