//! Top-level orchestration of one participant process.
//!
//! Players run: skeleton → guarded reset → presence → barrier → election →
//! watches → turn loop → result. Observers only watch `board` and `winner`.

use std::sync::Arc;

use tokio::{
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_stream::{StreamExt, wrappers::UnboundedReceiverStream};
use tracing::{debug, info, warn};

use crate::{
    console::{Console, describe_outcome, parse_column},
    coord::{
        DataEvent,
        recipes::{Wait, with_lock},
    },
    error::MatchError,
    services::{
        dispatcher::{self, MatchWatches},
        election::FirstMoverElector,
        membership::QUORUM,
        mutation_gate::{MoveOutcome, apply_move},
        namespace::OutcomeSnapshot,
        outcome::{read_final_outcome, refresh_outcome},
    },
    state::{
        SharedMatch,
        board::{Board, BoardError, COLUMNS},
        identity::{Identity, Verdict},
        turn_machine::TurnEvent,
    },
};

/// Drives one participant from startup to the final result.
pub struct MatchLifecycleController {
    ctx: SharedMatch,
    console: Arc<dyn Console>,
}

impl MatchLifecycleController {
    /// Controller printing to `console`.
    pub fn new(ctx: SharedMatch, console: Arc<dyn Console>) -> Self {
        Self { ctx, console }
    }

    /// Run the match for a player seat and return the recorded outcome.
    pub async fn run_player(&self) -> Result<OutcomeSnapshot, MatchError> {
        let identity = self.ctx.identity();
        if !identity.is_player() {
            return Err(MatchError::NotAPlayer(identity));
        }

        self.prepare_and_register().await?;
        info!(identity = %identity, "registered presence");

        self.console.notice("Waiting for an opponent to join...");
        self.await_quorum().await?;
        FirstMoverElector::new(self.ctx.clone()).elect().await?;

        let watches = MatchWatches::subscribe(self.ctx.namespace()).await?;
        let dispatcher = dispatcher::spawn(self.ctx.clone(), watches);
        let played = self.turn_loop(&dispatcher).await;
        dispatcher.abort();
        played?;

        self.finish().await
    }

    /// Follow a match without taking part in it.
    pub async fn run_observer(&self) -> Result<OutcomeSnapshot, MatchError> {
        let namespace = self.ctx.namespace();
        namespace.ensure_skeleton().await?;
        let coord = namespace.coord();

        let board = UnboundedReceiverStream::new(coord.watch_data(&namespace.board()).await?)
            .map(ObservedEvent::Board);
        let winner = UnboundedReceiverStream::new(coord.watch_data(&namespace.winner()).await?)
            .map(ObservedEvent::Winner);
        let mut events = board.merge(winner);
        self.console.notice("Observing the match...");

        loop {
            let event = match timeout(self.ctx.settings().poll_interval, events.next()).await {
                Err(_) if self.poll_outcome().await? => break,
                Err(_) => continue,
                Ok(None) => return Err(MatchError::SessionLost),
                Ok(Some(event)) => event,
            };
            match event {
                ObservedEvent::Board(Some(entry)) => match Board::decode(&entry.data) {
                    Ok(board) => {
                        self.console.show_board(&board);
                        self.ctx.set_board(board).await;
                    }
                    Err(err) => debug!(error = %err, "skipping unreadable board update"),
                },
                ObservedEvent::Winner(value) if is_decided(&value) => {
                    self.ctx.mark_game_over();
                    break;
                }
                _ => {}
            }
        }

        self.finish().await
    }

    /// Skeleton, the reset of an abandoned namespace and our presence marker.
    ///
    /// Registration happens under `reset_lock` so a later starter never sees an
    /// empty registry and wipes a marker that is already live.
    async fn prepare_and_register(&self) -> Result<(), MatchError> {
        let namespace = self.ctx.namespace();
        let identity = self.ctx.identity();
        namespace.ensure_skeleton().await?;

        let wait = Wait::polling(self.ctx.settings().poll_interval);
        let board = with_lock(namespace.coord(), &namespace.reset_lock(), &wait, || async move {
            if namespace.registered().await?.is_empty() {
                namespace.reset_for_new_match().await?;
            }
            namespace.register_presence(identity).await?;
            namespace.load_board().await
        })
        .await?;
        self.ctx.set_board(board).await;
        Ok(())
    }

    /// Barrier: block until the registry holds both players.
    async fn await_quorum(&self) -> Result<(), MatchError> {
        let namespace = self.ctx.namespace();
        let mut changes = namespace
            .coord()
            .watch_children(&namespace.players())
            .await?;
        let mut players = namespace.registered().await?;

        while players.len() < QUORUM {
            match timeout(self.ctx.settings().poll_interval, changes.recv()).await {
                Ok(Some(names)) => players = names,
                Ok(None) => return Err(MatchError::SessionLost),
                Err(_) => players = namespace.registered().await?,
            }
        }
        info!(identity = %self.ctx.identity(), players = ?players, "quorum reached");
        self.ctx.apply(TurnEvent::QuorumReached).await;
        Ok(())
    }

    /// Wait for the turn signal, play, repeat until the match is decided.
    async fn turn_loop(&self, dispatcher: &JoinHandle<()>) -> Result<(), MatchError> {
        let mut turn = self.ctx.turn_watcher();
        let poll = self.ctx.settings().poll_interval;

        while !self.ctx.is_game_over() {
            if dispatcher.is_finished() {
                return Err(MatchError::SessionLost);
            }
            let signalled = timeout(poll, async {
                turn.wait_for(|mine| *mine).await.is_ok()
            })
            .await;
            if signalled.is_err() {
                self.poll_outcome().await?;
                continue;
            }
            if !matches!(signalled, Ok(true)) || !self.ctx.take_turn_signal() {
                continue;
            }
            self.play_turn(dispatcher).await?;
        }
        Ok(())
    }

    async fn play_turn(&self, dispatcher: &JoinHandle<()>) -> Result<(), MatchError> {
        let board = self.ctx.namespace().load_board().await?;
        self.console.show_board(&board);
        self.ctx.set_board(board).await;

        let prompt = format!(
            "{} ({}), choose a column 0-{}: ",
            self.ctx.identity(),
            self.ctx.identity().symbol(),
            COLUMNS - 1
        );
        let mut game_over = self.ctx.game_over_watcher();

        loop {
            let line = tokio::select! {
                line = self.console.read_line(&prompt) => line.map_err(MatchError::Console)?,
                _ = async { game_over.wait_for(|over| *over).await.is_ok() } => {
                    self.console.notice("The game ended while you were choosing.");
                    return Ok(());
                }
                ended = self.watchdog(dispatcher) => {
                    ended?;
                    self.console.notice("The game ended while you were choosing.");
                    return Ok(());
                }
            };
            let Some(line) = line else {
                return Err(MatchError::Interrupted);
            };
            let column = match parse_column(&line) {
                Ok(column) => column,
                Err(err) => {
                    self.console.notice(&err.to_string());
                    continue;
                }
            };
            if self.ctx.board().await.is_column_full(column) {
                self.console
                    .notice(&BoardError::ColumnFull { column }.to_string());
                continue;
            }

            match apply_move(&self.ctx, column).await? {
                MoveOutcome::Placed { next, .. } => {
                    self.console.show_board(&self.ctx.board().await);
                    self.console.notice(&format!("Waiting for {next}..."));
                    return Ok(());
                }
                MoveOutcome::Won { .. } | MoveOutcome::Draw { .. } => return Ok(()),
                MoveOutcome::Rejected(err) => {
                    self.console.notice(&err.to_string());
                }
                MoveOutcome::Stale => {
                    warn!(identity = %self.ctx.identity(), "move discarded; turn no longer ours");
                    return Ok(());
                }
            }
        }
    }

    async fn finish(&self) -> Result<OutcomeSnapshot, MatchError> {
        let outcome = read_final_outcome(&self.ctx).await?;
        let board = self.ctx.namespace().load_board().await?;
        self.console.show_board(&board);
        self.console
            .notice(&describe_outcome(self.ctx.identity(), &outcome));
        info!(
            identity = %self.ctx.identity(),
            verdict = outcome.verdict.map(Verdict::as_str),
            reason = outcome.reason.map(|reason| reason.as_str()),
            "match finished"
        );
        Ok(outcome)
    }
}

impl MatchLifecycleController {
    /// Poll while the prompt is open: `Err` once the dispatcher stopped, `Ok` once
    /// a verdict is visible in the namespace.
    async fn watchdog(&self, dispatcher: &JoinHandle<()>) -> Result<(), MatchError> {
        loop {
            sleep(self.ctx.settings().poll_interval).await;
            if dispatcher.is_finished() {
                return Err(MatchError::SessionLost);
            }
            if self.poll_outcome().await? {
                return Ok(());
            }
        }
    }

    /// Liveness fallback for a lost `winner` notification. Only session loss is fatal.
    async fn poll_outcome(&self) -> Result<bool, MatchError> {
        match refresh_outcome(&self.ctx).await {
            Ok(over) => Ok(over),
            Err(err) if err.is_session_lost() => Err(err),
            Err(err) => {
                warn!(identity = %self.ctx.identity(), error = %err, "failed to re-read the outcome");
                Ok(false)
            }
        }
    }
}

enum ObservedEvent {
    Board(DataEvent),
    Winner(DataEvent),
}

fn is_decided(value: &DataEvent) -> bool {
    value
        .as_ref()
        .and_then(|entry| Verdict::from_wire(&entry.data))
        .is_some()
}

/// Run the variant matching `identity`.
pub async fn run(
    ctx: SharedMatch,
    console: Arc<dyn Console>,
) -> Result<OutcomeSnapshot, MatchError> {
    let controller = MatchLifecycleController::new(ctx.clone(), console);
    match ctx.identity() {
        Identity::Observer => controller.run_observer().await,
        _ => controller.run_player().await,
    }
}
