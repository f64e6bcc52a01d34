use tracing::{debug, info, warn};

use crate::{
    coord::recipes::{Wait, with_lock},
    error::MatchError,
    services::turn_sequencer::publish_next_turn,
    state::{
        SharedMatch,
        board::BoardError,
        identity::{Identity, OutcomeReason, Verdict},
    },
};

/// Result of one attempt to play a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Disc placed and the turn handed over.
    Placed { row: usize, next: Identity },
    /// Disc placed and it completed four in a row.
    Won { row: usize },
    /// Disc placed and it filled the grid.
    Draw { row: usize },
    /// The column cannot take a disc; nothing was written.
    Rejected(BoardError),
    /// The turn moved on or the match ended before the lock was obtained.
    Stale,
}

/// Play `column` for this process as one indivisible step under `move_lock`.
///
/// Board write happens before the outcome or turn write so that every reader
/// sees a board at least as fresh as the marker that follows it.
pub async fn apply_move(ctx: &SharedMatch, column: usize) -> Result<MoveOutcome, MatchError> {
    let namespace = ctx.namespace();
    let me = ctx.identity();
    let wait = Wait::abortable(ctx.settings().poll_interval, ctx.game_over_watcher());

    let result = with_lock(namespace.coord(), &namespace.move_lock(), &wait, || async move {
        if namespace.read_turn().await? != Some(me) {
            debug!(identity = %me, "turn moved on before the move was applied");
            return Ok(MoveOutcome::Stale);
        }
        if namespace.read_outcome().await?.verdict.is_some() {
            return Ok(MoveOutcome::Stale);
        }

        let mut board = namespace.load_board().await?;
        let row = match board.drop_disc(column, me) {
            Ok(row) => row,
            Err(err) => return Ok(MoveOutcome::Rejected(err)),
        };
        namespace.persist_board(&board).await?;
        ctx.set_board(board.clone()).await;
        info!(identity = %me, column, row, "disc placed");

        if board.has_connect_four(me) {
            settle(ctx, Verdict::Winner(me), OutcomeReason::FourInARow).await?;
            return Ok(MoveOutcome::Won { row });
        }
        if board.is_full() {
            settle(ctx, Verdict::Draw, OutcomeReason::BoardFull).await?;
            return Ok(MoveOutcome::Draw { row });
        }

        let next = publish_next_turn(ctx).await?;
        Ok(MoveOutcome::Placed { row, next })
    })
    .await;

    match result {
        Err(MatchError::Interrupted) if ctx.is_game_over() => Ok(MoveOutcome::Stale),
        other => other,
    }
}

async fn settle(
    ctx: &SharedMatch,
    verdict: Verdict,
    reason: OutcomeReason,
) -> Result<(), MatchError> {
    if !ctx.namespace().declare_outcome(verdict, reason).await? {
        warn!(
            identity = %ctx.identity(),
            verdict = verdict.as_str(),
            "outcome was settled by a concurrent forfeiture"
        );
    }
    Ok(())
}
