use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    error::MatchError,
    services::namespace::OutcomeSnapshot,
    state::{
        SharedMatch,
        identity::{OutcomeReason, Verdict},
        turn_machine::TurnEvent,
    },
};

/// Claim the match for this process because the opponent forfeited.
///
/// Returns `true` when this call recorded the outcome. A match that is already
/// decided, locally or in the namespace, is left alone.
pub async fn forfeit(ctx: &SharedMatch, reason: OutcomeReason) -> Result<bool, MatchError> {
    if ctx.is_game_over() {
        return Ok(false);
    }
    let recorded = ctx
        .namespace()
        .declare_outcome(Verdict::Winner(ctx.identity()), reason)
        .await?;
    if recorded {
        info!(identity = %ctx.identity(), reason = %reason, "opponent forfeited");
    } else {
        // Someone else decided first; adopt their verdict even if its watch event never arrives.
        refresh_outcome(ctx).await?;
    }
    Ok(recorded)
}

/// End the match locally for `verdict`: flag game over and stop both timers.
///
/// Returns `false` when the match was already over.
pub async fn conclude(ctx: &SharedMatch, verdict: Verdict) -> bool {
    if !ctx.mark_game_over() {
        return false;
    }
    ctx.turn_timer().cancel().await;
    ctx.grace_timer().cancel().await;
    ctx.apply(TurnEvent::OutcomeRecorded).await;
    info!(identity = %ctx.identity(), verdict = verdict.as_str(), "match decided");
    true
}

/// Re-read `winner` and conclude when it is set. Returns whether the match is over.
pub async fn refresh_outcome(ctx: &SharedMatch) -> Result<bool, MatchError> {
    if ctx.is_game_over() {
        return Ok(true);
    }
    let Some(verdict) = ctx.namespace().read_outcome().await?.verdict else {
        return Ok(false);
    };
    if conclude(ctx, verdict).await {
        debug!(identity = %ctx.identity(), "verdict picked up by polling");
    }
    Ok(true)
}

/// Timer callback wrapper: forfeiture failures are logged, never raised.
pub async fn forfeit_from_timer(ctx: SharedMatch, reason: OutcomeReason) {
    if let Err(err) = forfeit(&ctx, reason).await {
        warn!(identity = %ctx.identity(), reason = %reason, error = %err, "failed to record forfeiture");
    }
}

/// Read the terminal outcome, retrying once after a poll interval when only one
/// half of it is visible yet.
pub async fn read_final_outcome(ctx: &SharedMatch) -> Result<OutcomeSnapshot, MatchError> {
    let first = ctx.namespace().read_outcome().await?;
    if first.is_complete() {
        return Ok(first);
    }
    sleep(ctx.settings().poll_interval).await;
    let second = ctx.namespace().read_outcome().await?;
    if !second.is_complete() {
        warn!(?second, "outcome still incomplete after retry");
    }
    Ok(second)
}
