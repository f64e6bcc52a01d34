use tracing::debug;

use crate::{
    coord::DataEvent,
    error::MatchError,
    services::outcome::{conclude, forfeit_from_timer},
    state::{
        SharedMatch,
        identity::{Identity, OutcomeReason, Verdict},
        turn_machine::TurnEvent,
    },
};

/// Reacts to the turn marker and the winner entry.
pub struct TurnSequencer {
    ctx: SharedMatch,
}

impl TurnSequencer {
    /// Sequencer bound to `ctx`.
    pub fn new(ctx: SharedMatch) -> Self {
        Self { ctx }
    }

    /// Toggle the local turn signal and restart the opponent's countdown.
    pub async fn on_turn_changed(&self, event: DataEvent) -> Result<(), MatchError> {
        if self.ctx.is_game_over() {
            return Ok(());
        }
        let Some(turn) = event.and_then(|entry| Identity::from_wire(&entry.data)) else {
            return Ok(());
        };

        self.ctx.turn_timer().cancel().await;

        if turn == self.ctx.identity() {
            self.ctx.apply(TurnEvent::TurnAssigned { mine: true }).await;
            self.ctx.raise_turn_signal();
            debug!(identity = %turn, "my turn");
        } else {
            self.ctx.apply(TurnEvent::TurnAssigned { mine: false }).await;
            self.ctx.lower_turn_signal();
            arm_turn_timeout(&self.ctx).await;
        }
        Ok(())
    }

    /// The first non-empty verdict ends the match locally.
    pub async fn on_winner_changed(&self, event: DataEvent) -> Result<(), MatchError> {
        let Some(verdict) = event.and_then(|entry| Verdict::from_wire(&entry.data)) else {
            return Ok(());
        };
        conclude(&self.ctx, verdict).await;
        Ok(())
    }
}

/// Start the countdown after which the opponent forfeits by timeout.
pub async fn arm_turn_timeout(ctx: &SharedMatch) {
    let fire_ctx = ctx.clone();
    ctx.turn_timer()
        .arm(ctx.settings().turn_timeout, move || {
            forfeit_from_timer(fire_ctx, OutcomeReason::Timeout)
        })
        .await;
}

/// Hand the turn to the opponent.
pub async fn publish_next_turn(ctx: &SharedMatch) -> Result<Identity, MatchError> {
    let next = ctx
        .identity()
        .opponent()
        .ok_or(MatchError::NotAPlayer(ctx.identity()))?;
    ctx.namespace().write_turn(next).await?;
    debug!(from = %ctx.identity(), to = %next, "turn handed over");
    Ok(next)
}
