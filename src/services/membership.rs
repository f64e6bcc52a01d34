use tracing::{info, warn};

use crate::{
    error::MatchError,
    services::{outcome::forfeit_from_timer, turn_sequencer::arm_turn_timeout},
    state::{
        SharedMatch,
        identity::OutcomeReason,
        turn_machine::{TurnEvent, TurnPhase},
    },
};

/// Players needed to start or continue a match.
pub const QUORUM: usize = 2;

/// Registry view of this participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quorum {
    /// Fewer than [`QUORUM`] players are registered.
    BelowQuorum,
    /// Both seats are registered.
    QuorumReached,
}

/// Reacts to registry changes: drives the disconnection grace timer.
///
/// Built once the start barrier has passed, so every drop below quorum it
/// sees is an opponent leaving a running match.
pub struct MembershipTracker {
    ctx: SharedMatch,
    state: Quorum,
}

impl MembershipTracker {
    /// Tracker for a match whose start barrier already passed.
    pub fn new(ctx: SharedMatch) -> Self {
        Self {
            ctx,
            state: Quorum::QuorumReached,
        }
    }

    /// Last observed registry state.
    pub fn state(&self) -> Quorum {
        self.state
    }

    /// Handle a new child set of the registry.
    pub async fn on_players_changed(&mut self, players: &[String]) -> Result<(), MatchError> {
        if self.ctx.is_game_over() {
            return Ok(());
        }

        if players.len() < QUORUM {
            self.state = Quorum::BelowQuorum;
            if self.ctx.grace_timer().is_running().await {
                return Ok(());
            }
            self.ctx.turn_timer().cancel().await;
            let ctx = self.ctx.clone();
            self.ctx
                .grace_timer()
                .arm(self.ctx.settings().disconnect_grace, move || {
                    forfeit_from_timer(ctx, OutcomeReason::Disconnection)
                })
                .await;
            warn!(
                identity = %self.ctx.identity(),
                players = players.len(),
                grace_ms = self.ctx.settings().disconnect_grace.as_millis() as u64,
                "opponent left; disconnection grace period started"
            );
            return Ok(());
        }

        if self.state == Quorum::BelowQuorum {
            self.state = Quorum::QuorumReached;
            self.ctx.apply(TurnEvent::QuorumReached).await;
        }

        if self.ctx.grace_timer().cancel().await {
            info!(identity = %self.ctx.identity(), "opponent reconnected within grace period");
            // The departure cancelled the opponent's countdown.
            if self.ctx.phase().await == TurnPhase::WaitingForMyTurn {
                arm_turn_timeout(&self.ctx).await;
            }
        }
        Ok(())
    }
}
