use tracing::{debug, info};

use crate::{
    coord::recipes::{Leadership, run_election},
    error::MatchError,
    state::SharedMatch,
};

/// Decides who moves first, once per match.
pub struct FirstMoverElector {
    ctx: SharedMatch,
}

impl FirstMoverElector {
    /// Elector for the seat in `ctx`.
    pub fn new(ctx: SharedMatch) -> Self {
        Self { ctx }
    }

    /// Enter the election unless the match already has a turn marker.
    ///
    /// Returns `None` when the election was skipped.
    pub async fn elect(&self) -> Result<Option<Leadership>, MatchError> {
        let namespace = self.ctx.namespace();
        if let Some(turn) = namespace.read_turn().await? {
            debug!(turn = %turn, "turn already assigned; skipping election");
            return Ok(None);
        }

        let identity = self.ctx.identity();
        let leadership = run_election(
            namespace.coord(),
            &namespace.election(),
            identity.as_str(),
            || async move {
                if namespace.claim_first_turn(identity).await? {
                    info!(identity = %identity, "elected first mover");
                }
                Ok::<(), MatchError>(())
            },
        )
        .await?;

        if let Leadership::Follower { leader } = &leadership {
            info!(identity = %identity, leader = %leader, "opponent moves first");
        }
        Ok(Some(leadership))
    }
}
