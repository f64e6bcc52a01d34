//! Errors surfaced by match operations.

use thiserror::Error;

use crate::{
    coord::CoordError,
    state::identity::{Identity, UnknownIdentity},
};

/// Errors that can occur while taking part in a match.
#[derive(Debug, Error)]
pub enum MatchError {
    /// Another live session already registered this identity.
    #[error("identity `{0}` is already taken by a connected participant")]
    IdentityInUse(Identity),
    /// The coordination service failed or rejected an operation.
    #[error("coordination failure")]
    Coordination(#[source] CoordError),
    /// The session expired or was closed while the match was running.
    #[error("lost the coordination session")]
    SessionLost,
    /// A shared payload could not be encoded.
    #[error("failed to encode shared state")]
    Encode(#[from] serde_json::Error),
    /// The match was abandoned by a shutdown request.
    #[error("match interrupted")]
    Interrupted,
    /// A player-only operation was attempted by an observer.
    #[error("`{0}` does not take turns")]
    NotAPlayer(Identity),
    /// The identity prompt received an unknown role.
    #[error(transparent)]
    InvalidIdentity(#[from] UnknownIdentity),
    /// The local console could not be read.
    #[error("console unavailable")]
    Console(#[source] std::io::Error),
}

impl From<CoordError> for MatchError {
    fn from(err: CoordError) -> Self {
        match err {
            CoordError::SessionLost => MatchError::SessionLost,
            CoordError::Interrupted => MatchError::Interrupted,
            other => MatchError::Coordination(other),
        }
    }
}

impl MatchError {
    /// True when the error ends the match for this process without a recorded outcome.
    pub fn is_session_lost(&self) -> bool {
        matches!(self, MatchError::SessionLost)
    }
}
