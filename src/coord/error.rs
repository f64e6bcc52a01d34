use std::error::Error;
use thiserror::Error;

/// Result alias for coordination operations.
pub type CoordResult<T> = Result<T, CoordError>;

/// Error raised by coordination backends regardless of the underlying service.
#[derive(Debug, Error)]
pub enum CoordError {
    /// The session backing this client expired or was closed.
    #[error("coordination session lost")]
    SessionLost,
    /// The addressed entry does not exist.
    #[error("no entry at `{path}`")]
    NoNode {
        /// Path of the entry.
        path: String,
    },
    /// An entry already occupies the path passed to a create.
    #[error("entry `{path}` already exists")]
    AlreadyExists {
        /// Path of the entry.
        path: String,
    },
    /// A version-checked write lost against a concurrent writer.
    #[error("version conflict on `{path}`")]
    VersionConflict {
        /// Path of the entry.
        path: String,
    },
    /// A blocking wait was abandoned by its caller.
    #[error("wait interrupted")]
    Interrupted,
    /// The service could not be reached or answered unexpectedly.
    #[error("coordination service unavailable: {message}")]
    Unavailable {
        /// What was being attempted.
        message: String,
        /// Transport or decoding failure reported by the backend.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl CoordError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        CoordError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// True when the failure means the session can no longer be used.
    pub fn is_session_lost(&self) -> bool {
        matches!(self, CoordError::SessionLost)
    }
}
