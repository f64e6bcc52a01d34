//! Error types of the etcd backend.

use reqwest::StatusCode;
use thiserror::Error;

use crate::coord::CoordError;

/// Convenient result alias returning [`EtcdError`] failures.
pub type EtcdResult<T> = Result<T, EtcdError>;

/// Failures that can occur while talking to the etcd gateway.
#[derive(Debug, Error)]
pub enum EtcdError {
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build etcd client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// A request could not be sent.
    #[error("failed to send etcd request to `{endpoint}`")]
    RequestSend {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
    /// etcd answered with a non-success status.
    #[error("unexpected etcd response status {status} for `{endpoint}`")]
    RequestStatus {
        endpoint: &'static str,
        status: StatusCode,
    },
    /// Response payload could not be parsed.
    #[error("failed to decode etcd response for `{endpoint}`")]
    DecodeResponse {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
    /// A streamed watch frame was not valid JSON.
    #[error("failed to decode etcd watch frame")]
    DecodeFrame {
        #[source]
        source: serde_json::Error,
    },
    /// A key or value was not valid base64.
    #[error("invalid base64 in etcd `{field}`")]
    InvalidPayload {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },
    /// The lease backing the session no longer exists.
    #[error("etcd lease {lease} expired")]
    LeaseExpired { lease: i64 },
}

impl From<EtcdError> for CoordError {
    fn from(err: EtcdError) -> Self {
        match err {
            EtcdError::LeaseExpired { .. } => CoordError::SessionLost,
            other => CoordError::unavailable(other.to_string(), other),
        }
    }
}
