//! Error types for the request layer

use transport::TransportError;

/// Why a refresh window ended without a new access credential.
///
/// Cloned to every waiter of the window, so it carries only rendered
/// messages, not source errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshFailure {
    #[error("no refresh credential is stored")]
    MissingRefreshCredential,

    #[error("refresh exchange could not reach the token endpoint: {0}")]
    Transport(String),

    #[error("refresh credential rejected with status {0}")]
    Rejected(u16),

    #[error("malformed refresh response: {0}")]
    MalformedResponse(String),

    #[error("refresh exchange timed out after {0}s")]
    Timeout(u64),

    #[error("session ended while the refresh was in flight")]
    SignedOut,

    #[error("refresh exchange ended without an outcome")]
    Abandoned,
}

impl From<session_auth::Error> for RefreshFailure {
    fn from(err: session_auth::Error) -> Self {
        match err {
            session_auth::Error::Http(e) => RefreshFailure::Transport(e.to_string()),
            session_auth::Error::Rejected { status, .. } => RefreshFailure::Rejected(status),
            other => RefreshFailure::MalformedResponse(other.to_string()),
        }
    }
}

/// Errors returned by `Client`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No response was received. Passed through from the transport untouched.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The credential refresh failed; the session is over and stored
    /// credentials have been cleared.
    #[error("session expired: {0}")]
    SessionExpired(RefreshFailure),

    /// The call was still unauthorized after one refresh and retry.
    #[error("request still unauthorized after credential refresh")]
    RetryExhausted,

    /// A session endpoint (login, registration, logout) answered with a
    /// non-success status.
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed session response: {0}")]
    MalformedSession(String),

    #[error("credential store error: {0}")]
    Credential(String),
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
