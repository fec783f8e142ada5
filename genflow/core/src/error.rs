//! Client Error Taxonomy
//!
//! Every fallible operation in this crate returns [`ClientError`]. Surfaces
//! branch on [`ClientError::code`] or the `is_*` helpers.
//!
//! The type is `Clone`: deduplicated reads hand the same result to every
//! waiter of a shared future.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the transport, stream, job and narration layers
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The connection died or never opened, with no structured payload
    #[error("connection failed: {0}")]
    Transport(String),

    /// The backend answered with a structured error
    #[error("backend error: {message}")]
    Backend {
        /// Human-readable message from the backend
        message: String,
        /// Machine-readable code, when the backend supplied one
        code: Option<String>,
        /// HTTP status, when the error came from a REST response
        status: Option<u16>,
    },

    /// An explicit request or stream timeout fired
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The backend rejected the stored credentials (HTTP 401)
    #[error("unauthorized")]
    Unauthorized,

    /// Job polling reached its attempt budget without a terminal status
    #[error("job {job_id} still running after {attempts} status checks")]
    PollingTimeout {
        /// The job that was being polled
        job_id: String,
        /// Number of status fetches performed
        attempts: u32,
    },

    /// Narration is not offered for this flow; callers skip it silently
    #[error("narration unavailable")]
    NarrationUnavailable,

    /// The backend does not implement the requested stream (404/501)
    #[error("unsupported by backend: {0}")]
    Unsupported(String),

    /// The owning cancellation token fired
    #[error("operation aborted")]
    Aborted,

    /// A successful response did not match the expected shape
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Build a backend error from a message and optional code
    pub fn backend(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Backend {
            message: message.into(),
            code,
            status: None,
        }
    }

    /// Whether this error came from a 401 and triggered the logout hook
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Whether this error is an explicit timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::PollingTimeout { .. })
    }

    /// Whether offering a "retry" action makes sense
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::PollingTimeout { .. }
        )
    }

    /// Stable code for logging and UI branching
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TRANSPORT",
            Self::Backend { .. } => "BACKEND",
            Self::Timeout(_) => "TIMEOUT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::PollingTimeout { .. } => "POLLING_TIMEOUT",
            Self::NarrationUnavailable => "NARRATION_UNAVAILABLE",
            Self::Unsupported(_) => "UNSUPPORTED",
            Self::Aborted => "ABORTED",
            Self::Decode(_) => "DECODE",
        }
    }

    /// Map a reqwest failure, keeping timeouts distinct from transport errors
    pub(crate) fn from_reqwest(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return Self::Timeout(timeout);
        }
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        Self::Transport(err.to_string())
    }
}
