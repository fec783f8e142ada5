//! Connection Lifecycle
//!
//! `connecting → open → closed | errored`, forward only. A connection that
//! reached `closed` or `errored` stays there; reopening means a new
//! connection with a new handle.

use serde::{Deserialize, Serialize};

use crate::transport::TransportKind;

/// Lifecycle status of a stream connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Request sent, response headers not yet received
    Connecting,
    /// Receiving events
    Open,
    /// Finished normally or closed by the caller
    Closed,
    /// Failed
    Errored,
}

impl ConnectionStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Open => 1,
            Self::Closed | Self::Errored => 2,
        }
    }

    /// Whether no further transition is possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }

    /// Whether moving to `next` is a forward transition
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Errored => "errored",
        };
        f.write_str(label)
    }
}

/// One stream per generation request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConnection {
    /// Caller-chosen connection id (usually the job id)
    pub connection_id: String,
    /// Full stream URL, identity query included
    pub stream_url: String,
    /// Transport feeding this connection
    pub transport: TransportKind,
    /// Current lifecycle status
    pub status: ConnectionStatus,
}

impl StreamConnection {
    /// A new SSE connection in `connecting`
    #[must_use]
    pub fn new(connection_id: impl Into<String>, stream_url: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            stream_url: stream_url.into(),
            transport: TransportKind::Sse,
            status: ConnectionStatus::Connecting,
        }
    }

    /// Move forward; backward or sideways moves are ignored
    ///
    /// Returns whether the status changed.
    pub fn advance(&mut self, next: ConnectionStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}
