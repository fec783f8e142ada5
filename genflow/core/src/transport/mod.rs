//! Transport Primitives
//!
//! The two ways the client talks to the backend:
//!
//! - [`http`]: timeout-bounded REST calls with identity headers
//! - [`sse`]: one-way `text/event-stream` responses with identity in the query
//!
//! Everything above this layer (connector, jobs, narration, cache) is written
//! against these two types and never builds a `reqwest` request itself.

pub mod http;
pub mod sse;

pub use http::HttpTransport;
pub use sse::{strip_query, SseError, SseFrame, SseStream};

use serde::{Deserialize, Serialize};

/// How an operation receives its updates
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Server-Sent Events
    Sse,
    /// Repeated REST polling
    Poll,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sse => write!(f, "sse"),
            Self::Poll => write!(f, "poll"),
        }
    }
}
