//! Generation Streams
//!
//! One SSE connection per generation request, demultiplexed into
//! [`StreamEvent`](crate::events::StreamEvent)s for a single handler.
//!
//! ```text
//! StreamConnector::connect(id, handler)
//!        │
//!        ▼
//!   spawned task ── SseStream::open ── next_frame ── decode_frame ── handler
//!        ▲                                                   │
//!        └──────────── StreamHandle::close / Drop ───────────┘
//! ```

pub mod connection;
pub mod connector;

pub use connection::{ConnectionStatus, StreamConnection};
pub use connector::{ConnectOptions, StreamConnector, StreamHandle, StreamHandler, StreamOutcome};
