//! Genflow Core - Client SDK for Long-Running Generation Jobs
//!
//! This crate drives AI-backed generation work (website analysis, audience and
//! topic discovery, blog drafting) hosted by a backend that reports progress
//! two ways: Server-Sent Event streams for incremental output, and a REST job
//! API for work that outlives a connection. It owns the orchestration between
//! them and nothing above it: rendering, forms and export are the caller's.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Application                              │
//! │        (CLI, desktop shell, service, test harness)               │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                         GENFLOW CORE                             │
//! │  ┌────────────────────────────┴───────────────────────────────┐  │
//! │  │                      GenflowClient                          │  │
//! │  │  ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌──────────┐ │  │
//! │  │  │  Stream   │  │   Jobs    │  │ Narration │  │  Request │ │  │
//! │  │  │ Connector │  │Orchestrator│ │Controller │  │  Cache   │ │  │
//! │  │  └─────┬─────┘  └─────┬─────┘  └─────┬─────┘  └────┬─────┘ │  │
//! │  └────────┼──────────────┼──────────────┼─────────────┼───────┘  │
//! │           │   SseStream  │ HttpTransport│             │          │
//! │  ┌────────┴──────────────┴──────────────┴─────────────┴───────┐  │
//! │  │            IdentityProvider (token | session id)            │  │
//! │  └─────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`GenflowClient`]: wires every component from one config
//! - [`StreamConnector`]: one SSE connection per generation request
//! - [`JobOrchestrator`]: create, poll, retry and cancel jobs
//! - [`NarrationController`]: the narration moment state machine
//! - [`RequestCache`]: deduplicated, session-cached reads
//! - [`IdentityProvider`]: bearer token or anonymous session id
//! - [`AsyncOperation`]: one interface over stream and poll sources
//!
//! # Quick Start
//!
//! ```ignore
//! use genflow_core::{ClientConfig, GenflowClient, JobKind, PollOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), genflow_core::ClientError> {
//!     let client = GenflowClient::in_memory(ClientConfig::default())?;
//!
//!     let job = client
//!         .create_job(JobKind::WebsiteAnalysis, &json!({"url": "https://example.com"}))
//!         .await?;
//!
//!     let record = client
//!         .jobs()
//!         .poll_job_status(
//!             &job.job_id,
//!             PollOptions::default().with_progress(|r| println!("{}%", r.progress)),
//!         )
//!         .await?;
//!     println!("{:?}", record.result);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`transport`]: timeout-bounded REST calls and raw SSE frames
//! - [`events`]: the closed stream event vocabulary
//! - [`stream`]: connection lifecycle and event delivery
//! - [`jobs`]: job records, polling and the client-side job table
//! - [`narration`]: narration moments and their feeds
//! - [`operation`]: stream/poll adapters behind one trait
//! - [`cache`]: in-flight dedup and the session read cache
//! - [`identity`]: identity projection and the unauthorized hook
//! - [`config`]: TOML, environment and CLI configuration
//! - [`storage`]: injected key/value stores
//! - [`analytics`]: fire-and-forget event tracking
//! - [`error`]: the error taxonomy

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod analytics;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod jobs;
pub mod narration;
pub mod operation;
pub mod storage;
pub mod stream;
pub mod transport;

// Re-exports for convenience
pub use analytics::{TrackEvent, Tracker};
pub use cache::{CacheEntry, CacheKey, CachedRead, RequestCache};
pub use client::GenflowClient;
pub use error::ClientError;
pub use events::{Payload, StreamEvent, StreamEventKind};
pub use identity::{IdentityProvider, SessionIdentity};
pub use jobs::{
    CancelResponse, JobHandle, JobId, JobKind, JobOrchestrator, JobRecord, JobStatus, JobTracker,
    PollOptions,
};
pub use narration::{
    LegacyNarration, LiveNarration, NarrationController, NarrationKind, NarrationMoment,
    NarrationRequest, NarrationSession,
};
pub use operation::{AsyncOperation, JobUpdate, JobWatch, NarrationFeed, NarrationUpdate};
pub use storage::{KeyValueStore, MemoryStore};
pub use stream::{
    ConnectOptions, ConnectionStatus, StreamConnection, StreamConnector, StreamHandle,
    StreamHandler, StreamOutcome,
};
pub use transport::{HttpTransport, TransportKind};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, Capabilities, ClientConfig,
    ClientToml, ConfigError, ConfigOverrides, ConfigSource, NarrationConfig,
};
