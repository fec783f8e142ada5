//! Async Operation Interface
//!
//! Narration and job progress each have a live (SSE) and a polling source.
//! Both sources implement [`AsyncOperation`] with the same update and output
//! types, so callers subscribe without knowing which one they got.
//!
//! [`Capabilities`] picks the source once, up front:
//!
//! | Capability        | true              | false             |
//! |-------------------|-------------------|-------------------|
//! | `narration_stream`| [`LiveNarration`] | [`LegacyNarration`] |
//! | `event_stream`    | [`StreamedJob`]   | [`PolledJob`]     |

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{Capabilities, ClientConfig};
use crate::error::ClientError;
use crate::events::StreamEvent;
use crate::jobs::{JobId, JobOrchestrator, JobRecord, PollOptions};
use crate::narration::{LegacyNarration, LiveNarration, NarrationRequest};
use crate::stream::{ConnectOptions, StreamConnector, StreamOutcome};
use crate::transport::{HttpTransport, TransportKind};

/// A long-running backend operation the caller can follow
#[async_trait]
pub trait AsyncOperation: Send + Sync {
    /// Incremental update
    type Update: Send;
    /// Final result
    type Output: Send;

    /// Which transport feeds this operation
    fn transport(&self) -> TransportKind;

    /// Follow the operation to its end
    ///
    /// `on_update` sees every update in order. Cancelling `cancel` stops the
    /// operation with [`ClientError::Aborted`] and no further updates.
    async fn subscribe(
        &self,
        on_update: &mut (dyn FnMut(Self::Update) + Send),
        cancel: &CancellationToken,
    ) -> Result<Self::Output, ClientError>;
}

/// Update from a narration feed
#[derive(Clone, Debug, PartialEq)]
pub enum NarrationUpdate {
    /// Next slice of narration text
    Chunk(String),
    /// Narration finished; carries the full text
    Complete(String),
    /// Structured business profile discovered during analysis
    BusinessProfile(Value),
}

/// Update from a job watch
#[derive(Clone, Debug, PartialEq)]
pub enum JobUpdate {
    /// A fetched status record
    Status(JobRecord),
    /// A live stream event
    Stream(StreamEvent),
}

/// Type-erased narration feed
pub type NarrationFeed = Box<dyn AsyncOperation<Update = NarrationUpdate, Output = String>>;

/// Type-erased job watch
pub type JobWatch = Box<dyn AsyncOperation<Update = JobUpdate, Output = JobRecord>>;

/// Pick the narration source for this backend
#[must_use]
pub fn select_narration_feed(
    capabilities: Capabilities,
    http: &HttpTransport,
    config: &ClientConfig,
    request: NarrationRequest,
) -> NarrationFeed {
    if capabilities.narration_stream {
        Box::new(LiveNarration::new(
            http.clone(),
            request,
            config.stream_idle_timeout,
        ))
    } else {
        Box::new(LegacyNarration::new(
            http.clone(),
            request.organization_id,
            &config.narration,
        ))
    }
}

/// Pick the job progress source for this backend
#[must_use]
pub fn select_job_watch(
    capabilities: Capabilities,
    orchestrator: &JobOrchestrator,
    connector: &StreamConnector,
    config: &ClientConfig,
    job_id: JobId,
) -> JobWatch {
    if capabilities.event_stream {
        Box::new(
            StreamedJob::new(orchestrator.clone(), connector.clone(), job_id)
                .with_poll_fallback(config.poll_interval, config.max_poll_attempts),
        )
    } else {
        Box::new(PolledJob::new(
            orchestrator.clone(),
            job_id,
            config.poll_interval,
            config.max_poll_attempts,
        ))
    }
}

// ============================================================================
// Job Adapters
// ============================================================================

/// Follows a job by polling its status
#[derive(Clone, Debug)]
pub struct PolledJob {
    orchestrator: JobOrchestrator,
    job_id: JobId,
    poll_interval: Duration,
    max_attempts: u32,
}

impl PolledJob {
    /// Create a polled watch
    #[must_use]
    pub fn new(
        orchestrator: JobOrchestrator,
        job_id: JobId,
        poll_interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            orchestrator,
            job_id,
            poll_interval,
            max_attempts,
        }
    }
}

#[async_trait]
impl AsyncOperation for PolledJob {
    type Update = JobUpdate;
    type Output = JobRecord;

    fn transport(&self) -> TransportKind {
        TransportKind::Poll
    }

    async fn subscribe(
        &self,
        on_update: &mut (dyn FnMut(JobUpdate) + Send),
        cancel: &CancellationToken,
    ) -> Result<JobRecord, ClientError> {
        // The poll callback must be 'static; relay records through a channel
        // and hand them to `on_update` on this task.
        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = PollOptions::default()
            .with_poll_interval(self.poll_interval)
            .with_max_attempts(self.max_attempts)
            .with_cancel(cancel.clone())
            .with_progress(move |record| {
                let _ = tx.send(record.clone());
            });

        let poll = self.orchestrator.poll_job_status(&self.job_id, options);
        tokio::pin!(poll);
        loop {
            tokio::select! {
                biased;
                Some(record) = rx.recv() => on_update(JobUpdate::Status(record)),
                result = &mut poll => {
                    while let Ok(record) = rx.try_recv() {
                        on_update(JobUpdate::Status(record));
                    }
                    return result;
                }
            }
        }
    }
}

/// Follows a job over its event stream, then confirms with the status endpoint
///
/// The result is always a terminal record: once the stream ends, for any
/// reason other than 401 or cancellation, the job is polled until its status
/// is terminal or the poll budget runs out.
#[derive(Clone, Debug)]
pub struct StreamedJob {
    orchestrator: JobOrchestrator,
    connector: StreamConnector,
    job_id: JobId,
    poll_interval: Duration,
    max_attempts: u32,
}

impl StreamedJob {
    /// Create a streamed watch; the connection id is the job id
    #[must_use]
    pub fn new(orchestrator: JobOrchestrator, connector: StreamConnector, job_id: JobId) -> Self {
        let defaults = PollOptions::default();
        Self {
            orchestrator,
            connector,
            job_id,
            poll_interval: defaults.poll_interval,
            max_attempts: defaults.max_attempts,
        }
    }

    /// Polling parameters used once the stream ends
    #[must_use]
    pub fn with_poll_fallback(mut self, poll_interval: Duration, max_attempts: u32) -> Self {
        self.poll_interval = poll_interval;
        self.max_attempts = max_attempts;
        self
    }

    fn poll_fallback(&self) -> PolledJob {
        PolledJob::new(
            self.orchestrator.clone(),
            self.job_id.clone(),
            self.poll_interval,
            self.max_attempts,
        )
    }
}

#[async_trait]
impl AsyncOperation for StreamedJob {
    type Update = JobUpdate;
    type Output = JobRecord;

    fn transport(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn subscribe(
        &self,
        on_update: &mut (dyn FnMut(JobUpdate) + Send),
        cancel: &CancellationToken,
    ) -> Result<JobRecord, ClientError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<StreamEvent>();
        let handle = self.connector.connect(
            self.job_id.as_str(),
            move |event: StreamEvent| {
                let _ = tx.send(event);
            },
            ConnectOptions::default(),
        );

        // The sender lives in the handler, so the channel closes when the
        // connection task ends.
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    handle.close();
                    return Err(ClientError::Aborted);
                }
                event = rx.recv() => event,
            };
            match event {
                Some(event) => {
                    let update = JobUpdate::Stream(event);
                    let finished = is_final_update(&update);
                    on_update(update);
                    if finished {
                        break;
                    }
                }
                None => break,
            }
        }

        match handle.wait().await {
            StreamOutcome::Completed(_) => {}
            StreamOutcome::Failed(e) if e.is_unauthorized() => return Err(e),
            StreamOutcome::Failed(ClientError::Unsupported(resource)) => {
                tracing::info!(job_id = %self.job_id, %resource, "No event stream for job, polling instead");
            }
            StreamOutcome::Failed(e) => {
                tracing::debug!(job_id = %self.job_id, error = %e, "Stream ended with error, polling for the final status");
            }
            StreamOutcome::Closed => return Err(ClientError::Aborted),
        }

        // The status endpoint has the final word. The first fetch is
        // immediate; polling continues while the job is still active.
        self.poll_fallback().subscribe(on_update, cancel).await
    }
}

/// Whether a job update ends the watch
#[must_use]
pub fn is_final_update(update: &JobUpdate) -> bool {
    match update {
        JobUpdate::Status(record) => record.status.is_terminal(),
        JobUpdate::Stream(event) => event.kind.is_terminal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityProvider;
    use crate::jobs::{JobStatus, JobTracker};
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn parts() -> (ClientConfig, HttpTransport, JobOrchestrator, StreamConnector) {
        let config = ClientConfig::default();
        let identity = Arc::new(IdentityProvider::new(Arc::new(MemoryStore::new())));
        let http = HttpTransport::new(&config, identity).unwrap();
        let orchestrator = JobOrchestrator::new(http.clone(), Arc::new(JobTracker::new()));
        let connector = StreamConnector::new(http.clone(), config.stream_idle_timeout);
        (config, http, orchestrator, connector)
    }

    #[test]
    fn test_capabilities_select_adapters() {
        let (config, http, orchestrator, connector) = parts();
        let request = NarrationRequest::new(crate::narration::NarrationKind::Audience, "org");

        let live = select_narration_feed(Capabilities::default(), &http, &config, request.clone());
        assert_eq!(live.transport(), TransportKind::Sse);

        let degraded = Capabilities {
            event_stream: false,
            narration_stream: false,
        };
        let legacy = select_narration_feed(degraded, &http, &config, request);
        assert_eq!(legacy.transport(), TransportKind::Poll);

        let streamed = select_job_watch(
            Capabilities::default(),
            &orchestrator,
            &connector,
            &config,
            JobId::new("j1"),
        );
        assert_eq!(streamed.transport(), TransportKind::Sse);
        let polled = select_job_watch(degraded, &orchestrator, &connector, &config, JobId::new("j1"));
        assert_eq!(polled.transport(), TransportKind::Poll);
    }

    #[test]
    fn test_final_updates() {
        let record = JobRecord {
            job_id: JobId::new("j1"),
            status: JobStatus::Running,
            progress: 10,
            current_step: None,
            error: None,
            result: None,
        };
        assert!(!is_final_update(&JobUpdate::Status(record.clone())));
        assert!(is_final_update(&JobUpdate::Status(JobRecord {
            status: JobStatus::Failed,
            ..record
        })));
    }
}
