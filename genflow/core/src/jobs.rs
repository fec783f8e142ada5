//! Job Orchestration
//!
//! Server-tracked generation jobs: create, poll until terminal, retry, cancel.
//!
//! # Source of Truth
//!
//! The backend owns job state. `retry_job` and `cancel_job` fire a request and
//! change nothing locally; the next status fetch is the only way the client
//! learns what happened. [`JobTracker`] keeps the last record it saw per job
//! so surfaces can render without refetching, and drops the job once it has
//! seen a terminal status.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::Method;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::transport::HttpTransport;

// ============================================================================
// Job Types
// ============================================================================

/// Job identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Create a job ID from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of job to create; only selects the request path
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Audience, topic and blog generation
    ContentGeneration,
    /// Scrape and analyse a website
    WebsiteAnalysis,
}

impl JobKind {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContentGeneration => "content-generation",
            Self::WebsiteAnalysis => "website-analysis",
        }
    }

    /// Creation endpoint
    #[must_use]
    pub fn path(self) -> String {
        format!("/api/v1/jobs/{}", self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "content-generation" => Ok(Self::ContentGeneration),
            "website-analysis" => Ok(Self::WebsiteAnalysis),
            other => Err(format!(
                "unknown job kind {other:?} (expected content-generation or website-analysis)"
            )),
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a server-side job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted, not started
    Queued,
    /// Being worked on
    Running,
    /// Finished with a result
    Succeeded,
    /// Finished with an error
    Failed,
    /// Stopped on request
    Cancelled,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Succeeded | Self::Failed | Self::Cancelled => 2,
        }
    }

    /// Whether the job is finished (succeeded, failed, or cancelled)
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    /// Whether the job is still queued or running
    #[must_use]
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Whether `next` is a legal successor
    ///
    /// Staying put is legal while active; terminal statuses are final.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self.rank().cmp(&next.rank()) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => self == next && self.is_active(),
            std::cmp::Ordering::Greater => false,
        }
    }

    /// Human-readable label
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Snapshot of a job as reported by the backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Job identifier
    pub job_id: JobId,
    /// Current status
    pub status: JobStatus,
    /// Progress percentage (0-100)
    #[serde(default, deserialize_with = "clamped_progress")]
    pub progress: u8,
    /// What the job is doing right now
    #[serde(default)]
    pub current_step: Option<String>,
    /// Failure description (when failed)
    #[serde(default, deserialize_with = "error_message")]
    pub error: Option<String>,
    /// Job output (when succeeded)
    #[serde(default)]
    pub result: Option<Value>,
}

fn clamped_progress<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let raw = Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0);
    // Clamped to 0..=100 first, so the cast cannot truncate.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let progress = raw.clamp(0.0, 100.0).round() as u8;
    Ok(progress)
}

fn error_message<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(message)) => Some(message),
        Some(Value::Object(fields)) => fields
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

/// Returned by job creation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    /// The new job
    pub job_id: JobId,
}

/// Returned by `cancel_job`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    /// Whether the backend accepted the cancellation
    #[serde(default)]
    pub cancelled: bool,
}

// ============================================================================
// Poll Options
// ============================================================================

/// Called with every fetched record
pub type ProgressCallback = Box<dyn FnMut(&JobRecord) + Send>;

/// Options for [`JobOrchestrator::poll_job_status`]
pub struct PollOptions {
    /// Called after every fetch, terminal or not
    pub on_progress: Option<ProgressCallback>,
    /// Delay between fetches
    pub poll_interval: Duration,
    /// Upper bound on fetches
    pub max_attempts: u32,
    /// Stops the poll with [`ClientError::Aborted`]
    pub cancel: CancellationToken,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            on_progress: None,
            poll_interval: Duration::from_millis(2500),
            max_attempts: 120,
            cancel: CancellationToken::new(),
        }
    }
}

impl PollOptions {
    /// Attach a progress callback
    #[must_use]
    pub fn with_progress(mut self, on_progress: impl FnMut(&JobRecord) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(on_progress));
        self
    }

    /// Set the delay between fetches
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the fetch budget
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Tie the poll to a cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl std::fmt::Debug for PollOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollOptions")
            .field("on_progress", &self.on_progress.is_some())
            .field("poll_interval", &self.poll_interval)
            .field("max_attempts", &self.max_attempts)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

// ============================================================================
// Job Tracker
// ============================================================================

/// What [`JobTracker::observe`] made of a record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Observation {
    /// First record seen for this job
    New,
    /// Forward progress (or the same active status again)
    Updated,
    /// The record went backwards; it was logged and not applied
    Regressed,
    /// Terminal status; the job was forgotten
    Finished,
}

/// Last observed record per active job
#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: DashMap<JobId, JobRecord>,
}

impl JobTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fetched status
    pub fn observe(&self, record: &JobRecord) -> Observation {
        let previous = self.jobs.get(&record.job_id).map(|r| r.status);

        if let Some(previous) = previous {
            if !previous.can_transition_to(record.status) {
                tracing::warn!(
                    job_id = %record.job_id,
                    from = %previous,
                    to = %record.status,
                    "Ignoring job status regression"
                );
                return Observation::Regressed;
            }
        }

        if record.status.is_terminal() {
            self.jobs.remove(&record.job_id);
            tracing::info!(job_id = %record.job_id, status = %record.status, "Job finished");
            return Observation::Finished;
        }

        self.jobs.insert(record.job_id.clone(), record.clone());
        if previous.is_some() {
            Observation::Updated
        } else {
            Observation::New
        }
    }

    /// Last record seen for an active job
    #[must_use]
    pub fn get(&self, job_id: &JobId) -> Option<JobRecord> {
        self.jobs.get(job_id).map(|r| r.value().clone())
    }

    /// Number of active jobs
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no job is being tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

// ============================================================================
// Job Orchestrator
// ============================================================================

/// Creates, polls, retries and cancels jobs
#[derive(Clone, Debug)]
pub struct JobOrchestrator {
    http: HttpTransport,
    tracker: Arc<JobTracker>,
}

impl JobOrchestrator {
    /// Create an orchestrator
    #[must_use]
    pub fn new(http: HttpTransport, tracker: Arc<JobTracker>) -> Self {
        Self { http, tracker }
    }

    /// The tracker fed by this orchestrator
    #[must_use]
    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    fn job_path(&self, job_id: &JobId, action: &str) -> Result<String, ClientError> {
        self.http
            .segment_path(&["api", "v1", "jobs", job_id.as_str(), action])
    }

    /// Create a job
    ///
    /// # Errors
    ///
    /// Any [`ClientError`].
    pub async fn create_job(&self, kind: JobKind, payload: &Value) -> Result<JobHandle, ClientError> {
        let handle: JobHandle = self.http.post_json(&kind.path(), payload).await?;
        tracing::info!(job_id = %handle.job_id, %kind, "Job created");
        Ok(handle)
    }

    /// Fetch the current status once
    ///
    /// # Errors
    ///
    /// Any [`ClientError`].
    pub async fn get_status(&self, job_id: &JobId) -> Result<JobRecord, ClientError> {
        let path = self.job_path(job_id, "status")?;
        let record: JobRecord = self.http.get_json(&path).await?;
        self.tracker.observe(&record);
        Ok(record)
    }

    /// Poll until the job reaches a terminal status
    ///
    /// Fetches at most `max_attempts` times and resolves with the terminal
    /// record exactly as fetched.
    ///
    /// # Errors
    ///
    /// [`ClientError::Aborted`] when the token fires,
    /// [`ClientError::PollingTimeout`] when the budget runs out, otherwise
    /// the error of the failing fetch.
    pub async fn poll_job_status(
        &self,
        job_id: &JobId,
        options: PollOptions,
    ) -> Result<JobRecord, ClientError> {
        let PollOptions {
            mut on_progress,
            poll_interval,
            max_attempts,
            cancel,
        } = options;

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ClientError::Aborted);
            }
            // A zero budget fetches nothing.
            if attempt >= max_attempts {
                return Err(poll_exhausted(job_id, attempt));
            }
            attempt += 1;

            let record = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ClientError::Aborted),
                record = self.get_status(job_id) => record?,
            };
            tracing::debug!(
                job_id = %job_id,
                attempt,
                status = %record.status,
                progress = record.progress,
                "Polled job status"
            );
            if let Some(on_progress) = on_progress.as_mut() {
                on_progress(&record);
            }

            if record.status.is_terminal() {
                return Ok(record);
            }
            if attempt >= max_attempts {
                return Err(poll_exhausted(job_id, attempt));
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ClientError::Aborted),
                () = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    /// Ask the backend to retry a failed job
    ///
    /// # Errors
    ///
    /// Any [`ClientError`].
    pub async fn retry_job(&self, job_id: &JobId) -> Result<(), ClientError> {
        self.http
            .send(
                Method::POST,
                &self.job_path(job_id, "retry")?,
                Some(&json!({})),
                self.http.request_timeout(),
            )
            .await?;
        tracing::info!(job_id = %job_id, "Job retry requested");
        Ok(())
    }

    /// Ask the backend to cancel a job
    ///
    /// # Errors
    ///
    /// Any [`ClientError`].
    pub async fn cancel_job(&self, job_id: &JobId) -> Result<CancelResponse, ClientError> {
        let response: CancelResponse = self
            .http
            .post_json(&self.job_path(job_id, "cancel")?, &json!({}))
            .await?;
        tracing::info!(job_id = %job_id, cancelled = response.cancelled, "Job cancel requested");
        Ok(response)
    }
}

fn poll_exhausted(job_id: &JobId, attempts: u32) -> ClientError {
    tracing::warn!(job_id = %job_id, attempts, "Giving up on job poll");
    ClientError::PollingTimeout {
        job_id: job_id.to_string(),
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(status: JobStatus) -> JobRecord {
        JobRecord {
            job_id: JobId::new("j1"),
            status,
            progress: 0,
            current_step: None,
            error: None,
            result: None,
        }
    }

    #[test]
    fn test_status_transitions() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Succeeded.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_record_wire_format() {
        let record: JobRecord = serde_json::from_value(json!({
            "jobId": "j1",
            "status": "running",
            "progress": 140,
            "currentStep": "Scraping"
        }))
        .unwrap();
        assert_eq!(record.job_id, JobId::new("j1"));
        assert_eq!(record.progress, 100);
        assert_eq!(record.current_step.as_deref(), Some("Scraping"));
    }

    #[test]
    fn test_record_error_shapes() {
        let nested: JobRecord = serde_json::from_value(json!({
            "jobId": "j1",
            "status": "failed",
            "progress": -3,
            "error": {"message": "scrape blocked"}
        }))
        .unwrap();
        assert_eq!(nested.progress, 0);
        assert_eq!(nested.error.as_deref(), Some("scrape blocked"));

        let flat: JobRecord = serde_json::from_value(json!({
            "jobId": "j1",
            "status": "failed",
            "error": "boom",
            "progress": null
        }))
        .unwrap();
        assert_eq!(flat.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_kind_paths() {
        assert_eq!(JobKind::ContentGeneration.path(), "/api/v1/jobs/content-generation");
        assert_eq!("website-analysis".parse::<JobKind>(), Ok(JobKind::WebsiteAnalysis));
        assert!("blog".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_tracker_lifecycle() {
        let tracker = JobTracker::new();
        assert_eq!(tracker.observe(&record(JobStatus::Queued)), Observation::New);
        assert_eq!(tracker.observe(&record(JobStatus::Running)), Observation::Updated);
        assert_eq!(tracker.observe(&record(JobStatus::Queued)), Observation::Regressed);
        assert_eq!(tracker.get(&JobId::new("j1")).unwrap().status, JobStatus::Running);

        assert_eq!(tracker.observe(&record(JobStatus::Succeeded)), Observation::Finished);
        assert!(tracker.is_empty());
    }
}
