//! Client Facade
//!
//! Wires every component from one [`ClientConfig`] and one identity store, so
//! the REST client, the stream connector, the job orchestrator and the read
//! cache all see the same identity and the same 401 handling.

use std::sync::Arc;

use serde_json::Value;

use crate::analytics::{TrackEvent, Tracker};
use crate::cache::{CachedRead, RequestCache};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::identity::IdentityProvider;
use crate::jobs::{CancelResponse, JobHandle, JobId, JobKind, JobOrchestrator, JobTracker};
use crate::narration::{NarrationController, NarrationRequest};
use crate::operation::{select_job_watch, select_narration_feed, JobWatch, NarrationFeed};
use crate::storage::{KeyValueStore, MemoryStore};
use crate::stream::{ConnectOptions, StreamConnector, StreamHandle, StreamHandler};
use crate::transport::HttpTransport;

/// Most recent website analysis of the signed-in user
pub const RECENT_ANALYSIS_PATH: &str = "/api/v1/user/recent-analysis";

/// Credit balance of the signed-in user
pub const CREDITS_PATH: &str = "/api/v1/user/credits";

/// Organization of the signed-in user
pub const CURRENT_ORGANIZATION_PATH: &str = "/api/v1/organizations/current";

/// Entry point for applications
pub struct GenflowClient {
    config: ClientConfig,
    identity: Arc<IdentityProvider>,
    http: HttpTransport,
    connector: StreamConnector,
    jobs: JobOrchestrator,
    cache: RequestCache,
    analytics: Tracker,
}

impl GenflowClient {
    /// Build a client
    ///
    /// `identity_store` holds credentials and the anonymous session id and
    /// should outlive the process; `session_store` backs the read cache.
    ///
    /// # Errors
    ///
    /// [`ClientError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        config: ClientConfig,
        identity_store: Arc<dyn KeyValueStore>,
        session_store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, ClientError> {
        let identity = Arc::new(IdentityProvider::new(identity_store));
        let http = HttpTransport::new(&config, identity.clone())?;
        let connector = StreamConnector::new(http.clone(), config.stream_idle_timeout);
        let jobs = JobOrchestrator::new(http.clone(), Arc::new(JobTracker::new()));
        let cache = RequestCache::new(http.clone(), session_store, config.cached_endpoints.clone());
        let analytics = Tracker::new(http.clone());

        tracing::debug!(
            base_url = %config.base_url,
            source = ?config.source(),
            capabilities = ?config.capabilities,
            "Client initialized"
        );
        Ok(Self {
            config,
            identity,
            http,
            connector,
            jobs,
            cache,
            analytics,
        })
    }

    /// Build a client whose stores live only as long as the process
    ///
    /// # Errors
    ///
    /// As [`GenflowClient::new`].
    pub fn in_memory(config: ClientConfig) -> Result<Self, ClientError> {
        Self::new(config, Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Identity provider shared by every component
    #[must_use]
    pub fn identity(&self) -> &Arc<IdentityProvider> {
        &self.identity
    }

    /// REST transport
    #[must_use]
    pub fn http(&self) -> &HttpTransport {
        &self.http
    }

    /// Stream connector
    #[must_use]
    pub fn streams(&self) -> &StreamConnector {
        &self.connector
    }

    /// Job orchestrator
    #[must_use]
    pub fn jobs(&self) -> &JobOrchestrator {
        &self.jobs
    }

    /// Read cache
    #[must_use]
    pub fn cache(&self) -> &RequestCache {
        &self.cache
    }

    /// Analytics tracker
    #[must_use]
    pub fn analytics(&self) -> &Tracker {
        &self.analytics
    }

    /// Open a generation stream
    pub fn connect_stream<H: StreamHandler>(
        &self,
        connection_id: &str,
        handler: H,
        options: ConnectOptions,
    ) -> StreamHandle {
        self.connector.connect(connection_id, handler, options)
    }

    /// Create a job and record it in analytics
    ///
    /// # Errors
    ///
    /// Any [`ClientError`] from the creation request.
    pub async fn create_job(&self, kind: JobKind, payload: &Value) -> Result<JobHandle, ClientError> {
        let handle = self.jobs.create_job(kind, payload).await?;
        self.analytics.track(
            TrackEvent::new("job_created")
                .with("kind", kind.as_str())
                .with("jobId", handle.job_id.as_str()),
        );
        Ok(handle)
    }

    /// Cancel a job
    ///
    /// # Errors
    ///
    /// Any [`ClientError`].
    pub async fn cancel_job(&self, job_id: &JobId) -> Result<CancelResponse, ClientError> {
        self.jobs.cancel_job(job_id).await
    }

    /// Follow a job with the transport the backend supports
    #[must_use]
    pub fn job_watch(&self, job_id: JobId) -> JobWatch {
        select_job_watch(
            self.config.capabilities,
            &self.jobs,
            &self.connector,
            &self.config,
            job_id,
        )
    }

    /// Narration feed with the transport the backend supports
    #[must_use]
    pub fn narration_feed(&self, request: NarrationRequest) -> NarrationFeed {
        select_narration_feed(self.config.capabilities, &self.http, &self.config, request)
    }

    /// Narration feed forced onto the legacy poll-and-simulate path
    #[must_use]
    pub fn legacy_narration_feed(&self, request: NarrationRequest) -> NarrationFeed {
        let mut capabilities = self.config.capabilities;
        capabilities.narration_stream = false;
        select_narration_feed(capabilities, &self.http, &self.config, request)
    }

    /// New narration controller using the configured timing
    #[must_use]
    pub fn narration_controller(&self) -> NarrationController {
        NarrationController::new(&self.config.narration)
    }

    /// Most recent analysis, deduplicated and cached
    ///
    /// # Errors
    ///
    /// Any [`ClientError`].
    pub async fn recent_analysis(&self) -> Result<CachedRead, ClientError> {
        self.cache.get(RECENT_ANALYSIS_PATH).await
    }

    /// Credit balance, deduplicated and cached
    ///
    /// # Errors
    ///
    /// Any [`ClientError`].
    pub async fn credits(&self) -> Result<CachedRead, ClientError> {
        self.cache.get(CREDITS_PATH).await
    }

    /// Current organization, deduplicated and cached
    ///
    /// # Errors
    ///
    /// Any [`ClientError`].
    pub async fn current_organization(&self) -> Result<CachedRead, ClientError> {
        self.cache.get(CURRENT_ORGANIZATION_PATH).await
    }

    /// Forget credentials and everything cached for the user
    pub fn logout(&self) {
        let dropped = self.cache.invalidate_user();
        self.identity.clear_auth();
        tracing::info!(cache_entries = dropped, "Logged out");
    }
}

impl std::fmt::Debug for GenflowClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenflowClient")
            .field("base_url", &self.config.base_url)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
