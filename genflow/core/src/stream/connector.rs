//! Stream Connector Implementation
//!
//! Opens one SSE connection per operation and feeds decoded events to a
//! single handler, in delivery order, from a spawned task.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use reqwest::Url;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::connection::{ConnectionStatus, StreamConnection};
use crate::error::ClientError;
use crate::events::{decode_frame, Payload, StreamEvent, StreamEventKind};
use crate::transport::{strip_query, HttpTransport, SseError, SseStream};

// ============================================================================
// Handler and Options
// ============================================================================

/// Receives the events of one connection
///
/// Implemented for every `FnMut(StreamEvent) + Send` closure.
pub trait StreamHandler: Send + 'static {
    /// Handle one event
    fn on_event(&mut self, event: StreamEvent);
}

impl<F> StreamHandler for F
where
    F: FnMut(StreamEvent) + Send + 'static,
{
    fn on_event(&mut self, event: StreamEvent) {
        self(event);
    }
}

/// Per-connection options
#[derive(Clone, Debug, Default)]
pub struct ConnectOptions {
    /// Use this URL instead of `{base}/api/v1/stream/{id}`
    pub stream_url: Option<String>,
    /// Override the configured idle timeout
    pub idle_timeout: Option<Duration>,
}

impl ConnectOptions {
    /// Connect to a caller-supplied URL
    #[must_use]
    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = Some(url.into());
        self
    }

    /// Override the idle timeout
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }
}

/// How a connection ended
#[derive(Clone, Debug, PartialEq)]
pub enum StreamOutcome {
    /// A `complete` event arrived
    Completed(Payload),
    /// An `error` event arrived or the transport failed
    Failed(ClientError),
    /// The caller closed the connection
    Closed,
}

// ============================================================================
// Shared Connection State
// ============================================================================

struct ConnectionShared {
    connection: Mutex<StreamConnection>,
    cancel: CancellationToken,
    /// Held while a handler runs; `close()` takes it too, so once `close()`
    /// returns no handler is running or will start. Reentrant so a handler
    /// may close its own connection.
    delivery: ReentrantMutex<()>,
}

impl ConnectionShared {
    fn advance(&self, status: ConnectionStatus) {
        let mut connection = self.connection.lock();
        if connection.advance(status) {
            tracing::debug!(
                connection_id = %connection.connection_id,
                %status,
                "Connection status changed"
            );
        }
    }

    fn deliver<H: StreamHandler>(&self, handler: &mut H, event: StreamEvent) -> bool {
        let _guard = self.delivery.lock();
        if self.cancel.is_cancelled() {
            return false;
        }
        handler.on_event(event);
        true
    }

    fn fail<H: StreamHandler>(&self, handler: &mut H, error: ClientError) -> StreamOutcome {
        if self.cancel.is_cancelled() {
            return StreamOutcome::Closed;
        }
        self.advance(ConnectionStatus::Errored);
        tracing::warn!(
            connection_id = %self.connection.lock().connection_id,
            error = %error,
            "Stream connection failed"
        );
        if self.deliver(handler, StreamEvent::from_error(&error)) {
            StreamOutcome::Failed(error)
        } else {
            StreamOutcome::Closed
        }
    }
}

// ============================================================================
// Stream Handle
// ============================================================================

/// Handle to a live connection
///
/// Dropping the handle closes the connection.
pub struct StreamHandle {
    shared: Arc<ConnectionShared>,
    task: Option<JoinHandle<StreamOutcome>>,
}

impl StreamHandle {
    /// Close the connection; idempotent
    ///
    /// Once this returns, the handler will not be invoked again.
    pub fn close(&self) {
        let _guard = self.shared.delivery.lock();
        if self.shared.cancel.is_cancelled() {
            return;
        }
        self.shared.cancel.cancel();
        self.shared.advance(ConnectionStatus::Closed);
        tracing::debug!(
            connection_id = %self.shared.connection.lock().connection_id,
            "Stream closed by caller"
        );
    }

    /// Snapshot of the connection record
    #[must_use]
    pub fn connection(&self) -> StreamConnection {
        self.shared.connection.lock().clone()
    }

    /// Current lifecycle status
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.shared.connection.lock().status
    }

    /// Whether `close()` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Wait for the connection to end
    pub async fn wait(mut self) -> StreamOutcome {
        let Some(task) = self.task.take() else {
            return StreamOutcome::Closed;
        };
        match task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => StreamOutcome::Closed,
            Err(e) => StreamOutcome::Failed(ClientError::Transport(format!(
                "stream task failed: {e}"
            ))),
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let connection = self.connection();
        f.debug_struct("StreamHandle")
            .field("connection_id", &connection.connection_id)
            .field("status", &connection.status)
            .finish()
    }
}

// ============================================================================
// Stream Connector
// ============================================================================

/// Opens generation streams
#[derive(Clone, Debug)]
pub struct StreamConnector {
    http: HttpTransport,
    idle_timeout: Duration,
}

impl StreamConnector {
    /// Create a connector sharing the REST client's origin and identity
    #[must_use]
    pub fn new(http: HttpTransport, idle_timeout: Duration) -> Self {
        Self { http, idle_timeout }
    }

    /// Build the stream URL for a connection
    ///
    /// The identity goes into the query string unless the supplied URL
    /// already carries a `token` or `sessionId` parameter.
    ///
    /// # Errors
    ///
    /// [`ClientError::Transport`] if the URL cannot be parsed.
    pub fn stream_url(
        &self,
        connection_id: &str,
        supplied: Option<&str>,
    ) -> Result<String, ClientError> {
        let invalid = |e: String| ClientError::Transport(format!("invalid stream url: {e}"));

        let mut url = match supplied {
            Some(raw) => Url::parse(raw).map_err(|e| invalid(e.to_string()))?,
            None => {
                let mut url = Url::parse(&self.http.base_url().join("/api/v1/stream"))
                    .map_err(|e| invalid(e.to_string()))?;
                url.path_segments_mut()
                    .map_err(|()| invalid("base url cannot carry a path".to_string()))?
                    .push(connection_id);
                url
            }
        };

        let has_identity = url
            .query_pairs()
            .any(|(key, _)| key == "token" || key == "sessionId");
        if !has_identity {
            let identity = self.http.identity().current();
            let (key, value) = identity.query_pair();
            url.query_pairs_mut().append_pair(key, value);
        }
        Ok(url.to_string())
    }

    /// Open a connection and start delivering events to `handler`
    ///
    /// Must be called from within a tokio runtime. Events are delivered in
    /// order; at most one of `complete`/`error` is delivered, after which the
    /// connection is finished. A frame that fails to decode is logged and
    /// skipped.
    pub fn connect<H: StreamHandler>(
        &self,
        connection_id: &str,
        handler: H,
        options: ConnectOptions,
    ) -> StreamHandle {
        let url = self.stream_url(connection_id, options.stream_url.as_deref());
        let shared = Arc::new(ConnectionShared {
            connection: Mutex::new(StreamConnection::new(
                connection_id,
                url.as_deref().unwrap_or_default(),
            )),
            cancel: CancellationToken::new(),
            delivery: ReentrantMutex::new(()),
        });

        let http = self.http.clone();
        let idle_timeout = options.idle_timeout.unwrap_or(self.idle_timeout);
        let task_shared = shared.clone();
        tracing::info!(
            connection_id,
            url = url.as_deref().map(strip_query).unwrap_or_default(),
            "Opening stream"
        );

        let task = tokio::spawn(async move {
            let mut handler = handler;
            let url = match url {
                Ok(url) => url,
                Err(e) => return task_shared.fail(&mut handler, e),
            };
            let open = SseStream::open(
                http.client(),
                &url,
                http.identity(),
                http.request_timeout(),
                idle_timeout,
            );
            run_connection(&task_shared, &mut handler, open).await
        });

        StreamHandle {
            shared,
            task: Some(task),
        }
    }
}

async fn run_connection<H, F>(shared: &ConnectionShared, handler: &mut H, open: F) -> StreamOutcome
where
    H: StreamHandler,
    F: std::future::Future<Output = Result<SseStream, ClientError>>,
{
    let cancel = shared.cancel.clone();

    let mut stream = tokio::select! {
        biased;
        () = cancel.cancelled() => return StreamOutcome::Closed,
        opened = open => match opened {
            Ok(stream) => stream,
            Err(e) => return shared.fail(handler, e),
        },
    };
    shared.advance(ConnectionStatus::Open);

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return StreamOutcome::Closed,
            next = stream.next_frame() => next,
        };

        let frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                return shared.fail(
                    handler,
                    ClientError::Transport("stream ended before completion".to_string()),
                )
            }
            Err(SseError::Malformed(reason)) => {
                tracing::warn!(url = stream.display_url(), %reason, "Skipping undecodable frame");
                continue;
            }
            Err(SseError::Fatal(e)) => return shared.fail(handler, e),
        };

        let event = match decode_frame(&frame) {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::debug!(event = %frame.event, "Ignoring event outside the vocabulary");
                continue;
            }
            Err(e) => {
                tracing::warn!(event = %frame.event, error = %e, "Skipping malformed event");
                continue;
            }
        };

        let outcome = match event.kind {
            StreamEventKind::Complete => {
                shared.advance(ConnectionStatus::Closed);
                Some(StreamOutcome::Completed(event.payload.clone()))
            }
            StreamEventKind::Error => {
                shared.advance(ConnectionStatus::Errored);
                event.to_error().map(StreamOutcome::Failed)
            }
            StreamEventKind::Connected
            | StreamEventKind::ContentChunk
            | StreamEventKind::AudienceComplete
            | StreamEventKind::TopicComplete
            | StreamEventKind::TopicImageStart
            | StreamEventKind::TopicImageComplete
            | StreamEventKind::QueriesExtracted => None,
        };

        if !shared.deliver(handler, event) {
            return StreamOutcome::Closed;
        }
        if let Some(outcome) = outcome {
            return outcome;
        }
    }
}
