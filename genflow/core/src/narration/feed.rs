//! Narration Feeds
//!
//! Two sources for the same chunk/complete contract:
//!
//! - [`LiveNarration`]: the SSE narration endpoint, one per narration kind
//! - [`LegacyNarration`]: polls the stored narrative until it is ready, then
//!   replays it token by token so the surface renders it the same way
//!
//! Either feed reports "the backend has no narration here" as
//! [`ClientError::NarrationUnavailable`], which the controller turns into a
//! silent skip.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::NarrationConfig;
use crate::error::ClientError;
use crate::events::Payload;
use crate::operation::{AsyncOperation, NarrationUpdate};
use crate::transport::{strip_query, HttpTransport, SseError, SseFrame, SseStream, TransportKind};

// ============================================================================
// Request Types
// ============================================================================

/// What is being narrated
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrationKind {
    /// Audience discovery
    Audience,
    /// Topic selection
    Topic,
    /// Content drafting
    Content,
}

impl NarrationKind {
    /// Wire name, also the event name prefix
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audience => "audience",
            Self::Topic => "topic",
            Self::Content => "content",
        }
    }
}

impl std::str::FromStr for NarrationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "audience" => Ok(Self::Audience),
            "topic" => Ok(Self::Topic),
            "content" => Ok(Self::Content),
            other => Err(format!(
                "unknown narration kind {other:?} (expected audience, topic or content)"
            )),
        }
    }
}

impl std::fmt::Display for NarrationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a narration request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NarrationRequest {
    /// Narration kind
    pub kind: NarrationKind,
    /// Organization whose analysis is narrated
    pub organization_id: String,
    /// Audience the user picked, if any
    pub selected_audience: Option<String>,
    /// Topic the user picked, if any
    pub selected_topic: Option<String>,
    /// Narration shown so far, so the backend can continue it
    pub previous_narration: Option<String>,
}

impl NarrationRequest {
    /// Narrate `kind` for an organization
    pub fn new(kind: NarrationKind, organization_id: impl Into<String>) -> Self {
        Self {
            kind,
            organization_id: organization_id.into(),
            selected_audience: None,
            selected_topic: None,
            previous_narration: None,
        }
    }

    /// Set the selected audience
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.selected_audience = Some(audience.into());
        self
    }

    /// Set the selected topic
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.selected_topic = Some(topic.into());
        self
    }

    /// Set the narration shown so far
    #[must_use]
    pub fn with_previous(mut self, narration: impl Into<String>) -> Self {
        self.previous_narration = Some(narration.into());
        self
    }

    fn query(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = vec![("organizationId", self.organization_id.as_str())];
        let optional = [
            ("selectedAudience", &self.selected_audience),
            ("selectedTopic", &self.selected_topic),
            ("previousNarration", &self.previous_narration),
        ];
        pairs.extend(
            optional
                .into_iter()
                .filter_map(|(key, value)| value.as_deref().map(|v| (key, v))),
        );
        pairs
    }
}

// ============================================================================
// Live Narration
// ============================================================================

/// Decoded narration stream event
#[derive(Clone, Debug, PartialEq)]
enum NarrationEvent {
    Chunk(String),
    Complete(Option<String>),
    BusinessProfile(Value),
    Failed(ClientError),
}

fn text_of(payload: &Payload, fields: &[&str]) -> Option<String> {
    match payload {
        Payload::Text(text) => Some(text.clone()),
        Payload::Json(Value::String(text)) => Some(text.clone()),
        Payload::Json(value) => fields
            .iter()
            .find_map(|field| value.get(*field).and_then(Value::as_str))
            .map(str::to_string),
    }
}

fn parse_narration_frame(kind: NarrationKind, frame: &SseFrame) -> Result<Option<NarrationEvent>, String> {
    let payload = || Payload::parse(&frame.data).map_err(|e| e.to_string());
    let prefix = kind.as_str();

    let event = match frame.event.strip_prefix(prefix) {
        Some("-chunk") => NarrationEvent::Chunk(
            text_of(&payload()?, &["chunk", "content", "text"]).unwrap_or_default(),
        ),
        Some("-complete") => {
            let text = if frame.data.trim().is_empty() {
                None
            } else {
                text_of(&payload()?, &["narrative", "content", "text"])
            };
            NarrationEvent::Complete(text)
        }
        _ if frame.event == "business-profile" => {
            NarrationEvent::BusinessProfile(payload()?.to_value())
        }
        _ if frame.event == "error" => {
            let payload = payload()?;
            let message = text_of(&payload, &["message", "error"])
                .unwrap_or_else(|| "narration failed".to_string());
            NarrationEvent::Failed(ClientError::backend(
                message,
                payload.str_field("code").map(str::to_string),
            ))
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

/// Narration from the SSE narration endpoint
#[derive(Clone, Debug)]
pub struct LiveNarration {
    http: HttpTransport,
    request: NarrationRequest,
    idle_timeout: Duration,
}

impl LiveNarration {
    /// Create a live feed
    #[must_use]
    pub fn new(http: HttpTransport, request: NarrationRequest, idle_timeout: Duration) -> Self {
        Self {
            http,
            request,
            idle_timeout,
        }
    }

    /// Stream URL, request parameters and identity included
    ///
    /// # Errors
    ///
    /// [`ClientError::Transport`] if the URL cannot be built.
    pub fn url(&self) -> Result<String, ClientError> {
        let raw = self
            .http
            .base_url()
            .join(&format!("/api/v1/analysis/narration/{}", self.request.kind));
        let mut url =
            Url::parse(&raw).map_err(|e| ClientError::Transport(format!("invalid narration url: {e}")))?;

        let identity = self.http.identity().current();
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in self.request.query() {
                query.append_pair(key, value);
            }
            let (key, value) = identity.query_pair();
            query.append_pair(key, value);
        }
        Ok(url.to_string())
    }
}

#[async_trait]
impl AsyncOperation for LiveNarration {
    type Update = NarrationUpdate;
    type Output = String;

    fn transport(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn subscribe(
        &self,
        on_update: &mut (dyn FnMut(NarrationUpdate) + Send),
        cancel: &CancellationToken,
    ) -> Result<String, ClientError> {
        let url = self.url()?;
        let open = SseStream::open(
            self.http.client(),
            &url,
            self.http.identity(),
            self.http.long_request_timeout(),
            self.idle_timeout,
        );

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ClientError::Aborted),
            opened = open => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(ClientError::Unsupported(resource)) => {
                tracing::info!(%resource, "Narration stream not offered");
                return Err(ClientError::NarrationUnavailable);
            }
            Err(e) => return Err(e),
        };
        tracing::debug!(url = strip_query(&url), kind = %self.request.kind, "Narration stream open");

        let mut narrative = String::new();
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ClientError::Aborted),
                next = stream.next_frame() => next,
            };
            let frame = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    return Err(ClientError::Transport(
                        "narration stream ended before completion".to_string(),
                    ))
                }
                Err(SseError::Malformed(reason)) => {
                    tracing::warn!(%reason, "Skipping undecodable narration frame");
                    continue;
                }
                Err(SseError::Fatal(e)) => return Err(e),
            };

            match parse_narration_frame(self.request.kind, &frame) {
                Ok(Some(NarrationEvent::Chunk(chunk))) => {
                    narrative.push_str(&chunk);
                    on_update(NarrationUpdate::Chunk(chunk));
                }
                Ok(Some(NarrationEvent::Complete(text))) => {
                    let text = text.filter(|t| !t.is_empty()).unwrap_or(narrative);
                    on_update(NarrationUpdate::Complete(text.clone()));
                    return Ok(text);
                }
                Ok(Some(NarrationEvent::BusinessProfile(profile))) => {
                    on_update(NarrationUpdate::BusinessProfile(profile));
                }
                Ok(Some(NarrationEvent::Failed(e))) => return Err(e),
                Ok(None) => tracing::debug!(event = %frame.event, "Ignoring narration event"),
                Err(reason) => {
                    tracing::warn!(event = %frame.event, %reason, "Skipping malformed narration event");
                }
            }
        }
    }
}

// ============================================================================
// Legacy Narration
// ============================================================================

#[derive(Debug, Deserialize)]
struct StoredNarrative {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    narrative: Option<String>,
}

/// Split text into tokens that concatenate back to it exactly
///
/// Each token is a word followed by the whitespace after it.
#[must_use]
pub fn split_tokens(text: &str) -> Vec<&str> {
    text.split_inclusive(char::is_whitespace).collect()
}

/// Narration from the stored narrative endpoint, replayed as a stream
#[derive(Clone, Debug)]
pub struct LegacyNarration {
    http: HttpTransport,
    organization_id: String,
    poll_interval: Duration,
    max_polls: u32,
    token_interval: Duration,
}

impl LegacyNarration {
    /// Create a legacy feed
    pub fn new(http: HttpTransport, organization_id: impl Into<String>, config: &NarrationConfig) -> Self {
        Self {
            http,
            organization_id: organization_id.into(),
            poll_interval: config.legacy_poll_interval,
            max_polls: config.legacy_max_polls,
            token_interval: config.legacy_token_interval,
        }
    }

    async fn wait_for_narrative(&self, cancel: &CancellationToken) -> Result<String, ClientError> {
        let path = self
            .http
            .segment_path(&["api", "narrative", self.organization_id.as_str()])?;

        for attempt in 1..=self.max_polls {
            let fetched = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ClientError::Aborted),
                fetched = self.http.get_optional_json::<StoredNarrative>(&path, self.http.long_request_timeout()) => fetched?,
            };
            let Some(stored) = fetched else {
                tracing::info!(organization_id = %self.organization_id, "No stored narrative endpoint for organization");
                return Err(ClientError::NarrationUnavailable);
            };
            if let Some(text) = stored.narrative.filter(|t| stored.ready && !t.is_empty()) {
                return Ok(text);
            }
            tracing::debug!(organization_id = %self.organization_id, attempt, "Narrative not ready");

            if attempt < self.max_polls {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(ClientError::Aborted),
                    () = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }
        Err(ClientError::NarrationUnavailable)
    }
}

#[async_trait]
impl AsyncOperation for LegacyNarration {
    type Update = NarrationUpdate;
    type Output = String;

    fn transport(&self) -> TransportKind {
        TransportKind::Poll
    }

    async fn subscribe(
        &self,
        on_update: &mut (dyn FnMut(NarrationUpdate) + Send),
        cancel: &CancellationToken,
    ) -> Result<String, ClientError> {
        let text = self.wait_for_narrative(cancel).await?;

        for (index, token) in split_tokens(&text).into_iter().enumerate() {
            if index > 0 {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(ClientError::Aborted),
                    () = tokio::time::sleep(self.token_interval) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(ClientError::Aborted);
            }
            on_update(NarrationUpdate::Chunk(token.to_string()));
        }
        on_update(NarrationUpdate::Complete(text.clone()));
        Ok(text)
    }
}
