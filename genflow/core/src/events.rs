//! Stream Event Vocabulary
//!
//! The closed set of named events a generation stream can deliver, and the
//! decoding from raw SSE frames into [`StreamEvent`]s.
//!
//! Two framings reach the same vocabulary:
//!
//! ```text
//! event: content-chunk            event: message   (or no event line)
//! data: {"content":"Hello "}      data: {"type":"content-chunk","data":{"content":"Hello "}}
//! ```
//!
//! Both decode to `StreamEvent { kind: ContentChunk, .. }`, so handlers never
//! learn which framing the backend used.
//!
//! `StreamEventKind` is matched exhaustively throughout the crate; adding a
//! variant fails to compile until every consumer handles it. The wire names
//! are pinned by `tests/fixtures/stream_events.json`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ClientError;
use crate::transport::SseFrame;

/// Named events a generation stream can deliver
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamEventKind {
    /// Server acknowledged the connection
    Connected,
    /// A slice of generated content
    ContentChunk,
    /// One audience segment finished
    AudienceComplete,
    /// One topic finished
    TopicComplete,
    /// Image generation for a topic started
    TopicImageStart,
    /// Image generation for a topic finished
    TopicImageComplete,
    /// Search queries were extracted from the source material
    QueriesExtracted,
    /// The operation finished successfully
    Complete,
    /// The operation failed
    Error,
}

impl StreamEventKind {
    /// Every kind, in declaration order
    pub const ALL: [Self; 9] = [
        Self::Connected,
        Self::ContentChunk,
        Self::AudienceComplete,
        Self::TopicComplete,
        Self::TopicImageStart,
        Self::TopicImageComplete,
        Self::QueriesExtracted,
        Self::Complete,
        Self::Error,
    ];

    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::ContentChunk => "content-chunk",
            Self::AudienceComplete => "audience-complete",
            Self::TopicComplete => "topic-complete",
            Self::TopicImageStart => "topic-image-start",
            Self::TopicImageComplete => "topic-image-complete",
            Self::QueriesExtracted => "queries-extracted",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// Look up a kind by wire name
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Whether this event ends the connection
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl std::fmt::Display for StreamEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payload: parsed JSON, or the raw text of a pure content stream
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// JSON payload
    Json(Value),
    /// Raw text passthrough
    Text(String),
}

impl Payload {
    /// Parse frame data
    ///
    /// Data that looks like a JSON object or array must parse. A JSON string
    /// is unquoted; every other scalar (`42`, `true`, bare words) passes
    /// through as the raw text, so a token like `42` is never lost.
    ///
    /// # Errors
    ///
    /// Returns the parse error for malformed JSON objects/arrays.
    pub fn parse(data: &str) -> Result<Self, serde_json::Error> {
        let trimmed = data.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return serde_json::from_str(data).map(Self::Json);
        }
        Ok(match serde_json::from_str::<Value>(data) {
            Ok(Value::String(text)) => Self::Text(text),
            _ => Self::Text(data.to_string()),
        })
    }

    /// Wrap an already-decoded value
    ///
    /// Follows [`Payload::parse`]: numbers and booleans become their text.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => Self::Text(text),
            Value::Number(_) | Value::Bool(_) => Self::Text(value.to_string()),
            other => Self::Json(other),
        }
    }

    /// Textual content: the `content` field, or the raw text
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Json(Value::String(text)) | Self::Text(text) => Some(text),
            Self::Json(value) => value.get("content").and_then(Value::as_str),
        }
    }

    /// A string field of a JSON object payload
    #[must_use]
    pub fn str_field(&self, name: &str) -> Option<&str> {
        match self {
            Self::Json(value) => value.get(name).and_then(Value::as_str),
            Self::Text(_) => None,
        }
    }

    /// The payload as a JSON value
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Json(value) => value.clone(),
            Self::Text(text) => Value::String(text.clone()),
        }
    }
}

/// One decoded stream event
#[derive(Clone, Debug, PartialEq)]
pub struct StreamEvent {
    /// Event kind
    pub kind: StreamEventKind,
    /// Event payload
    pub payload: Payload,
}

impl StreamEvent {
    /// Create an event
    #[must_use]
    pub fn new(kind: StreamEventKind, payload: Payload) -> Self {
        Self { kind, payload }
    }

    /// The synthesized `error` event for a connection-level failure
    #[must_use]
    pub fn from_error(error: &ClientError) -> Self {
        let (message, code) = match error {
            ClientError::Backend { message, code, .. } => {
                (message.clone(), code.clone().unwrap_or_else(|| error.code().to_string()))
            }
            ClientError::Transport(_) => ("Connection failed".to_string(), error.code().to_string()),
            other => (other.to_string(), other.code().to_string()),
        };
        Self::new(
            StreamEventKind::Error,
            Payload::Json(json!({ "message": message, "code": code })),
        )
    }

    /// Interpret an `error` event as a backend error
    #[must_use]
    pub fn to_error(&self) -> Option<ClientError> {
        if self.kind != StreamEventKind::Error {
            return None;
        }
        let message = self
            .payload
            .str_field("message")
            .or_else(|| self.payload.str_field("error"))
            .or_else(|| match &self.payload {
                Payload::Text(text) => Some(text.as_str()),
                Payload::Json(_) => None,
            })
            .unwrap_or("stream error");
        Some(ClientError::backend(
            message,
            self.payload.str_field("code").map(str::to_string),
        ))
    }
}

/// Why a frame could not be turned into an event
#[derive(Debug, PartialEq, Eq)]
pub enum FrameDecodeError {
    /// Payload looked like JSON but did not parse
    MalformedPayload(String),
    /// Untyped frame that is not a `{type, data}` envelope
    MalformedEnvelope(String),
}

impl std::fmt::Display for FrameDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedPayload(e) => write!(f, "malformed payload: {e}"),
            Self::MalformedEnvelope(e) => write!(f, "malformed envelope: {e}"),
        }
    }
}

impl std::error::Error for FrameDecodeError {}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Decode a raw frame
///
/// `Ok(None)` means the frame is well-formed but names an event outside the
/// vocabulary; callers ignore it.
///
/// # Errors
///
/// [`FrameDecodeError`] for a frame that should be logged and skipped.
pub fn decode_frame(frame: &SseFrame) -> Result<Option<StreamEvent>, FrameDecodeError> {
    if frame.is_untyped() {
        let envelope: Envelope = serde_json::from_str(&frame.data)
            .map_err(|e| FrameDecodeError::MalformedEnvelope(e.to_string()))?;
        return Ok(StreamEventKind::parse(&envelope.kind)
            .map(|kind| StreamEvent::new(kind, Payload::from_value(envelope.data))));
    }

    let Some(kind) = StreamEventKind::parse(&frame.event) else {
        return Ok(None);
    };
    let payload =
        Payload::parse(&frame.data).map_err(|e| FrameDecodeError::MalformedPayload(e.to_string()))?;
    Ok(Some(StreamEvent::new(kind, payload)))
}
