//! One-Way Event Stream Transport
//!
//! Opens a `text/event-stream` response and yields raw frames. Framing is
//! delegated to `eventsource-stream`; this layer adds what the connector
//! needs on top:
//!
//! - open-status mapping (401 → logout hook, 404/501 → unsupported)
//! - an idle timeout between frames, reported as [`ClientError::Timeout`]
//! - a split between per-frame faults (skip and continue) and transport
//!   faults (the connection is gone)
//!
//! There is no reconnect. A stream that ends is over.

use std::time::Duration;

use eventsource_stream::{EventStreamError, Eventsource};
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::StatusCode;

use crate::error::ClientError;
use crate::identity::IdentityProvider;
use crate::transport::http::check_status;

/// Event name the SSE format assigns to frames without an `event:` line
pub const DEFAULT_EVENT: &str = "message";

/// A single decoded SSE frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseFrame {
    /// Event name (`message` when the server sent none)
    pub event: String,
    /// Raw data lines joined with `\n`
    pub data: String,
    /// Last event id, if the server sent one
    pub id: Option<String>,
}

impl SseFrame {
    /// Whether this frame is an untyped `message` envelope
    #[must_use]
    pub fn is_untyped(&self) -> bool {
        self.event.is_empty() || self.event == DEFAULT_EVENT
    }
}

/// Why reading the next frame failed
#[derive(Debug)]
pub enum SseError {
    /// One frame could not be decoded; the stream is still usable
    Malformed(String),
    /// The stream is gone
    Fatal(ClientError),
}

type FrameStream = BoxStream<'static, Result<eventsource_stream::Event, EventStreamError<reqwest::Error>>>;

/// An open event stream
pub struct SseStream {
    url: String,
    frames: FrameStream,
    idle_timeout: Duration,
}

impl SseStream {
    /// Open a stream
    ///
    /// Identity is expected to be in `url` already; streams cannot carry the
    /// REST identity headers.
    ///
    /// # Errors
    ///
    /// [`ClientError::Unauthorized`] on 401, [`ClientError::Unsupported`] on
    /// 404/501, [`ClientError::Timeout`] if headers do not arrive within
    /// `open_timeout`, [`ClientError::Transport`] otherwise.
    pub async fn open(
        client: &reqwest::Client,
        url: &str,
        identity: &IdentityProvider,
        open_timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let request = client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        let response = tokio::time::timeout(open_timeout, request.send())
            .await
            .map_err(|_| ClientError::Timeout(open_timeout))?
            .map_err(|e| ClientError::from_reqwest(&e, open_timeout))?;

        if matches!(
            response.status(),
            StatusCode::NOT_FOUND | StatusCode::NOT_IMPLEMENTED
        ) {
            return Err(ClientError::Unsupported(strip_query(url).to_string()));
        }
        let response = check_status(response, identity, open_timeout).await?;

        tracing::debug!(url = strip_query(url), "Event stream opened");
        Ok(Self {
            url: url.to_string(),
            frames: response.bytes_stream().eventsource().boxed(),
            idle_timeout,
        })
    }

    /// Wait for the next frame
    ///
    /// `Ok(None)` means the server closed the stream.
    ///
    /// # Errors
    ///
    /// [`SseError::Malformed`] for a single bad frame, [`SseError::Fatal`]
    /// for transport failure or idle timeout.
    pub async fn next_frame(&mut self) -> Result<Option<SseFrame>, SseError> {
        let next = tokio::time::timeout(self.idle_timeout, self.frames.next())
            .await
            .map_err(|_| SseError::Fatal(ClientError::Timeout(self.idle_timeout)))?;

        match next {
            None => Ok(None),
            Some(Ok(event)) => Ok(Some(SseFrame {
                event: event.event,
                data: event.data,
                id: (!event.id.is_empty()).then_some(event.id),
            })),
            Some(Err(EventStreamError::Transport(e))) => Err(SseError::Fatal(
                ClientError::from_reqwest(&e, self.idle_timeout),
            )),
            Some(Err(e)) => Err(SseError::Malformed(e.to_string())),
        }
    }

    /// URL without its query string (which carries credentials)
    #[must_use]
    pub fn display_url(&self) -> &str {
        strip_query(&self.url)
    }
}

/// Drop the query string so tokens never reach the logs
#[must_use]
pub fn strip_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_query() {
        assert_eq!(
            strip_query("http://x/api/v1/stream/c1?token=secret"),
            "http://x/api/v1/stream/c1"
        );
        assert_eq!(strip_query("http://x/a"), "http://x/a");
    }

    #[test]
    fn test_untyped_frame() {
        let frame = SseFrame {
            event: DEFAULT_EVENT.to_string(),
            data: "{}".to_string(),
            id: None,
        };
        assert!(frame.is_untyped());
        let named = SseFrame {
            event: "complete".to_string(),
            ..frame
        };
        assert!(!named.is_untyped());
    }
}
