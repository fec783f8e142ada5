//! Fire-and-Forget Analytics
//!
//! Product events (`job_created`, `narration_skipped`, ...) are posted in the
//! background. A failed post is logged at debug and otherwise ignored; tracking
//! never delays or fails the operation that triggered it, and a 401 from the
//! analytics endpoint does not sign the user out.

use reqwest::Method;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use crate::error::ClientError;
use crate::transport::HttpTransport;

/// Analytics endpoint
pub const TRACK_PATH: &str = "/api/v1/analytics/track";

/// One analytics event
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackEvent {
    /// Event name
    pub event: String,
    /// Free-form properties
    pub properties: Map<String, Value>,
}

impl TrackEvent {
    /// Event without properties
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            properties: Map::new(),
        }
    }

    /// Add a property
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Posts analytics events in the background
#[derive(Clone, Debug)]
pub struct Tracker {
    http: HttpTransport,
}

impl Tracker {
    /// Create a tracker
    #[must_use]
    pub fn new(http: HttpTransport) -> Self {
        Self { http }
    }

    /// Send an event without waiting for it
    ///
    /// Must be called within a tokio runtime. The returned handle is only
    /// useful to tests; callers normally drop it.
    pub fn track(&self, event: TrackEvent) -> JoinHandle<()> {
        let http = self.http.clone();
        tokio::spawn(async move {
            let result = match serde_json::to_value(&event) {
                Ok(body) => http
                    .send_detached(Method::POST, TRACK_PATH, Some(&body), http.request_timeout())
                    .await
                    .map(drop),
                Err(e) => Err(ClientError::Decode(e.to_string())),
            };
            if let Err(e) = result {
                tracing::debug!(event = %event.event, error = %e, "Analytics event dropped");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_shape() {
        let event = TrackEvent::new("job_created")
            .with("kind", "website-analysis")
            .with("attempt", 1);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "job_created", "properties": {"kind": "website-analysis", "attempt": 1}})
        );
    }
}
