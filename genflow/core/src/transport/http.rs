//! Timeout-Bounded REST Client
//!
//! Thin wrapper over `reqwest` that every REST call in the crate goes through.
//! It owns three cross-cutting rules so no call site has to repeat them:
//!
//! - identity projection (bearer header or `x-session-id`)
//! - an explicit per-request timeout, reported as [`ClientError::Timeout`]
//! - 401 handling: clear credentials, fire the logout hook once, fail with
//!   [`ClientError::Unauthorized`]

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::{BaseUrl, ClientConfig};
use crate::error::ClientError;
use crate::identity::IdentityProvider;

/// Connect timeout shared by REST calls and stream opens
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared REST client bound to one backend origin and one identity provider
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: BaseUrl,
    identity: Arc<IdentityProvider>,
    request_timeout: Duration,
    long_request_timeout: Duration,
}

impl HttpTransport {
    /// Build a transport from config
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the TLS backend cannot be
    /// initialized.
    pub fn new(config: &ClientConfig, identity: Arc<IdentityProvider>) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            identity,
            request_timeout: config.request_timeout,
            long_request_timeout: config.long_request_timeout,
        })
    }

    /// Underlying reqwest client (shared with the stream transport)
    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Backend origin
    #[must_use]
    pub fn base_url(&self) -> &BaseUrl {
        &self.base_url
    }

    /// Identity provider
    #[must_use]
    pub fn identity(&self) -> &Arc<IdentityProvider> {
        &self.identity
    }

    /// Default request timeout
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Timeout for long-running narration/content endpoints
    #[must_use]
    pub fn long_request_timeout(&self) -> Duration {
        self.long_request_timeout
    }

    /// Path under the base URL built from segments
    ///
    /// Each segment is percent-encoded on its own, so an id containing `/`
    /// or `?` stays a single segment.
    ///
    /// # Errors
    ///
    /// [`ClientError::Transport`] if the base URL cannot carry a path.
    pub fn segment_path(&self, segments: &[&str]) -> Result<String, ClientError> {
        let invalid = |e: String| ClientError::Transport(format!("invalid request path: {e}"));

        let mut url = Url::parse(self.base_url.as_str()).map_err(|e| invalid(e.to_string()))?;
        let prefix_len = url.path().trim_end_matches('/').len();
        url.path_segments_mut()
            .map_err(|()| invalid("base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url.path()[prefix_len..].to_string())
    }

    /// GET and decode JSON
    ///
    /// # Errors
    ///
    /// Any [`ClientError`]; a 404 is a [`ClientError::Backend`].
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self
            .send(Method::GET, path, None, self.request_timeout)
            .await?;
        decode(response, self.request_timeout).await
    }

    /// GET and decode JSON, treating 404 as "no data"
    ///
    /// # Errors
    ///
    /// Any [`ClientError`] except a 404, which yields `Ok(None)`.
    pub async fn get_optional_json<T: DeserializeOwned>(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<Option<T>, ClientError> {
        match self.send(Method::GET, path, None, timeout).await {
            Ok(response) => decode(response, timeout).await.map(Some),
            Err(ClientError::Backend {
                status: Some(404), ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// POST a JSON body and decode the JSON response
    ///
    /// # Errors
    ///
    /// Any [`ClientError`].
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body).map_err(|e| ClientError::Decode(e.to_string()))?;
        let response = self
            .send(Method::POST, path, Some(&body), self.request_timeout)
            .await?;
        decode(response, self.request_timeout).await
    }

    /// Issue a request and return the successful response
    ///
    /// Non-2xx statuses are converted into errors here so callers only ever
    /// see success bodies.
    ///
    /// # Errors
    ///
    /// [`ClientError::Unauthorized`] on 401, [`ClientError::Backend`] on other
    /// non-2xx statuses, [`ClientError::Timeout`] or
    /// [`ClientError::Transport`] when the request itself fails.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<Response, ClientError> {
        let response = self.execute(method, path, body, timeout).await?;
        check_status(response, &self.identity, timeout).await
    }

    /// Like [`send`](Self::send), but a 401 leaves the session alone
    ///
    /// For background calls whose failure must not sign the user out.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send); a 401 is still [`ClientError::Unauthorized`].
    pub async fn send_detached(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<Response, ClientError> {
        let response = self.execute(method, path, body, timeout).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized);
        }
        check_status(response, &self.identity, timeout).await
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<Response, ClientError> {
        let url = self.base_url.join(path);
        let identity = self.identity.current();

        let mut request = identity
            .apply(self.client.request(method.clone(), &url))
            .timeout(timeout);
        if let Some(body) = body {
            request = request.json(body);
        }

        tracing::debug!(%method, %url, identity = identity.mode(), "Sending request");
        request
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(&e, timeout))
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// Convert a non-2xx response into the matching error
pub(crate) async fn check_status(
    response: Response,
    identity: &IdentityProvider,
    timeout: Duration,
) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        identity.handle_unauthorized();
        return Err(ClientError::Unauthorized);
    }

    let body = response
        .text()
        .await
        .map_err(|e| ClientError::from_reqwest(&e, timeout))?;
    Err(backend_error(status, &body))
}

/// Build a backend error from a non-2xx body, JSON or not
pub(crate) fn backend_error(status: StatusCode, body: &str) -> ClientError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let field = |name: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let message = field("message")
        .or_else(|| field("error"))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });

    ClientError::Backend {
        message,
        code: field("code"),
        status: Some(status.as_u16()),
    }
}

async fn decode<T: DeserializeOwned>(response: Response, timeout: Duration) -> Result<T, ClientError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ClientError::from_reqwest(&e, timeout))?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
}
