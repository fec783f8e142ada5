//! Stream connector tests against a mock SSE backend

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use genflow_core::identity::SESSION_ID_KEY;
use genflow_core::{
    ClientConfig, ClientError, ConnectOptions, ConnectionStatus, HttpTransport, IdentityProvider,
    KeyValueStore, MemoryStore, Payload, StreamConnector, StreamEvent, StreamEventKind,
    StreamOutcome,
};

// =============================================================================
// Helpers
// =============================================================================

fn connector_for(server: &MockServer) -> (Arc<IdentityProvider>, StreamConnector) {
    let store = Arc::new(MemoryStore::new());
    store.set(SESSION_ID_KEY, "s-1".to_string());
    let identity = Arc::new(IdentityProvider::new(store));
    let config = ClientConfig::with_base_url(&server.uri()).unwrap();
    let http = HttpTransport::new(&config, identity.clone()).unwrap();
    (identity, StreamConnector::new(http, Duration::from_secs(5)))
}

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

fn recorder() -> (Arc<Mutex<Vec<StreamEvent>>>, impl FnMut(StreamEvent) + Send + 'static) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    (events, move |event| sink.lock().push(event))
}

/// Serve one `connected` frame, then keep the connection open in silence
async fn stalled_stream() -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let task = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 4096];
        let _ = socket.read(&mut request).await;
        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n\
                  event: connected\ndata: {}\n\n",
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });
    (base, task)
}

async fn mount_stream(server: &MockServer, connection_id: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/stream/{connection_id}")))
        .respond_with(sse(body))
        .mount(server)
        .await;
}

// =============================================================================
// Delivery
// =============================================================================

#[tokio::test]
async fn test_chunks_accumulate_until_complete() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        "c1",
        "event: content-chunk\ndata: {\"content\":\"Hello \"}\n\n\
         event: content-chunk\ndata: {\"content\":\"world\"}\n\n\
         event: complete\ndata: {}\n\n",
    )
    .await;
    let (_, connector) = connector_for(&server);
    let (events, handler) = recorder();

    let handle = connector.connect("c1", handler, ConnectOptions::default());
    let outcome = handle.wait().await;

    assert_eq!(outcome, StreamOutcome::Completed(Payload::Json(serde_json::json!({}))));
    let events = events.lock();
    let text: String = events
        .iter()
        .filter(|e| e.kind == StreamEventKind::ContentChunk)
        .filter_map(|e| e.payload.content())
        .collect();
    assert_eq!(text, "Hello world");
    assert_eq!(events.last().map(|e| e.kind), Some(StreamEventKind::Complete));
}

#[tokio::test]
async fn test_identity_goes_in_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/stream/c1"))
        .and(query_param("sessionId", "s-1"))
        .respond_with(sse("event: complete\ndata: {}\n\n"))
        .expect(1)
        .mount(&server)
        .await;
    let (_, connector) = connector_for(&server);

    let handle = connector.connect("c1", |_event: StreamEvent| {}, ConnectOptions::default());
    assert!(matches!(handle.wait().await, StreamOutcome::Completed(_)));
}

#[tokio::test]
async fn test_nothing_after_complete() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        "c1",
        "event: complete\ndata: {}\n\n\
         event: content-chunk\ndata: late\n\n\
         event: error\ndata: {\"message\":\"late\"}\n\n",
    )
    .await;
    let (_, connector) = connector_for(&server);
    let (events, handler) = recorder();

    let handle = connector.connect("c1", handler, ConnectOptions::default());
    handle.wait().await;

    let kinds: Vec<_> = events.lock().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![StreamEventKind::Complete]);
}

#[tokio::test]
async fn test_envelope_frames_reach_the_same_handler() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        "c1",
        "data: {\"type\":\"content-chunk\",\"data\":{\"content\":\"via envelope\"}}\n\n\
         data: {\"type\":\"complete\",\"data\":{}}\n\n",
    )
    .await;
    let (_, connector) = connector_for(&server);
    let (events, handler) = recorder();

    let outcome = connector
        .connect("c1", handler, ConnectOptions::default())
        .wait()
        .await;

    assert!(matches!(outcome, StreamOutcome::Completed(_)));
    let events = events.lock();
    assert_eq!(events[0].kind, StreamEventKind::ContentChunk);
    assert_eq!(events[0].payload.content(), Some("via envelope"));
}

#[tokio::test]
async fn test_malformed_frame_is_skipped() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        "c1",
        "event: topic-complete\ndata: {\"topic\": \n\n\
         event: ping\ndata: {}\n\n\
         event: complete\ndata: {}\n\n",
    )
    .await;
    let (_, connector) = connector_for(&server);
    let (events, handler) = recorder();

    let outcome = connector
        .connect("c1", handler, ConnectOptions::default())
        .wait()
        .await;

    assert!(matches!(outcome, StreamOutcome::Completed(_)));
    let kinds: Vec<_> = events.lock().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![StreamEventKind::Complete]);
}

#[tokio::test]
async fn test_backend_error_event() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        "c1",
        "event: error\ndata: {\"message\":\"Quota exceeded\",\"code\":\"QUOTA\"}\n\n",
    )
    .await;
    let (_, connector) = connector_for(&server);

    let handle = connector.connect("c1", |_event: StreamEvent| {}, ConnectOptions::default());
    let outcome = handle.wait().await;

    assert_eq!(
        outcome,
        StreamOutcome::Failed(ClientError::backend("Quota exceeded", Some("QUOTA".to_string())))
    );
}

// =============================================================================
// Failure and Close
// =============================================================================

#[tokio::test]
async fn test_stream_ending_early_is_a_connection_failure() {
    let server = MockServer::start().await;
    mount_stream(&server, "c1", "event: content-chunk\ndata: partial\n\n").await;
    let (_, connector) = connector_for(&server);
    let (events, handler) = recorder();

    let handle = connector.connect("c1", handler, ConnectOptions::default());
    let outcome = handle.wait().await;

    assert!(matches!(outcome, StreamOutcome::Failed(ClientError::Transport(_))));
    let events = events.lock();
    let last = events.last().unwrap();
    assert_eq!(last.kind, StreamEventKind::Error);
    assert_eq!(last.payload.str_field("message"), Some("Connection failed"));
}

#[tokio::test]
async fn test_silent_stream_hits_idle_timeout() {
    let (base, server) = stalled_stream().await;
    let identity = Arc::new(IdentityProvider::new(Arc::new(MemoryStore::new())));
    let config = ClientConfig::with_base_url(&base).unwrap();
    let http = HttpTransport::new(&config, identity).unwrap();
    let connector = StreamConnector::new(http, Duration::from_secs(60));
    let (events, handler) = recorder();

    let outcome = connector
        .connect(
            "c1",
            handler,
            ConnectOptions::default().with_idle_timeout(Duration::from_millis(100)),
        )
        .wait()
        .await;
    server.abort();

    assert_eq!(
        outcome,
        StreamOutcome::Failed(ClientError::Timeout(Duration::from_millis(100)))
    );
    assert_eq!(events.lock()[0].kind, StreamEventKind::Connected);
}

#[tokio::test]
async fn test_status_ends_errored_after_failure() {
    let server = MockServer::start().await;
    mount_stream(&server, "c1", "").await;
    let (_, connector) = connector_for(&server);

    let handle = connector.connect("c1", |_event: StreamEvent| {}, ConnectOptions::default());
    for _ in 0..100 {
        if handle.status().is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(handle.status(), ConnectionStatus::Errored);
}

#[tokio::test]
async fn test_close_before_any_event_invokes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/stream/c1"))
        .respond_with(
            sse("event: content-chunk\ndata: x\n\nevent: complete\ndata: {}\n\n")
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;
    let (_, connector) = connector_for(&server);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let handle = connector.connect(
        "c1",
        move |_event: StreamEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        ConnectOptions::default(),
    );
    handle.close();
    handle.close();

    assert!(handle.is_closed());
    assert_eq!(handle.status(), ConnectionStatus::Closed);
    assert_eq!(handle.wait().await, StreamOutcome::Closed);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unauthorized_open_clears_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/stream/c1"))
        .and(query_param("token", "stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let (identity, connector) = connector_for(&server);
    identity.set_token("stale", None);
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    identity.on_unauthorized(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let outcome = connector
        .connect("c1", |_event: StreamEvent| {}, ConnectOptions::default())
        .wait()
        .await;

    assert_eq!(outcome, StreamOutcome::Failed(ClientError::Unauthorized));
    assert!(!identity.current().is_authenticated());
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_stream_is_unsupported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/stream/c1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let (_, connector) = connector_for(&server);

    let outcome = connector
        .connect("c1", |_event: StreamEvent| {}, ConnectOptions::default())
        .wait()
        .await;

    assert!(matches!(outcome, StreamOutcome::Failed(ClientError::Unsupported(_))));
}

#[tokio::test]
async fn test_supplied_url_is_used() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/custom/feed"))
        .and(query_param("token", "given"))
        .respond_with(sse("event: complete\ndata: done\n\n"))
        .expect(1)
        .mount(&server)
        .await;
    let (_, connector) = connector_for(&server);
    let url = format!("{}/custom/feed?token=given", server.uri());

    let outcome = connector
        .connect(
            "ignored",
            |_event: StreamEvent| {},
            ConnectOptions::default().with_stream_url(url),
        )
        .wait()
        .await;

    assert_eq!(outcome, StreamOutcome::Completed(Payload::Text("done".to_string())));
}
