//! In-process HTTP endpoints: one that records multipart uploads and raw
//! TCP ones that misbehave on purpose.

use axum::extract::{Multipart, State};
use axum::http::header::{AUTHORIZATION, USER_AGENT};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::routing::post;
use axum::Router;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Clone)]
pub struct ReceivedPart {
    pub name: Option<String>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub user_agent: Option<String>,
    pub authorization: Option<String>,
    pub parts: Vec<ReceivedPart>,
}

struct EndpointState {
    status: StatusCode,
    body: &'static str,
    received: Mutex<Vec<ReceivedRequest>>,
}

pub struct MockEndpoint {
    pub url: String,
    state: Arc<EndpointState>,
}

impl MockEndpoint {
    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.state.received.lock().unwrap().clone()
    }
}

async fn observe(
    State(state): State<Arc<EndpointState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> (StatusCode, &'static str) {
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let mut parts = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.unwrap().to_vec();
        parts.push(ReceivedPart {
            name,
            file_name,
            content_type,
            data,
        });
    }

    state.received.lock().unwrap().push(ReceivedRequest {
        user_agent: header(USER_AGENT),
        authorization: header(AUTHORIZATION),
        parts,
    });
    (state.status, state.body)
}

/// Serve `POST /api/observation` on an ephemeral localhost port, answering
/// every request with `status` and `body`.
pub async fn spawn_endpoint(status: StatusCode, body: &'static str) -> MockEndpoint {
    let state = Arc::new(EndpointState {
        status,
        body,
        received: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/api/observation", post(observe))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockEndpoint {
        url: format!("http://{addr}/api/observation"),
        state,
    }
}

/// A localhost URL whose port was free a moment ago, so connecting is refused.
pub async fn unreachable_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/api/observation")
}

/// A raw TCP endpoint that reads the request, writes `response` verbatim and
/// then holds the connection open without sending anything more.
pub async fn stalling_endpoint(response: &'static [u8]) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = vec![0u8; 64 * 1024];
        let _ = socket.read(&mut request).await;
        let _ = socket.write_all(response).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    });
    format!("http://{addr}/api/observation")
}
