//! Local stand-ins for the control API and the Jetstream endpoint.

#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::SinkExt;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

pub const API_KEY: &str = "test-key";

/// Recorded state of the mock control API.
#[derive(Clone, Default)]
pub struct MockApi {
    pub authors: Arc<Mutex<Value>>,
    pub triggers: Arc<Mutex<Vec<Value>>>,
    pub platforms: Arc<Mutex<Vec<String>>>,
}

impl MockApi {
    pub fn with_authors(authors: Value) -> Self {
        let api = Self::default();
        *api.authors.lock().unwrap() = authors;
        api
    }

    pub fn triggers(&self) -> Vec<Value> {
        self.triggers.lock().unwrap().clone()
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(|value| value == format!("Bearer {}", API_KEY))
        .unwrap_or(false)
}

async fn authors(
    State(api): State<MockApi>,
    Path(platform): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    if !authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    api.platforms.lock().unwrap().push(platform);
    Ok(Json(api.authors.lock().unwrap().clone()))
}

async fn trigger(
    State(api): State<MockApi>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    api.triggers.lock().unwrap().push(body);
    StatusCode::ACCEPTED
}

/// Router implementing both control API endpoints under `/api/`.
pub fn control_api_router(api: MockApi) -> Router {
    Router::new()
        .route("/api/authors/:platform", get(authors))
        .route("/api/process-tweet/trigger-workflow", post(trigger))
        .with_state(api)
}

/// Serve `router` on an ephemeral port and return its `/api/` base URL.
pub async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}/api/", addr)
}

/// How the mock stream ends a session.
pub enum Ending {
    /// Send a close frame
    Close,
    /// Drop the TCP connection without a closing handshake
    Reset,
}

/// Accept one websocket connection, send `frames`, then end the session.
///
/// Returns the `ws://` URL and a handle resolving to the request URI the
/// client used.
pub async fn serve_stream(
    frames: Vec<Message>,
    ending: Ending,
) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let uri = Arc::new(Mutex::new(String::new()));
        let seen = uri.clone();
        let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            *seen.lock().unwrap() = request.uri().to_string();
            Ok(response)
        };
        let mut socket = tokio_tungstenite::accept_hdr_async(tcp, callback)
            .await
            .unwrap();

        for frame in frames {
            socket.send(frame).await.unwrap();
        }

        match ending {
            Ending::Close => {
                let _ = socket.close(None).await;
                // Let the client read the close frame before the socket drops
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ending::Reset => drop(socket),
        }

        let uri = uri.lock().unwrap().clone();
        uri
    });

    (format!("ws://{}/subscribe", addr), handle)
}

/// Poll `check` until it returns true or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
