//! Mock chat gateway for integration tests
//!
//! Serves the streaming chat endpoint and the instance directory with
//! scripted behavior, and counts requests so tests can assert on retry and
//! recovery traffic.

// Each test binary uses a subset of this module.
#![allow(dead_code)]

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What the mock gateway does with chat requests
pub enum GatewayBehavior {
    /// Serve these body chunks to every chat request
    Stream {
        /// Raw body chunks, e.g. `"data: {\"delta\":\"hi\"}\n\n"`
        frames: Vec<String>,
        /// Pause before each chunk
        frame_delay: Duration,
    },
    /// 404 stale-route unless the request carries `fresh_id`; the directory
    /// advertises `fresh_id`
    StaleRoute {
        fresh_id: String,
        frames: Vec<String>,
    },
    /// Every chat request is a stale route; the directory advertises an
    /// instance that is just as stale
    AlwaysStale { advertised: String },
    /// Fail every chat request with this status and body
    Fail { status: u16, body: String },
    /// Answer 200 with a body that is not a frame stream
    Garbage(String),
}

pub struct GatewayState {
    behavior: GatewayBehavior,
    pub chat_hits: AtomicUsize,
    pub instance_hits: AtomicUsize,
}

pub struct MockGateway {
    pub base_url: String,
    pub state: Arc<GatewayState>,
}

impl MockGateway {
    pub fn spawn(behavior: GatewayBehavior) -> Self {
        let state = Arc::new(GatewayState {
            behavior,
            chat_hits: AtomicUsize::new(0),
            instance_hits: AtomicUsize::new(0),
        });

        let (addr_tx, addr_rx) = std::sync::mpsc::channel();
        let server_state = state.clone();

        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async move {
                let app = Router::new()
                    .route("/v1/chat/completions", post(chat))
                    .route("/instances", get(instances))
                    .with_state(server_state);
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                addr_tx.send(listener.local_addr().unwrap()).unwrap();
                axum::serve(listener, app).await.unwrap();
            });
        });

        let addr = addr_rx.recv().unwrap();
        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn chat_hits(&self) -> usize {
        self.state.chat_hits.load(Ordering::SeqCst)
    }

    pub fn instance_hits(&self) -> usize {
        self.state.instance_hits.load(Ordering::SeqCst)
    }
}

/// Standard happy-path frames: "hi", " there", done
pub fn hello_frames() -> Vec<String> {
    vec![
        "data: {\"delta\":\"hi\"}\n\n".to_string(),
        "data: {\"delta\":\" there\"}\n\n".to_string(),
        "data: [DONE]\n\n".to_string(),
    ]
}

async fn chat(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    state.chat_hits.fetch_add(1, Ordering::SeqCst);

    match &state.behavior {
        GatewayBehavior::Stream {
            frames,
            frame_delay,
        } => stream_response(frames.clone(), *frame_delay),

        GatewayBehavior::StaleRoute { fresh_id, frames } => {
            let requested = body.get("instanceId").and_then(|v| v.as_str());
            if requested == Some(fresh_id.as_str()) {
                stream_response(frames.clone(), Duration::ZERO)
            } else {
                (StatusCode::NOT_FOUND, "Instance not found").into_response()
            }
        }

        GatewayBehavior::AlwaysStale { .. } => {
            (StatusCode::NOT_FOUND, "Instance not found").into_response()
        }

        GatewayBehavior::Fail { status, body: message } => {
            (StatusCode::from_u16(*status).unwrap(), message.clone()).into_response()
        }

        GatewayBehavior::Garbage(raw) => raw.clone().into_response(),
    }
}

fn stream_response(frames: Vec<String>, frame_delay: Duration) -> Response {
    let body = if frame_delay.is_zero() {
        let chunks: Vec<Result<String, std::io::Error>> = frames.into_iter().map(Ok).collect();
        Body::from_stream(tokio_stream::iter(chunks))
    } else {
        Body::from_stream(async_stream::stream! {
            for frame in frames {
                tokio::time::sleep(frame_delay).await;
                yield Ok::<_, std::io::Error>(frame);
            }
        })
    };

    Response::builder()
        .header("content-type", "text/event-stream")
        .body(body)
        .unwrap()
}

async fn instances(State(state): State<Arc<GatewayState>>) -> Json<serde_json::Value> {
    state.instance_hits.fetch_add(1, Ordering::SeqCst);

    let advertised = match &state.behavior {
        GatewayBehavior::StaleRoute { fresh_id, .. } => fresh_id.clone(),
        GatewayBehavior::AlwaysStale { advertised } => advertised.clone(),
        _ => "mock-instance".to_string(),
    };

    Json(serde_json::json!([{
        "id": advertised,
        "name": "mock bridge",
        "status": "connected",
        "connectedAt": "2025-11-02T09:30:00Z"
    }]))
}
