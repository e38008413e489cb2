//! In-process HTTP backend standing in for Prometheus, Lethe and Alertmanager in tests

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use parking_lot::Mutex;
use tokio::net::TcpListener;

/// A request seen by the fake backend
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub body: String,
}

/// Replies served in order; the last one repeats forever
#[derive(Debug, Clone)]
pub struct BackendReply {
    replies: Vec<(u16, String)>,
    delay: Option<Duration>,
    content_type: String,
}

impl BackendReply {
    pub fn fixed(status: u16, body: impl Into<String>) -> Self {
        Self {
            replies: vec![(status, body.into())],
            delay: None,
            content_type: "application/json".to_string(),
        }
    }

    pub fn sequence(replies: Vec<(u16, String)>) -> Self {
        Self {
            replies,
            delay: None,
            content_type: "application/json".to_string(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

struct BackendState {
    reply: BackendReply,
    requests: Mutex<Vec<RecordedRequest>>,
}

pub struct FakeBackend {
    pub url: String,
    state: Arc<BackendState>,
}

impl FakeBackend {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }
}

async fn handle(
    State(state): State<Arc<BackendState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let index = {
        let mut requests = state.requests.lock();
        requests.push(RecordedRequest {
            method: method.to_string(),
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            authorization: headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body,
        });
        requests.len() - 1
    };

    if let Some(delay) = state.reply.delay {
        tokio::time::sleep(delay).await;
    }

    let replies = &state.reply.replies;
    let (status, body) = replies
        .get(index)
        .or_else(|| replies.last())
        .cloned()
        .unwrap_or((200, String::new()));

    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        [(header::CONTENT_TYPE, state.reply.content_type.clone())],
        Body::from(body),
    )
        .into_response()
}

pub async fn spawn_backend(reply: BackendReply) -> FakeBackend {
    let state = Arc::new(BackendState {
        reply,
        requests: Mutex::new(Vec::new()),
    });
    let app = Router::new().fallback(handle).with_state(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    FakeBackend {
        url: format!("http://{}", addr),
        state,
    }
}

/// A successful instant vector response with the given series
pub fn vector_body(series: &[(&[(&str, &str)], &str)]) -> String {
    let result: Vec<serde_json::Value> = series
        .iter()
        .map(|(labels, value)| {
            let metric: serde_json::Map<String, serde_json::Value> = labels
                .iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
                .collect();
            serde_json::json!({ "metric": metric, "value": [1700000000.0, value] })
        })
        .collect();

    serde_json::json!({
        "status": "success",
        "data": { "resultType": "vector", "result": result }
    })
    .to_string()
}
