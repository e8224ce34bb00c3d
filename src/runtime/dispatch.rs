//! Remote task collaborator
//!
//! Executable nodes hand their work to a task service: a dispatch call returns
//! a task handle, and the handle is polled until the task reaches a terminal
//! state. The engine only depends on the `TaskDispatcher` trait so tests can
//! swap in a scripted fake.

use crate::config::DispatcherConfig;
use crate::graph::TimestampUnit;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to the task service
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("task service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("task service response exceeded {limit} bytes")]
    TooLarge { limit: usize },

    #[error("task service unreachable: {0}")]
    Transport(String),

    #[error("malformed task service response: {0}")]
    Malformed(String),
}

/// Payload of a `run-llm` task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmPayload {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub user_message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    pub temperature: f32,
}

/// Payload of a `crop-image` task; the rectangle is in percent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CropPayload {
    pub image_url: String,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// Payload of an `extract-frame` task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePayload {
    pub video_url: String,
    pub timestamp: f64,
    pub timestamp_unit: TimestampUnit,
}

/// A remote task invocation, one variant per executable node kind
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaskRequest {
    Llm(LlmPayload),
    CropImage(CropPayload),
    ExtractFrame(FramePayload),
}

impl TaskRequest {
    /// Task identifier understood by the task service
    pub fn task_id(&self) -> &'static str {
        match self {
            TaskRequest::Llm(_) => "run-llm",
            TaskRequest::CropImage(_) => "crop-image",
            TaskRequest::ExtractFrame(_) => "extract-frame",
        }
    }
}

/// Handle returned by a successful dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub id: String,
}

/// Lifecycle state of a remote task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteState {
    Queued,
    Running,
    Completed,
    Failed,
    Crashed,
}

impl RemoteState {
    /// Parse a task service status string, case-insensitively
    ///
    /// Unknown strings are treated as still queued so the poll loop keeps
    /// waiting (bounded by its own deadline).
    pub fn from_wire(value: &str) -> Self {
        let upper = value.trim().to_ascii_uppercase();
        match upper.as_str() {
            "COMPLETED" | "SUCCESS" | "SUCCEEDED" => RemoteState::Completed,
            "FAILED" | "CANCELED" | "CANCELLED" | "TIMED_OUT" | "EXPIRED" => RemoteState::Failed,
            "CRASHED" | "SYSTEM_FAILURE" => RemoteState::Crashed,
            "RUNNING" | "EXECUTING" | "REATTEMPTING" => RemoteState::Running,
            s if s.starts_with("WAITING") => RemoteState::Running,
            _ => RemoteState::Queued,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RemoteState::Queued => "queued",
            RemoteState::Running => "running",
            RemoteState::Completed => "completed",
            RemoteState::Failed => "failed",
            RemoteState::Crashed => "crashed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RemoteState::Completed | RemoteState::Failed | RemoteState::Crashed)
    }
}

/// Observed status of a dispatched task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatus {
    pub state: RemoteState,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl TaskStatus {
    pub fn running() -> Self {
        Self {
            state: RemoteState::Running,
            output: None,
            error: None,
        }
    }

    pub fn completed(output: Value) -> Self {
        Self {
            state: RemoteState::Completed,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(state: RemoteState, error: impl Into<String>) -> Self {
        Self {
            state,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// Dispatch and observe remote tasks
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Start a task and return its handle
    async fn dispatch(&self, request: &TaskRequest) -> Result<TaskHandle, DispatchError>;

    /// Fetch the current status of a task
    async fn poll_status(&self, handle: &TaskHandle) -> Result<TaskStatus, DispatchError>;
}

/// Wire form of the run-status endpoint
#[derive(Debug, Deserialize)]
struct WireStatus {
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl From<WireStatus> for TaskStatus {
    fn from(wire: WireStatus) -> Self {
        let error = wire.error.and_then(|value| match value {
            Value::Null => None,
            Value::String(message) => Some(message),
            Value::Object(ref map) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| Some(value.to_string())),
            other => Some(other.to_string()),
        });

        TaskStatus {
            state: RemoteState::from_wire(&wire.status),
            output: wire.output.filter(|value| !value.is_null()),
            error,
        }
    }
}

/// reqwest-backed dispatcher talking to the task service over HTTP
///
/// `POST {base}/api/tasks/{task_id}` starts a task, `GET
/// {base}/api/run-status?id=...` reports its status.
#[derive(Debug, Clone)]
pub struct HttpTaskDispatcher {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_response_bytes: usize,
}

impl HttpTaskDispatcher {
    /// Create dispatcher from configuration
    pub fn new(config: &DispatcherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build task service client: {}", e))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_response_bytes: config.max_response_bytes,
        })
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Send a request and read a size-bounded JSON body
    async fn send_json<T>(&self, builder: reqwest::RequestBuilder) -> Result<T, DispatchError>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let limit = self.max_response_bytes;
        if response.content_length().is_some_and(|len| len as usize > limit) {
            return Err(DispatchError::TooLarge { limit });
        }

        // Chunked bodies carry no length; stop reading once over the limit
        let status = response.status();
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?
        {
            if body.len() + chunk.len() > limit {
                return Err(DispatchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(DispatchError::Status {
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }

        serde_json::from_slice(&body).map_err(|e| DispatchError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl TaskDispatcher for HttpTaskDispatcher {
    async fn dispatch(&self, request: &TaskRequest) -> Result<TaskHandle, DispatchError> {
        let url = format!("{}/api/tasks/{}", self.base_url, request.task_id());
        tracing::debug!("🌐 Dispatching task: POST {}", url);

        let handle: TaskHandle = self.send_json(self.client.post(&url).json(request)).await?;
        if handle.id.is_empty() {
            return Err(DispatchError::Malformed("empty task id".to_string()));
        }

        tracing::debug!("📨 Task {} accepted as {}", request.task_id(), handle.id);
        Ok(handle)
    }

    async fn poll_status(&self, handle: &TaskHandle) -> Result<TaskStatus, DispatchError> {
        let url = format!("{}/api/run-status", self.base_url);
        let wire: WireStatus = self
            .send_json(self.client.get(&url).query(&[("id", handle.id.as_str())]))
            .await?;
        Ok(wire.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{LlmData, Node, NodeData};
    use crate::runtime::executor::{NodeExecutor, PollPolicy};
    use axum::{
        body::Body,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    /// Serve `app` on an ephemeral local port and return its base URL
    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn dispatcher(base_url: String, max_response_bytes: usize) -> HttpTaskDispatcher {
        HttpTaskDispatcher::new(&DispatcherConfig {
            base_url,
            api_key: Some("secret".to_string()),
            max_response_bytes,
            request_timeout_ms: 5_000,
        })
        .unwrap()
    }

    fn llm_request() -> TaskRequest {
        TaskRequest::Llm(LlmPayload {
            model: "gemini-1.5-flash".to_string(),
            system_prompt: None,
            user_message: "hello".to_string(),
            images: vec![],
            temperature: 0.7,
        })
    }

    #[tokio::test]
    async fn dispatch_and_poll_round_trip_with_bearer_auth() {
        let authorized = |headers: &HeaderMap| {
            headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Bearer secret")
        };
        let app = Router::new()
            .route(
                "/api/tasks/run-llm",
                post(move |headers: HeaderMap| async move {
                    if authorized(&headers) {
                        (StatusCode::OK, Json(json!({ "id": "run_7" })))
                    } else {
                        (StatusCode::UNAUTHORIZED, Json(json!({ "error": "no token" })))
                    }
                }),
            )
            .route(
                "/api/run-status",
                get(|| async { Json(json!({ "id": "run_7", "status": "COMPLETED", "output": { "text": "hi" } })) }),
            );
        let tasks = dispatcher(serve(app).await, 1024);

        let handle = tasks.dispatch(&llm_request()).await.unwrap();
        assert_eq!(handle.id, "run_7");
        let status = tasks.poll_status(&handle).await.unwrap();
        assert_eq!(status.state, RemoteState::Completed);
        assert_eq!(status.output, Some(json!({ "text": "hi" })));
    }

    #[tokio::test]
    async fn non_success_status_keeps_the_body() {
        let app = Router::new().route(
            "/api/tasks/run-llm",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "rate limited") }),
        );
        let err = dispatcher(serve(app).await, 1024)
            .dispatch(&llm_request())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::Status {
                status: 429,
                body: "rate limited".to_string()
            }
        );
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let app = Router::new()
            .route("/api/tasks/run-llm", post(|| async { "x".repeat(2048) }))
            .route(
                "/api/run-status",
                get(|| async {
                    // Streamed, so no Content-Length header
                    let chunks = vec![Ok::<_, std::io::Error>(vec![b'x'; 600]), Ok(vec![b'x'; 600])];
                    Body::from_stream(futures::stream::iter(chunks))
                }),
            );
        let tasks = dispatcher(serve(app).await, 1024);

        assert_eq!(
            tasks.dispatch(&llm_request()).await.unwrap_err(),
            DispatchError::TooLarge { limit: 1024 }
        );
        let handle = TaskHandle { id: "run_1".to_string() };
        assert_eq!(
            tasks.poll_status(&handle).await.unwrap_err(),
            DispatchError::TooLarge { limit: 1024 }
        );
    }

    #[tokio::test]
    async fn malformed_bodies_and_empty_ids_are_rejected() {
        let app = Router::new()
            .route("/api/tasks/run-llm", post(|| async { "not json" }))
            .route("/api/tasks/crop-image", post(|| async { Json(json!({ "id": "" })) }));
        let tasks = dispatcher(serve(app).await, 1024);

        assert!(matches!(
            tasks.dispatch(&llm_request()).await.unwrap_err(),
            DispatchError::Malformed(_)
        ));

        let crop = TaskRequest::CropImage(CropPayload {
            image_url: "https://cdn/cat.png".to_string(),
            x: 0.0,
            y: 0.0,
            w: 100.0,
            h: 100.0,
        });
        assert_eq!(
            tasks.dispatch(&crop).await.unwrap_err(),
            DispatchError::Malformed("empty task id".to_string())
        );
    }

    #[tokio::test]
    async fn dispatch_errors_surface_on_the_node() {
        let app = Router::new().route(
            "/api/tasks/run-llm",
            post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        );
        let tasks = Arc::new(dispatcher(serve(app).await, 1024));
        let executor = NodeExecutor::new(
            tasks,
            PollPolicy {
                interval: Duration::from_millis(10),
                max_wait: Duration::from_secs(1),
            },
        );
        let node = Node::new(
            "llm",
            NodeData::Llm(LlmData {
                user_message: Some("hello".to_string()),
                ..Default::default()
            }),
        );

        let execution = executor.run(&node, &[], &CancellationToken::new()).await;
        assert_eq!(
            execution.result.unwrap_err().to_string(),
            "task service returned HTTP 502: upstream down"
        );
    }

    #[test]
    fn remote_states_parse_loosely() {
        assert_eq!(RemoteState::from_wire("COMPLETED"), RemoteState::Completed);
        assert_eq!(RemoteState::from_wire("completed"), RemoteState::Completed);
        assert_eq!(RemoteState::from_wire("EXECUTING"), RemoteState::Running);
        assert_eq!(RemoteState::from_wire("WAITING_FOR_DEPLOY"), RemoteState::Running);
        assert_eq!(RemoteState::from_wire("TIMED_OUT"), RemoteState::Failed);
        assert_eq!(RemoteState::from_wire("SYSTEM_FAILURE"), RemoteState::Crashed);
        assert_eq!(RemoteState::from_wire("QUEUED"), RemoteState::Queued);
        assert!(!RemoteState::from_wire("PENDING_VERSION").is_terminal());
        assert!(RemoteState::Crashed.is_terminal());
    }

    #[test]
    fn wire_errors_accept_objects_and_strings() {
        let status: TaskStatus = serde_json::from_value::<WireStatus>(json!({
            "id": "run_1",
            "status": "FAILED",
            "error": {"message": "No image provided", "name": "Error"}
        }))
        .unwrap()
        .into();
        assert_eq!(status.state, RemoteState::Failed);
        assert_eq!(status.error.as_deref(), Some("No image provided"));

        let status: TaskStatus = serde_json::from_value::<WireStatus>(json!({
            "status": "CRASHED",
            "error": "worker died",
            "output": null
        }))
        .unwrap()
        .into();
        assert_eq!(status.state, RemoteState::Crashed);
        assert_eq!(status.error.as_deref(), Some("worker died"));
        assert_eq!(status.output, None);
    }

    #[test]
    fn payloads_serialize_in_camel_case() {
        let request = TaskRequest::Llm(LlmPayload {
            model: "gemini-1.5-flash".to_string(),
            system_prompt: None,
            user_message: "hi".to_string(),
            images: vec![],
            temperature: 0.5,
        });
        assert_eq!(request.task_id(), "run-llm");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"model": "gemini-1.5-flash", "userMessage": "hi", "temperature": 0.5})
        );

        let request = TaskRequest::ExtractFrame(FramePayload {
            video_url: "v.mp4".to_string(),
            timestamp: 50.0,
            timestamp_unit: TimestampUnit::Pct,
        });
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"videoUrl": "v.mp4", "timestamp": 50.0, "timestampUnit": "pct"})
        );
    }
}
