//! Node execution strategies
//!
//! Source nodes resolve instantly from their own payload, pass-through nodes
//! succeed with no output, and executable nodes gather their upstream values,
//! build a remote task request, dispatch it and poll until the task settles.

use crate::config::EngineConfig;
use crate::graph::{CropData, ExtractFrameData, LlmData, Node, NodeCategory, NodeData, NodeKind};
use crate::runtime::dispatch::{
    CropPayload, DispatchError, FramePayload, LlmPayload, RemoteState, TaskDispatcher, TaskRequest,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a single node failed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeError {
    #[error("{slot} required{}", upstream_note(.failed_upstreams))]
    MissingInput {
        slot: &'static str,
        failed_upstreams: Vec<String>,
    },

    #[error("{slot} required (upstream result not persisted: {}; re-run it)", .upstreams.join(", "))]
    UpstreamNotPersisted {
        slot: &'static str,
        upstreams: Vec<String>,
    },

    #[error("invalid {slot}: {value:?} is not a number")]
    InvalidInput { slot: &'static str, value: String },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("remote task {}: {message}", .state.as_str())]
    RemoteFailed { state: RemoteState, message: String },

    #[error("remote task did not finish within {waited_ms} ms")]
    Timeout { waited_ms: u64 },

    #[error("run cancelled")]
    Cancelled,
}

fn upstream_note(failed: &[String]) -> String {
    if failed.is_empty() {
        String::new()
    } else {
        format!(" (upstream failed: {})", failed.join(", "))
    }
}

/// Poll cadence and upper bound for remote tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            max_wait: Duration::from_secs(300),
        }
    }
}

impl From<&EngineConfig> for PollPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_wait: config.max_poll_wait(),
        }
    }
}

/// What an upstream node offers on one incoming edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamValue {
    /// Upstream produced a value
    Ready(String),
    /// Upstream failed in this run; carries its node id
    Failed(String),
    /// Upstream succeeded but has nothing to offer
    Empty,
    /// Upstream is outside the run and its stored result was stripped
    Unpersisted(String),
}

/// One incoming edge resolved to its upstream value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingValue {
    pub source: String,
    pub target_handle: String,
    pub value: UpstreamValue,
}

/// Named input of an executable node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputSlot {
    SystemPrompt,
    UserMessage,
    Images,
    Video,
    Timestamp,
    CropX,
    CropY,
    CropW,
    CropH,
    Unrouted,
}

impl InputSlot {
    /// Route a target handle id to an input slot
    ///
    /// Matching is a case-insensitive substring match, checked in a fixed
    /// order so that "system_prompt" lands on the system prompt rather than
    /// the user message.
    pub fn from_handle(handle: &str) -> Self {
        let handle = handle.to_ascii_lowercase();
        let has = |needle: &str| handle.contains(needle);

        if has("system") {
            InputSlot::SystemPrompt
        } else if has("image") {
            InputSlot::Images
        } else if has("video") {
            InputSlot::Video
        } else if has("timestamp") {
            InputSlot::Timestamp
        } else if handle == "x" || has("left") {
            InputSlot::CropX
        } else if handle == "y" || has("top") {
            InputSlot::CropY
        } else if handle == "w" || has("width") {
            InputSlot::CropW
        } else if handle == "h" || has("height") {
            InputSlot::CropH
        } else if has("user") || has("message") || has("prompt") || has("text") {
            InputSlot::UserMessage
        } else {
            InputSlot::Unrouted
        }
    }

    fn describe(self) -> &'static str {
        match self {
            InputSlot::SystemPrompt => "system prompt",
            InputSlot::UserMessage => "user message",
            InputSlot::Images => "image",
            InputSlot::Video => "video",
            InputSlot::Timestamp => "timestamp",
            InputSlot::CropX => "x",
            InputSlot::CropY => "y",
            InputSlot::CropW => "w",
            InputSlot::CropH => "h",
            InputSlot::Unrouted => "unrouted input",
        }
    }
}

/// Upstream values grouped by slot
#[derive(Debug, Default)]
pub struct NodeInputs {
    values: HashMap<InputSlot, Vec<String>>,
    fed: HashSet<InputSlot>,
    failed: HashMap<InputSlot, Vec<String>>,
    unpersisted: HashMap<InputSlot, Vec<String>>,
}

/// Resolution of one slot
enum SlotValue<T> {
    /// No edge feeds the slot; the node's own field applies
    Unfed,
    /// At least one upstream delivered a value
    Value(T),
    /// Fed, but every upstream failed or was empty
    Starved(Starvation),
}

/// Why a fed slot ended up without a value
#[derive(Debug, Default)]
struct Starvation {
    failed: Vec<String>,
    unpersisted: Vec<String>,
}

impl Starvation {
    fn into_error(self, slot: InputSlot) -> NodeError {
        if self.failed.is_empty() && !self.unpersisted.is_empty() {
            NodeError::UpstreamNotPersisted {
                slot: slot.describe(),
                upstreams: self.unpersisted,
            }
        } else {
            NodeError::MissingInput {
                slot: slot.describe(),
                failed_upstreams: self.failed,
            }
        }
    }
}

impl NodeInputs {
    /// Group incoming values by the slot their target handle routes to
    pub fn gather<'a, I>(node_id: &str, incoming: I) -> Self
    where
        I: IntoIterator<Item = &'a IncomingValue>,
    {
        let mut inputs = NodeInputs::default();
        for edge in incoming {
            let slot = InputSlot::from_handle(&edge.target_handle);
            if slot == InputSlot::Unrouted {
                tracing::debug!(
                    "⏭️ Node '{}' ignores value on unrouted handle '{}'",
                    node_id,
                    edge.target_handle
                );
                continue;
            }

            inputs.fed.insert(slot);
            match &edge.value {
                UpstreamValue::Ready(value) => {
                    inputs.values.entry(slot).or_default().push(value.clone())
                }
                UpstreamValue::Failed(upstream) => {
                    let failed = inputs.failed.entry(slot).or_default();
                    if !failed.contains(upstream) {
                        failed.push(upstream.clone());
                    }
                }
                UpstreamValue::Unpersisted(upstream) => {
                    let unpersisted = inputs.unpersisted.entry(slot).or_default();
                    if !unpersisted.contains(upstream) {
                        unpersisted.push(upstream.clone());
                    }
                }
                UpstreamValue::Empty => {}
            }
        }
        inputs
    }

    fn starvation(&self, slot: InputSlot) -> Starvation {
        Starvation {
            failed: self.failed.get(&slot).cloned().unwrap_or_default(),
            unpersisted: self.unpersisted.get(&slot).cloned().unwrap_or_default(),
        }
    }

    /// Text slots join every delivered value with a blank line
    fn text(&self, slot: InputSlot) -> SlotValue<String> {
        self.list(slot).map(|values| values.join("\n\n"))
    }

    fn first(&self, slot: InputSlot) -> SlotValue<String> {
        self.list(slot).map(|mut values| values.remove(0))
    }

    fn list(&self, slot: InputSlot) -> SlotValue<Vec<String>> {
        match self.values.get(&slot) {
            Some(values) if !values.is_empty() => SlotValue::Value(values.clone()),
            _ if self.fed.contains(&slot) => SlotValue::Starved(self.starvation(slot)),
            _ => SlotValue::Unfed,
        }
    }

    fn number(&self, slot: InputSlot, stored: f64) -> Result<f64, NodeError> {
        match self.first(slot) {
            SlotValue::Unfed => Ok(stored),
            SlotValue::Value(raw) => raw.trim().parse().map_err(|_| NodeError::InvalidInput {
                slot: slot.describe(),
                value: raw,
            }),
            SlotValue::Starved(starvation) => Err(starvation.into_error(slot)),
        }
    }
}

impl<T> SlotValue<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> SlotValue<U> {
        match self {
            SlotValue::Unfed => SlotValue::Unfed,
            SlotValue::Value(value) => SlotValue::Value(f(value)),
            SlotValue::Starved(starvation) => SlotValue::Starved(starvation),
        }
    }

    /// Optional slot: absent only when nothing feeds it; fed but starved fails the node
    fn optional(self, slot: InputSlot, stored: Option<T>) -> Result<Option<T>, NodeError> {
        match self {
            SlotValue::Unfed => Ok(stored),
            SlotValue::Value(value) => Ok(Some(value)),
            SlotValue::Starved(starvation) => Err(starvation.into_error(slot)),
        }
    }

    /// Required slot: starved or missing fails the node
    fn required(self, slot: InputSlot, stored: Option<T>) -> Result<T, NodeError> {
        match self {
            SlotValue::Value(value) => Ok(value),
            SlotValue::Unfed => stored.ok_or_else(|| Starvation::default().into_error(slot)),
            SlotValue::Starved(starvation) => Err(starvation.into_error(slot)),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

/// Build the remote task request for an executable node
///
/// Returns `None` for kinds that do not dispatch remote work.
pub fn build_request(node: &Node, inputs: &NodeInputs) -> Option<Result<TaskRequest, NodeError>> {
    match &node.data {
        NodeData::Llm(data) => Some(llm_request(data, inputs)),
        NodeData::CropImage(data) => Some(crop_request(data, inputs)),
        NodeData::ExtractFrame(data) => Some(frame_request(data, inputs)),
        _ => None,
    }
}

fn llm_request(data: &LlmData, inputs: &NodeInputs) -> Result<TaskRequest, NodeError> {
    let user_message = inputs
        .text(InputSlot::UserMessage)
        .required(InputSlot::UserMessage, non_empty(&data.user_message))?;
    let system_prompt = inputs
        .text(InputSlot::SystemPrompt)
        .optional(InputSlot::SystemPrompt, non_empty(&data.system_prompt))?;
    let images = inputs
        .list(InputSlot::Images)
        .optional(InputSlot::Images, None)?
        .unwrap_or_default();

    Ok(TaskRequest::Llm(LlmPayload {
        model: data.model.clone(),
        system_prompt,
        user_message,
        images,
        temperature: data.temperature,
    }))
}

fn crop_request(data: &CropData, inputs: &NodeInputs) -> Result<TaskRequest, NodeError> {
    let image_url = inputs
        .first(InputSlot::Images)
        .required(InputSlot::Images, non_empty(&data.image_url))?;

    Ok(TaskRequest::CropImage(CropPayload {
        image_url,
        x: inputs.number(InputSlot::CropX, data.x)?,
        y: inputs.number(InputSlot::CropY, data.y)?,
        w: inputs.number(InputSlot::CropW, data.w)?,
        h: inputs.number(InputSlot::CropH, data.h)?,
    }))
}

fn frame_request(data: &ExtractFrameData, inputs: &NodeInputs) -> Result<TaskRequest, NodeError> {
    let video_url = inputs
        .first(InputSlot::Video)
        .required(InputSlot::Video, non_empty(&data.video_url))?;

    Ok(TaskRequest::ExtractFrame(FramePayload {
        video_url,
        timestamp: inputs.number(InputSlot::Timestamp, data.timestamp)?,
        timestamp_unit: data.timestamp_unit,
    }))
}

/// Pull the node's output string out of a completed task's payload
pub fn extract_output(kind: &NodeKind, output: Value) -> Option<String> {
    let key = match kind {
        NodeKind::Llm => Some("text"),
        NodeKind::CropImage | NodeKind::ExtractFrame => Some("dataUrl"),
        _ => None,
    };

    if let Some(found) = key.and_then(|key| output.get(key)).and_then(Value::as_str) {
        return Some(found.to_string());
    }

    match output {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

/// Outcome of one node execution
#[derive(Debug, Clone)]
pub struct NodeExecution {
    pub result: Result<Option<String>, NodeError>,
    pub duration_ms: u64,
}

/// Node executor that handles execution of different node kinds
///
/// Holds the remote task dispatcher and the poll policy. One executor is
/// shared by every run.
pub struct NodeExecutor {
    dispatcher: Arc<dyn TaskDispatcher>,
    poll: PollPolicy,
}

impl std::fmt::Debug for NodeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeExecutor").field("poll", &self.poll).finish()
    }
}

impl NodeExecutor {
    pub fn new(dispatcher: Arc<dyn TaskDispatcher>, poll: PollPolicy) -> Self {
        Self { dispatcher, poll }
    }

    /// Execute a single node against the values delivered on its edges
    pub async fn run(
        &self,
        node: &Node,
        incoming: &[IncomingValue],
        cancel: &CancellationToken,
    ) -> NodeExecution {
        match node.category() {
            NodeCategory::Source => {
                tracing::debug!("📦 Source node '{}' resolved from its own payload", node.id);
                NodeExecution {
                    result: Ok(node.source_value()),
                    duration_ms: 0,
                }
            }
            NodeCategory::Passthrough => {
                tracing::debug!("⏭️ Pass-through node '{}' (type: {})", node.id, node.kind());
                NodeExecution {
                    result: Ok(None),
                    duration_ms: 0,
                }
            }
            NodeCategory::Executable => {
                let start_time = Instant::now();
                let result = self.run_remote(node, incoming, cancel).await;
                NodeExecution {
                    result,
                    duration_ms: start_time.elapsed().as_millis() as u64,
                }
            }
        }
    }

    async fn run_remote(
        &self,
        node: &Node,
        incoming: &[IncomingValue],
        cancel: &CancellationToken,
    ) -> Result<Option<String>, NodeError> {
        // STEP 1: Gather and validate inputs
        let inputs = NodeInputs::gather(&node.id, incoming);
        let request = match build_request(node, &inputs) {
            Some(request) => request?,
            None => return Ok(None),
        };

        // STEP 2: Dispatch the remote task
        tracing::info!("🚀 Dispatching {} for node '{}'", request.task_id(), node.id);
        let handle = tokio::select! {
            _ = cancel.cancelled() => return Err(NodeError::Cancelled),
            handle = self.dispatcher.dispatch(&request) => handle?,
        };

        // STEP 3: Poll until terminal, bounded by the deadline
        let started = Instant::now();
        let deadline = started + self.poll.max_wait;
        let mut attempt = 0u32;
        loop {
            let now = Instant::now();
            if now >= deadline {
                let waited_ms = now.duration_since(started).as_millis() as u64;
                tracing::warn!("⏱️ Node '{}' timed out after {} ms (task {})", node.id, waited_ms, handle.id);
                return Err(NodeError::Timeout { waited_ms });
            }

            let pause = self.poll.interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Err(NodeError::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }

            attempt += 1;
            let status = tokio::select! {
                _ = cancel.cancelled() => return Err(NodeError::Cancelled),
                status = self.dispatcher.poll_status(&handle) => status?,
            };
            tracing::debug!(
                "🔄 Poll #{} for node '{}' (task {}): {}",
                attempt,
                node.id,
                handle.id,
                status.state.as_str()
            );

            match status.state {
                RemoteState::Completed => {
                    return Ok(extract_output(&node.kind(), status.output.unwrap_or(Value::Null)));
                }
                RemoteState::Failed | RemoteState::Crashed => {
                    return Err(NodeError::RemoteFailed {
                        state: status.state,
                        message: status.error.unwrap_or_else(|| "task failed".to_string()),
                    });
                }
                RemoteState::Queued | RemoteState::Running => {}
            }
        }
    }
}
