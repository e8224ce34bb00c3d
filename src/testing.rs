//! Testing utilities for running DAGs without a task service
//!
//! `ScriptedDispatcher` implements `TaskDispatcher` in memory. Rules match on
//! the outgoing `TaskRequest` and decide how the task ends; unmatched requests
//! echo their main input so outputs are easy to assert on.
//!
//! ```ignore
//! let dispatcher = ScriptedDispatcher::new()
//!     .on_user_message("explode", ScriptedOutcome::Fail("boom".into()))
//!     .polls_before_terminal(2);
//! ```

use crate::runtime::dispatch::{
    DispatchError, RemoteState, TaskDispatcher, TaskHandle, TaskRequest, TaskStatus,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;

/// How a scripted task ends
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedOutcome {
    /// Complete with this output payload
    Complete(Value),
    /// Terminal `failed` state with this error message
    Fail(String),
    /// Terminal `crashed` state with this error message
    Crash(String),
    /// Never leaves the running state
    Hang,
    /// Refuse the dispatch call itself
    Reject(DispatchError),
}

type Matcher = Box<dyn Fn(&TaskRequest) -> bool + Send + Sync>;

struct Rule {
    matcher: Matcher,
    outcome: ScriptedOutcome,
}

#[derive(Default)]
struct ScriptState {
    next_id: u64,
    tasks: HashMap<String, ScriptedTask>,
    dispatched: Vec<TaskRequest>,
}

struct ScriptedTask {
    outcome: ScriptedOutcome,
    polls: u32,
}

/// In-memory `TaskDispatcher` driven by rules
#[derive(Default)]
pub struct ScriptedDispatcher {
    rules: Vec<Rule>,
    fallback: Option<ScriptedOutcome>,
    polls_before_terminal: u32,
    state: Mutex<ScriptState>,
}

impl ScriptedDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `outcome` to requests matching `matcher`; first match wins
    pub fn on<F>(mut self, matcher: F, outcome: ScriptedOutcome) -> Self
    where
        F: Fn(&TaskRequest) -> bool + Send + Sync + 'static,
    {
        self.rules.push(Rule {
            matcher: Box::new(matcher),
            outcome,
        });
        self
    }

    /// Match LLM requests whose user message contains `needle`
    pub fn on_user_message(self, needle: &str, outcome: ScriptedOutcome) -> Self {
        let needle = needle.to_string();
        self.on(
            move |request| matches!(request, TaskRequest::Llm(p) if p.user_message.contains(&needle)),
            outcome,
        )
    }

    /// Outcome for requests no rule matches (default: echo)
    pub fn default_outcome(mut self, outcome: ScriptedOutcome) -> Self {
        self.fallback = Some(outcome);
        self
    }

    /// Number of polls answered with `running` before the terminal status
    pub fn polls_before_terminal(mut self, polls: u32) -> Self {
        self.polls_before_terminal = polls;
        self
    }

    /// Every request dispatched so far, in dispatch order
    pub fn dispatched(&self) -> Vec<TaskRequest> {
        self.lock().dispatched.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn outcome_for(&self, request: &TaskRequest) -> ScriptedOutcome {
        self.rules
            .iter()
            .find(|rule| (rule.matcher)(request))
            .map(|rule| rule.outcome.clone())
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| ScriptedOutcome::Complete(echo(request)))
    }
}

/// Echo output: the request's main input wrapped in the task name
pub fn echo(request: &TaskRequest) -> Value {
    match request {
        TaskRequest::Llm(payload) => json!({
            "text": format!("llm({})", payload.user_message),
            "model": payload.model,
            "tokensUsed": 0
        }),
        TaskRequest::CropImage(payload) => json!({
            "dataUrl": format!("crop({})", payload.image_url)
        }),
        TaskRequest::ExtractFrame(payload) => json!({
            "dataUrl": format!("frame({})", payload.video_url),
            "timestamp": payload.timestamp
        }),
    }
}

#[async_trait]
impl TaskDispatcher for ScriptedDispatcher {
    async fn dispatch(&self, request: &TaskRequest) -> Result<TaskHandle, DispatchError> {
        let outcome = self.outcome_for(request);
        let mut state = self.lock();
        state.dispatched.push(request.clone());

        if let ScriptedOutcome::Reject(err) = outcome {
            return Err(err);
        }

        state.next_id += 1;
        let id = format!("run_{}", state.next_id);
        state.tasks.insert(id.clone(), ScriptedTask { outcome, polls: 0 });
        Ok(TaskHandle { id })
    }

    async fn poll_status(&self, handle: &TaskHandle) -> Result<TaskStatus, DispatchError> {
        let mut state = self.lock();
        let task = state
            .tasks
            .get_mut(&handle.id)
            .ok_or_else(|| DispatchError::Status {
                status: 404,
                body: format!("unknown run {}", handle.id),
            })?;

        if task.polls < self.polls_before_terminal {
            task.polls += 1;
            return Ok(TaskStatus::running());
        }

        Ok(match &task.outcome {
            ScriptedOutcome::Complete(output) => TaskStatus::completed(output.clone()),
            ScriptedOutcome::Fail(message) => TaskStatus::failed(RemoteState::Failed, message.clone()),
            ScriptedOutcome::Crash(message) => TaskStatus::failed(RemoteState::Crashed, message.clone()),
            ScriptedOutcome::Hang | ScriptedOutcome::Reject(_) => TaskStatus::running(),
        })
    }
}
