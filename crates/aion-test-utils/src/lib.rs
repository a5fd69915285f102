//! Shared test utilities for aion integration tests.
//!
//! Provides [`ScriptedAdapter`], a framework adapter that plays back a
//! configurable sequence of execution events without running a real
//! framework. Requests it receives are recorded so tests can assert on
//! what the dispatch layer sent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use aion_core::adapter::{
    AgentAdapter, AgentState, CheckpointerAdapter, EventStream, ExecutionEvent, ExecutorAdapter,
    FrameworkName, InterruptInfo, MessageAdapter, StateAdapter, TurnRequest, UniversalInput,
    UniversalOutput,
};
use aion_core::config::AgentConfig;
use aion_core::task::TaskState;
use aion_core::AdapterError;

/// What the scripted executor does when a turn starts.
#[derive(Debug, Clone)]
pub enum Script {
    /// Emit these events, then end the stream.
    Events(Vec<ExecutionEvent>),
    /// Emit these events, then wait until the turn is cancelled.
    Hang(Vec<ExecutionEvent>),
    /// Fail to start with an execution error.
    FailStart(String),
}

/// A native `{"text": ...}` message event.
pub fn text_message(text: &str) -> ExecutionEvent {
    ExecutionEvent::Message(json!({ "text": text }))
}

/// A `Finished` event without a message.
pub fn finished(state: TaskState) -> ExecutionEvent {
    ExecutionEvent::Finished {
        state,
        message: None,
    }
}

/// An input-required interrupt with `prompt`.
pub fn interrupt(prompt: &str) -> ExecutionEvent {
    ExecutionEvent::Interrupt(InterruptInfo {
        reason: "scripted".to_string(),
        prompt: Some(prompt.to_string()),
        options: Vec::new(),
        auth: false,
    })
}

// ---------------------------------------------------------------------------
// Messages and state
// ---------------------------------------------------------------------------

/// Native messages are `{"text": "...", "role": "..."}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptedMessages;

impl MessageAdapter for ScriptedMessages {
    fn to_native(&self, input: &UniversalInput) -> Result<Value, AdapterError> {
        Ok(json!({ "text": input.text, "role": "user" }))
    }

    fn from_native(&self, message: &Value) -> Result<UniversalOutput, AdapterError> {
        let text = message
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::MessageConversion(format!("no text in {message}")))?;
        Ok(UniversalOutput {
            text: text.to_string(),
            role: message
                .get("role")
                .and_then(Value::as_str)
                .unwrap_or("assistant")
                .to_string(),
            is_chunk: false,
        })
    }
}

/// Treats a checkpoint's state object as the agent's values.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptedState;

impl StateAdapter for ScriptedState {
    fn snapshot_to_state(&self, snapshot: &Value) -> Result<AgentState, AdapterError> {
        let values = snapshot
            .as_object()
            .cloned()
            .ok_or_else(|| AdapterError::StateRetrieval(format!("not an object: {snapshot}")))?;
        Ok(AgentState {
            values,
            ..AgentState::default()
        })
    }

    fn interrupt_info(&self, _state: &AgentState) -> Option<InterruptInfo> {
        None
    }

    fn resume_input(
        &self,
        input: &UniversalInput,
        state: &AgentState,
    ) -> Result<Value, AdapterError> {
        Ok(json!({ "text": input.text, "role": "user", "resume": state.values }))
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Recorder {
    requests: Mutex<Vec<TurnRequest>>,
    cancelled: AtomicBool,
}

/// Framework adapter driven by a [`Script`].
pub struct ScriptedAdapter {
    name: FrameworkName,
    script: Script,
    messages: bool,
    state: bool,
    checkpointer: Option<Arc<dyn CheckpointerAdapter>>,
    recorder: Arc<Recorder>,
}

impl ScriptedAdapter {
    /// Adapter named `name` with a message adapter and no other optional
    /// roles.
    pub fn new(name: &str, script: Script) -> Self {
        Self {
            name: FrameworkName::new(name).expect("scripted framework name must not be blank"),
            script,
            messages: true,
            state: false,
            checkpointer: None,
            recorder: Arc::new(Recorder::default()),
        }
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn CheckpointerAdapter>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_state(mut self) -> Self {
        self.state = true;
        self
    }

    pub fn without_messages(mut self) -> Self {
        self.messages = false;
        self
    }

    /// Shared handle for inspecting the adapter after it moves into a
    /// registry.
    pub fn recorder(&self) -> ScriptRecorder {
        ScriptRecorder {
            recorder: Arc::clone(&self.recorder),
        }
    }
}

/// Observes what a [`ScriptedAdapter`] was asked to do.
#[derive(Debug, Clone)]
pub struct ScriptRecorder {
    recorder: Arc<Recorder>,
}

impl ScriptRecorder {
    /// Every turn request received so far.
    pub fn requests(&self) -> Vec<TurnRequest> {
        self.recorder
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Did a hanging script observe cancellation?
    pub fn saw_cancel(&self) -> bool {
        self.recorder.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentAdapter for ScriptedAdapter {
    fn framework_name(&self) -> &FrameworkName {
        &self.name
    }

    fn validate_config(&self, config: &AgentConfig) -> Result<(), AdapterError> {
        if config.settings.get("invalid").is_some() {
            return Err(AdapterError::configuration(&self.name, "scripted invalid setting"));
        }
        Ok(())
    }

    async fn create_executor(
        &self,
        _config: &AgentConfig,
    ) -> Result<Box<dyn ExecutorAdapter>, AdapterError> {
        Ok(Box::new(ScriptedExecutor {
            script: self.script.clone(),
            recorder: Arc::clone(&self.recorder),
        }))
    }

    fn message_adapter(&self) -> Option<&dyn MessageAdapter> {
        self.messages.then_some(&ScriptedMessages as &dyn MessageAdapter)
    }

    fn state_adapter(&self) -> Option<&dyn StateAdapter> {
        self.state.then_some(&ScriptedState as &dyn StateAdapter)
    }

    fn checkpointer(&self) -> Option<Arc<dyn CheckpointerAdapter>> {
        self.checkpointer.clone()
    }
}

struct ScriptedExecutor {
    script: Script,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl ExecutorAdapter for ScriptedExecutor {
    async fn execute(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, AdapterError> {
        self.recorder
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        match &self.script {
            Script::FailStart(message) => Err(AdapterError::Execution(message.clone())),
            Script::Events(events) => Ok(Box::pin(futures::stream::iter(events.clone()))),
            Script::Hang(events) => {
                let events = events.clone();
                let recorder = Arc::clone(&self.recorder);
                Ok(Box::pin(async_stream::stream! {
                    for event in events {
                        yield event;
                    }
                    cancel.cancelled().await;
                    recorder.cancelled.store(true, Ordering::SeqCst);
                }))
            }
        }
    }

    fn state_schema(&self) -> Option<Value> {
        Some(json!({ "messages": [], "memory": {} }))
    }
}
