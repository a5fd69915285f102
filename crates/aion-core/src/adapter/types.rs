//! Types shared by every capability contract.

use std::borrow::Borrow;
use std::fmt;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::task::{ContextId, Task, TaskId, TaskState};

// ---------------------------------------------------------------------------
// FrameworkName
// ---------------------------------------------------------------------------

/// Stable identifier of a hosted agent framework (e.g. `"echo"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FrameworkName(String);

/// Error returned for an empty or blank framework name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("framework name must not be blank")]
pub struct InvalidFrameworkName;

impl FrameworkName {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidFrameworkName> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(InvalidFrameworkName);
        }
        Ok(Self(name))
    }

    /// Name of a framework built into this crate.
    pub(crate) fn builtin(name: &'static str) -> Self {
        debug_assert!(!name.trim().is_empty());
        Self(name.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FrameworkName {
    type Error = InvalidFrameworkName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FrameworkName> for String {
    fn from(value: FrameworkName) -> Self {
        value.0
    }
}

impl Borrow<str> for FrameworkName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FrameworkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Universal payloads
// ---------------------------------------------------------------------------

/// What a caller sends, independent of any framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniversalInput {
    pub text: String,
}

impl UniversalInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// What a caller receives, independent of any framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniversalOutput {
    pub text: String,
    /// Author of the message (`"assistant"`, `"user"`, ...).
    pub role: String,
    /// `true` when this is one incremental piece of a longer message.
    #[serde(default)]
    pub is_chunk: bool,
}

impl UniversalOutput {
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            role: "assistant".to_string(),
            is_chunk: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Agent state
// ---------------------------------------------------------------------------

/// Why a framework paused and what it is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptInfo {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// `true` when the framework needs credentials rather than an answer.
    #[serde(default)]
    pub auth: bool,
}

impl InterruptInfo {
    /// The task state a turn should end in when it stops on this interrupt.
    pub fn task_state(&self) -> TaskState {
        if self.auth {
            TaskState::AuthRequired
        } else {
            TaskState::InputRequired
        }
    }
}

/// Unified view of a framework's state snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    #[serde(default)]
    pub values: serde_json::Map<String, Value>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl AgentState {
    /// No pending steps and not paused.
    pub fn is_complete(&self) -> bool {
        self.next_steps.is_empty() && !self.interrupted
    }
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

/// Minimal state needed to resume a task in a later process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub task_id: TaskId,
    pub context_id: ContextId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    pub state: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

impl Checkpoint {
    /// Build the next checkpoint for `task`, chained onto `parent`.
    pub fn next(task: &Task, parent: Option<&Checkpoint>, state: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: task.id.clone(),
            context_id: task.context_id.clone(),
            parent_id: parent.map(|p| p.id),
            state,
            created_at: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Whether a turn starts fresh work or continues a paused task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnMode {
    Start,
    Resume,
}

/// Everything an executor needs to run one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Task snapshot before the turn.
    pub task: Task,
    /// The caller's input as sent.
    pub input: UniversalInput,
    /// The same input in the framework's native shape.
    pub native_input: Value,
    pub mode: TurnMode,
    /// Last checkpoint saved for the task, when resuming.
    pub checkpoint: Option<Checkpoint>,
}

/// Event emitted by an executor while a turn runs.
///
/// Payloads are framework-native; the dispatch layer translates them.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    /// A framework-native message (possibly a streaming chunk).
    Message(Value),
    /// Framework state values changed.
    StateUpdate(Value),
    /// Resumable state to persist before continuing.
    Checkpoint(Value),
    /// The framework paused and waits for external input.
    Interrupt(InterruptInfo),
    /// A framework fault; the turn ends as failed.
    Error { message: String },
    /// The turn is over; the task ends in `state`.
    Finished {
        state: TaskState,
        message: Option<String>,
    },
}

/// Lazy, finite stream of execution events.
pub type EventStream = Pin<Box<dyn Stream<Item = ExecutionEvent> + Send>>;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Optional capability an adapter may provide beyond agent + executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Message,
    State,
    Checkpointer,
}

/// Set of optional capabilities an adapter provides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub message: bool,
    pub state: bool,
    pub checkpointer: bool,
}

impl Capabilities {
    pub fn contains(&self, capability: Capability) -> bool {
        match capability {
            Capability::Message => self.message,
            Capability::State => self.state,
            Capability::Checkpointer => self.checkpointer,
        }
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = vec!["agent", "executor"];
        if self.message {
            names.push("message");
        }
        if self.state {
            names.push("state");
        }
        if self.checkpointer {
            names.push("checkpointer");
        }
        f.write_str(&names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_framework_name_is_rejected() {
        assert_eq!(FrameworkName::new("  "), Err(InvalidFrameworkName));
        assert!(serde_json::from_str::<FrameworkName>("\"\"").is_err());
    }

    #[test]
    fn framework_name_serializes_as_plain_string() {
        let name = FrameworkName::new("echo").unwrap();
        assert_eq!(serde_json::to_string(&name).unwrap(), "\"echo\"");
    }

    #[test]
    fn interrupt_maps_to_task_state() {
        let mut info = InterruptInfo {
            reason: "need approval".to_string(),
            prompt: None,
            options: Vec::new(),
            auth: false,
        };
        assert_eq!(info.task_state(), TaskState::InputRequired);
        info.auth = true;
        assert_eq!(info.task_state(), TaskState::AuthRequired);
    }

    #[test]
    fn agent_state_completion() {
        let mut state = AgentState::default();
        assert!(state.is_complete());
        state.next_steps.push("tool".to_string());
        assert!(!state.is_complete());
        state.next_steps.clear();
        state.interrupted = true;
        assert!(!state.is_complete());
    }

    #[test]
    fn capabilities_display_lists_present_roles() {
        let caps = Capabilities {
            message: true,
            state: false,
            checkpointer: true,
        };
        assert_eq!(caps.to_string(), "agent, executor, message, checkpointer");
        assert!(caps.contains(Capability::Checkpointer));
        assert!(!caps.contains(Capability::State));
    }

    #[test]
    fn checkpoint_chains_to_parent() {
        let task = Task::submitted(ContextId::from("ctx"));
        let first = Checkpoint::next(&task, None, serde_json::json!({"n": 1}));
        let second = Checkpoint::next(&task, Some(&first), serde_json::json!({"n": 2}));
        assert_eq!(first.parent_id, None);
        assert_eq!(second.parent_id, Some(first.id));
        assert_eq!(second.task_id, task.id);
    }
}
