//! The five capability contracts a hosted framework implements.
//!
//! [`AgentAdapter`] is mandatory: it names the framework and builds
//! executors. Message, state and checkpointer roles are optional and are
//! discovered through explicit accessors, never by probing. Every trait is
//! object-safe so adapters can live behind `Arc<dyn AgentAdapter>` in the
//! [`super::AdapterRegistry`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::types::{
    AgentState, Capabilities, Capability, Checkpoint, EventStream, FrameworkName, InterruptInfo,
    TurnRequest, UniversalInput, UniversalOutput,
};
use crate::config::AgentConfig;
use crate::error::AdapterError;
use crate::task::TaskId;

/// Identifies a framework and turns host configuration into executors.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Name this adapter is registered under. Constant for its lifetime.
    fn framework_name(&self) -> &FrameworkName;

    /// Check that `config` carries every field this framework needs.
    fn validate_config(&self, config: &AgentConfig) -> Result<(), AdapterError>;

    /// Build a framework-native agent from `config` and wrap it in an executor.
    async fn create_executor(
        &self,
        config: &AgentConfig,
    ) -> Result<Box<dyn ExecutorAdapter>, AdapterError>;

    fn message_adapter(&self) -> Option<&dyn MessageAdapter> {
        None
    }

    fn state_adapter(&self) -> Option<&dyn StateAdapter> {
        None
    }

    fn checkpointer(&self) -> Option<Arc<dyn CheckpointerAdapter>> {
        None
    }

    /// Optional roles this adapter provides, derived from the accessors.
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            message: self.message_adapter().is_some(),
            state: self.state_adapter().is_some(),
            checkpointer: self.checkpointer().is_some(),
        }
    }

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(capability)
    }

    /// Descriptive metadata surfaced to callers (agent cards, listings).
    fn metadata(&self) -> Value {
        serde_json::json!({
            "framework": self.framework_name(),
            "capabilities": self.capabilities(),
        })
    }
}

/// Runs or resumes one turn of a task.
#[async_trait]
pub trait ExecutorAdapter: Send + Sync {
    /// Start the turn described by `request`.
    ///
    /// The returned stream is lazy and finite. It should end with exactly
    /// one [`super::ExecutionEvent::Finished`]; the dispatch layer treats a
    /// stream that ends without one as failed. Implementations must stop
    /// their work promptly once `cancel` fires.
    async fn execute(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, AdapterError>;

    /// Shape of the framework's internal state, if it exposes one.
    fn state_schema(&self) -> Option<Value> {
        None
    }
}

/// Reads framework state snapshots.
pub trait StateAdapter: Send + Sync {
    /// Does `schema` expose `property`? Absent or malformed schemas yield
    /// `false`.
    fn has_property(&self, schema: &Value, property: &str) -> bool {
        schema_has_property(schema, property)
    }

    /// Convert a framework-native snapshot into an [`AgentState`].
    fn snapshot_to_state(&self, snapshot: &Value) -> Result<AgentState, AdapterError>;

    /// Interrupt details when `state` is paused.
    fn interrupt_info(&self, state: &AgentState) -> Option<InterruptInfo>;

    /// Framework-native input that continues a paused `state` with `input`.
    fn resume_input(
        &self,
        input: &UniversalInput,
        state: &AgentState,
    ) -> Result<Value, AdapterError>;
}

/// Converts between universal payloads and framework-native messages.
///
/// `from_native(to_native(x))` must preserve the text of `x`.
pub trait MessageAdapter: Send + Sync {
    fn to_native(&self, input: &UniversalInput) -> Result<Value, AdapterError>;

    fn from_native(&self, message: &Value) -> Result<UniversalOutput, AdapterError>;

    fn is_streaming_chunk(&self, message: &Value) -> bool {
        let _ = message;
        false
    }
}

/// Persists the minimal state needed to resume a task.
///
/// Implementations must allow at most one in-flight write per task id.
#[async_trait]
pub trait CheckpointerAdapter: Send + Sync {
    async fn save(&self, task_id: &TaskId, checkpoint: Checkpoint) -> Result<(), AdapterError>;

    async fn load(&self, task_id: &TaskId) -> Result<Option<Checkpoint>, AdapterError>;

    /// Remove every checkpoint of the task. Returns whether one existed.
    async fn delete(&self, task_id: &TaskId) -> Result<bool, AdapterError>;

    /// The task's checkpoints, newest first, at most `limit` of them.
    ///
    /// Stores without history return at most the latest checkpoint.
    async fn list(
        &self,
        task_id: &TaskId,
        limit: Option<usize>,
    ) -> Result<Vec<Checkpoint>, AdapterError> {
        let latest = self.load(task_id).await?;
        Ok(latest.into_iter().take(limit.unwrap_or(usize::MAX)).collect())
    }

    /// Remove checkpoints older than `max_age`. Returns how many were
    /// removed. Stores without expiry remove nothing.
    async fn cleanup_expired(&self, max_age: Duration) -> Result<usize, AdapterError> {
        let _ = max_age;
        Ok(0)
    }

    /// Does [`CheckpointerAdapter::list`] return more than the latest
    /// checkpoint?
    fn supports_history(&self) -> bool {
        false
    }

    /// Does [`CheckpointerAdapter::cleanup_expired`] remove anything?
    fn supports_ttl(&self) -> bool {
        false
    }
}

/// Default property lookup over a JSON description of a state shape.
///
/// Accepts either a JSON-schema style object (`{"properties": {...}}`) or
/// a plain object whose keys are the state fields.
pub fn schema_has_property(schema: &Value, property: &str) -> bool {
    let Some(object) = schema.as_object() else {
        return false;
    };
    match object.get("properties") {
        Some(Value::Object(properties)) => properties.contains_key(property),
        Some(_) => false,
        None => object.contains_key(property),
    }
}

// Compile-time assertion: every contract must stay object-safe.
const _: () = {
    fn _assert_object_safe(
        _: &dyn AgentAdapter,
        _: &dyn ExecutorAdapter,
        _: &dyn StateAdapter,
        _: &dyn MessageAdapter,
        _: &dyn CheckpointerAdapter,
    ) {
    }
};
