//! Echo framework: an in-process reference framework.
//!
//! The agent replies with the caller's text, streamed in chunks of
//! `chunk_size` characters. Text that starts with `ask_prefix` (default
//! `"?"`) is treated as a question for the operator: the turn pauses as
//! `input-required` and the next turn's text answers it.
//!
//! Native messages look like
//! `{"role": "human" | "ai", "content": [{"type": "text", "text": "..."}]}`.
//! Checkpoints carry the transcript and the pending question, if any.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::adapter::{
    AgentAdapter, AgentState, BootstrapContext, Checkpoint, CheckpointerAdapter, EventStream,
    ExecutionEvent, ExecutorAdapter, FrameworkName, FrameworkProbe, InterruptInfo,
    MessageAdapter, StateAdapter, TurnMode, TurnRequest, UniversalInput, UniversalOutput,
};
use crate::config::{AgentConfig, FrameworkSettings};
use crate::error::AdapterError;
use crate::task::TaskState;

pub const FRAMEWORK: &str = "echo";

const DEFAULT_CHUNK_SIZE: usize = 16;
const DEFAULT_ASK_PREFIX: &str = "?";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Tunables, set per framework in `[frameworks.echo]` and overridden per
/// agent in `[agents.<id>.settings]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoSettings {
    pub chunk_size: usize,
    pub ask_prefix: String,
}

impl Default for EchoSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            ask_prefix: DEFAULT_ASK_PREFIX.to_string(),
        }
    }
}

impl EchoSettings {
    /// Apply the keys present in `map` on top of `self`.
    fn overlay(&self, map: &Map<String, Value>) -> Result<Self, String> {
        let mut settings = self.clone();
        if let Some(value) = map.get("chunk_size") {
            settings.chunk_size = value
                .as_u64()
                .filter(|n| *n > 0)
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| format!("chunk_size must be a positive integer, got {value}"))?;
        }
        if let Some(value) = map.get("ask_prefix") {
            settings.ask_prefix = value
                .as_str()
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .ok_or_else(|| format!("ask_prefix must be a non-empty string, got {value}"))?;
        }
        Ok(settings)
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Converts between universal payloads and echo-native messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoMessages;

fn native_message(role: &str, text: &str) -> Value {
    json!({ "role": role, "content": [{ "type": "text", "text": text }] })
}

impl MessageAdapter for EchoMessages {
    fn to_native(&self, input: &UniversalInput) -> Result<Value, AdapterError> {
        Ok(native_message("human", &input.text))
    }

    fn from_native(&self, message: &Value) -> Result<UniversalOutput, AdapterError> {
        let role = match message.get("role").and_then(Value::as_str) {
            Some("ai") => "assistant",
            Some("human") => "user",
            Some(other) => other,
            None => {
                return Err(AdapterError::MessageConversion(format!(
                    "echo message has no role: {message}"
                )));
            }
        };
        let text = match message.get("content") {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Array(blocks)) => blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect(),
            _ => {
                return Err(AdapterError::MessageConversion(format!(
                    "echo message has no content: {message}"
                )));
            }
        };
        Ok(UniversalOutput {
            text,
            role: role.to_string(),
            is_chunk: self.is_streaming_chunk(message),
        })
    }

    fn is_streaming_chunk(&self, message: &Value) -> bool {
        message.get("chunk").and_then(Value::as_bool).unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Reads echo checkpoints: `{"transcript": [...], "pending": {"question": ...} | null}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoState;

impl StateAdapter for EchoState {
    fn snapshot_to_state(&self, snapshot: &Value) -> Result<AgentState, AdapterError> {
        let Some(values) = snapshot.as_object() else {
            return Err(AdapterError::StateRetrieval(format!(
                "echo snapshot is not an object: {snapshot}"
            )));
        };
        let messages = match values.get("transcript") {
            Some(Value::Array(messages)) => messages.clone(),
            None | Some(Value::Null) => Vec::new(),
            Some(other) => {
                return Err(AdapterError::StateRetrieval(format!(
                    "echo transcript is not a list: {other}"
                )));
            }
        };
        let interrupted = values.get("pending").is_some_and(|p| !p.is_null());
        Ok(AgentState {
            values: values.clone(),
            next_steps: if interrupted {
                vec!["answer".to_string()]
            } else {
                Vec::new()
            },
            interrupted,
            messages,
            metadata: Map::new(),
        })
    }

    fn interrupt_info(&self, state: &AgentState) -> Option<InterruptInfo> {
        if !state.interrupted {
            return None;
        }
        let prompt = state
            .values
            .get("pending")
            .and_then(|p| p.get("question"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        Some(InterruptInfo {
            reason: "question".to_string(),
            prompt,
            options: Vec::new(),
            auth: false,
        })
    }

    fn resume_input(
        &self,
        input: &UniversalInput,
        state: &AgentState,
    ) -> Result<Value, AdapterError> {
        let mut message = native_message("human", &input.text);
        if let Some(InterruptInfo {
            prompt: Some(question),
            ..
        }) = self.interrupt_info(state)
        {
            message["answers"] = Value::String(question);
        }
        Ok(message)
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs echo turns for one agent.
#[derive(Debug, Clone)]
pub struct EchoExecutor {
    settings: EchoSettings,
}

impl EchoExecutor {
    pub fn new(settings: EchoSettings) -> Self {
        Self { settings }
    }
}

fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size.max(1)).map(String::from_iter).collect()
}

fn prior_transcript(checkpoint: Option<&Checkpoint>) -> Vec<Value> {
    checkpoint
        .and_then(|c| c.state.get("transcript"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

#[async_trait]
impl ExecutorAdapter for EchoExecutor {
    async fn execute(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, AdapterError> {
        let text = EchoMessages.from_native(&request.native_input)?.text;
        let mut transcript = prior_transcript(request.checkpoint.as_ref());
        transcript.push(request.native_input.clone());

        let question = match request.mode {
            TurnMode::Start => text
                .strip_prefix(self.settings.ask_prefix.as_str())
                .map(|q| q.trim().to_string()),
            TurnMode::Resume => None,
        };
        let chunk_size = self.settings.chunk_size;

        let stream = async_stream::stream! {
            if let Some(question) = question {
                yield ExecutionEvent::Checkpoint(json!({
                    "transcript": transcript,
                    "pending": { "question": question.clone() },
                }));
                yield ExecutionEvent::Interrupt(InterruptInfo {
                    reason: "question".to_string(),
                    prompt: Some(question.clone()),
                    options: Vec::new(),
                    auth: false,
                });
                yield ExecutionEvent::Finished {
                    state: TaskState::InputRequired,
                    message: Some(question),
                };
                return;
            }

            let chunks = chunk_text(&text, chunk_size);
            let streaming = chunks.len() > 1;
            for chunk in chunks {
                if cancel.is_cancelled() {
                    return;
                }
                let mut message = native_message("ai", &chunk);
                message["chunk"] = Value::Bool(streaming);
                yield ExecutionEvent::Message(message);
                tokio::task::yield_now().await;
            }

            transcript.push(native_message("ai", &text));
            yield ExecutionEvent::Checkpoint(json!({
                "transcript": transcript,
                "pending": null,
            }));
            yield ExecutionEvent::Finished {
                state: TaskState::Completed,
                message: None,
            };
        };

        Ok(Box::pin(stream))
    }

    fn state_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "messages": { "type": "array" },
                "pending": { "type": ["object", "null"] },
            },
        }))
    }
}

// ---------------------------------------------------------------------------
// Adapter + probe
// ---------------------------------------------------------------------------

/// Adapter for the echo framework.
pub struct EchoAdapter {
    name: FrameworkName,
    defaults: EchoSettings,
    checkpointer: Arc<dyn CheckpointerAdapter>,
}

impl EchoAdapter {
    pub fn new(defaults: EchoSettings, checkpointer: Arc<dyn CheckpointerAdapter>) -> Self {
        Self {
            name: FrameworkName::builtin(FRAMEWORK),
            defaults,
            checkpointer,
        }
    }

    /// Effective settings for `config`.
    pub fn settings_for(&self, config: &AgentConfig) -> Result<EchoSettings, AdapterError> {
        self.defaults
            .overlay(&config.settings)
            .map_err(|message| AdapterError::configuration(&self.name, message))
    }
}

impl std::fmt::Debug for EchoAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EchoAdapter")
            .field("defaults", &self.defaults)
            .finish()
    }
}

#[async_trait]
impl AgentAdapter for EchoAdapter {
    fn framework_name(&self) -> &FrameworkName {
        &self.name
    }

    fn validate_config(&self, config: &AgentConfig) -> Result<(), AdapterError> {
        self.settings_for(config).map(|_| ())
    }

    async fn create_executor(
        &self,
        config: &AgentConfig,
    ) -> Result<Box<dyn ExecutorAdapter>, AdapterError> {
        Ok(Box::new(EchoExecutor::new(self.settings_for(config)?)))
    }

    fn message_adapter(&self) -> Option<&dyn MessageAdapter> {
        Some(&EchoMessages)
    }

    fn state_adapter(&self) -> Option<&dyn StateAdapter> {
        Some(&EchoState)
    }

    fn checkpointer(&self) -> Option<Arc<dyn CheckpointerAdapter>> {
        Some(Arc::clone(&self.checkpointer))
    }
}

/// Echo runs in process, so it is available unless disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoProbe;

impl FrameworkProbe for EchoProbe {
    fn framework_name(&self) -> FrameworkName {
        FrameworkName::builtin(FRAMEWORK)
    }

    fn is_available(&self, _settings: &FrameworkSettings) -> bool {
        true
    }

    fn build(
        &self,
        settings: &FrameworkSettings,
        ctx: &BootstrapContext,
    ) -> Result<Arc<dyn AgentAdapter>, AdapterError> {
        let defaults = EchoSettings::default()
            .overlay(&settings.options)
            .map_err(|message| AdapterError::configuration(&self.framework_name(), message))?;
        Ok(Arc::new(EchoAdapter::new(
            defaults,
            Arc::clone(&ctx.checkpointer),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointer;
    use crate::task::{ContextId, Task};
    use futures::StreamExt;

    fn adapter() -> EchoAdapter {
        EchoAdapter::new(EchoSettings::default(), Arc::new(MemoryCheckpointer::new()))
    }

    fn agent() -> AgentConfig {
        AgentConfig::new("demo", FrameworkName::builtin(FRAMEWORK))
    }

    fn request(text: &str, mode: TurnMode, checkpoint: Option<Checkpoint>) -> TurnRequest {
        let input = UniversalInput::text(text);
        TurnRequest {
            task: Task::submitted(ContextId::from("ctx")),
            native_input: EchoMessages.to_native(&input).unwrap(),
            input,
            mode,
            checkpoint,
        }
    }

    async fn run(executor: &EchoExecutor, request: TurnRequest) -> Vec<ExecutionEvent> {
        executor
            .execute(request, CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await
    }

    #[test]
    fn message_round_trip_preserves_text() {
        for text in ["", "hello", "multi\nline", "ünïcödé ✓"] {
            let native = EchoMessages.to_native(&UniversalInput::text(text)).unwrap();
            let output = EchoMessages.from_native(&native).unwrap();
            assert_eq!(output.text, text);
            assert_eq!(output.role, "user");
            assert!(!output.is_chunk);
        }
    }

    #[test]
    fn from_native_accepts_plain_string_content() {
        let output = EchoMessages
            .from_native(&json!({"role": "ai", "content": "hi", "chunk": true}))
            .unwrap();
        assert_eq!(output, UniversalOutput {
            text: "hi".to_string(),
            role: "assistant".to_string(),
            is_chunk: true,
        });
    }

    #[test]
    fn from_native_rejects_malformed_messages() {
        for bad in [json!("hi"), json!({"content": "x"}), json!({"role": "ai"})] {
            assert!(matches!(
                EchoMessages.from_native(&bad),
                Err(AdapterError::MessageConversion(_))
            ));
        }
    }

    #[test]
    fn invalid_chunk_size_is_configuration_error() {
        let adapter = adapter();
        for bad in [json!(0), json!(-3), json!("big")] {
            let config = agent().with_setting("chunk_size", bad);
            assert!(matches!(
                adapter.validate_config(&config),
                Err(AdapterError::Configuration { .. })
            ));
        }
        assert!(adapter.validate_config(&agent().with_setting("chunk_size", json!(4))).is_ok());
    }

    #[test]
    fn probe_rejects_invalid_framework_defaults() {
        let mut settings = FrameworkSettings::default();
        settings.options.insert("ask_prefix".to_string(), json!(""));
        let ctx = BootstrapContext {
            checkpointer: Arc::new(MemoryCheckpointer::new()),
        };
        assert!(matches!(
            EchoProbe.build(&settings, &ctx),
            Err(AdapterError::Configuration { .. })
        ));
    }

    #[test]
    fn adapter_provides_every_optional_role() {
        let caps = adapter().capabilities();
        assert!(caps.message && caps.state && caps.checkpointer);
    }

    #[tokio::test]
    async fn reply_is_streamed_in_chunks() {
        let executor = EchoExecutor::new(EchoSettings {
            chunk_size: 4,
            ..EchoSettings::default()
        });
        let events = run(&executor, request("hello world", TurnMode::Start, None)).await;

        let texts: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::Message(m) => Some(EchoMessages.from_native(m).unwrap()),
                _ => None,
            })
            .map(|o| {
                assert!(o.is_chunk);
                o.text
            })
            .collect();
        assert_eq!(texts, vec!["hell", "o wo", "rld"]);
        assert!(matches!(
            events.last(),
            Some(ExecutionEvent::Finished { state: TaskState::Completed, .. })
        ));
    }

    #[tokio::test]
    async fn question_pauses_then_resume_completes() {
        let executor = EchoExecutor::new(EchoSettings::default());
        let events = run(&executor, request("?which color", TurnMode::Start, None)).await;

        let ExecutionEvent::Checkpoint(state) = &events[0] else {
            panic!("expected checkpoint first, got {:?}", events[0]);
        };
        assert_eq!(state["pending"]["question"], "which color");
        assert!(matches!(&events[1], ExecutionEvent::Interrupt(i) if i.prompt.as_deref() == Some("which color")));
        assert!(matches!(
            events[2],
            ExecutionEvent::Finished { state: TaskState::InputRequired, .. }
        ));

        let task = Task::submitted(ContextId::from("ctx"));
        let checkpoint = Checkpoint::next(&task, None, state.clone());
        let agent_state = EchoState.snapshot_to_state(&checkpoint.state).unwrap();
        assert!(agent_state.interrupted);
        let native = EchoState
            .resume_input(&UniversalInput::text("blue"), &agent_state)
            .unwrap();
        assert_eq!(native["answers"], "which color");

        let mut resume = request("blue", TurnMode::Resume, Some(checkpoint));
        resume.native_input = native;
        let events = run(&executor, resume).await;
        let Some(ExecutionEvent::Checkpoint(state)) = events.iter().rev().nth(1) else {
            panic!("expected checkpoint before finish");
        };
        assert!(state["pending"].is_null());
        // human question, human answer, ai reply
        assert_eq!(state["transcript"].as_array().unwrap().len(), 3);
        assert!(matches!(
            events.last(),
            Some(ExecutionEvent::Finished { state: TaskState::Completed, .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_executor_stops_emitting() {
        let executor = EchoExecutor::new(EchoSettings {
            chunk_size: 1,
            ..EchoSettings::default()
        });
        let cancel = CancellationToken::new();
        let mut stream = executor
            .execute(request("abcdef", TurnMode::Start, None), cancel.clone())
            .await
            .unwrap();
        assert!(matches!(stream.next().await, Some(ExecutionEvent::Message(_))));
        cancel.cancel();
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn state_schema_exposes_messages() {
        let schema = EchoExecutor::new(EchoSettings::default())
            .state_schema()
            .unwrap();
        assert!(EchoState.has_property(&schema, "messages"));
        assert!(!EchoState.has_property(&schema, "memory"));
    }

    #[test]
    fn snapshot_must_be_an_object() {
        assert!(matches!(
            EchoState.snapshot_to_state(&json!([1, 2])),
            Err(AdapterError::StateRetrieval(_))
        ));
    }
}
