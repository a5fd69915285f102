//! Subprocess framework adapter.
//!
//! Runs an external agent command per turn. The adapter writes one JSON
//! request line to the child's stdin and parses its stdout as JSON lines
//! into [`ExecutionEvent`] variants.
//!
//! Request line:
//!
//! ```json
//! {"type":"turn","mode":"start","task_id":"...","context_id":"...","input":{...},"checkpoint":null}
//! ```
//!
//! Recognised output lines (by `type`): `assistant`, `state`, `checkpoint`,
//! `interrupt`, `auth_required`, `result`, `error`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapter::{
    AgentAdapter, AgentState, BootstrapContext, CheckpointerAdapter, EventStream, ExecutionEvent,
    ExecutorAdapter, FrameworkName, FrameworkProbe, InterruptInfo, MessageAdapter, StateAdapter,
    TurnMode, TurnRequest, UniversalInput, UniversalOutput,
};
use crate::config::{AgentConfig, FrameworkSettings};
use crate::error::AdapterError;
use crate::task::TaskState;

pub const FRAMEWORK: &str = "subprocess";

/// How long a child gets to exit after SIGTERM before it is killed.
const KILL_GRACE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// JSONL parsing helpers
// ---------------------------------------------------------------------------

fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str)
}

fn interrupt_from(v: &Value, auth: bool) -> InterruptInfo {
    InterruptInfo {
        reason: str_field(v, "reason")
            .unwrap_or(if auth {
                "authentication required"
            } else {
                "input required"
            })
            .to_string(),
        prompt: str_field(v, "prompt").map(str::to_owned),
        options: v
            .get("options")
            .and_then(Value::as_array)
            .map(|opts| {
                opts.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default(),
        auth,
    }
}

/// Parse one stdout line into zero or more events.
///
/// Returns `Err` if the line is not valid JSON. Callers treat that as a
/// warning and keep reading.
fn parse_output_line(line: &str) -> Result<Vec<ExecutionEvent>, serde_json::Error> {
    let v: Value = serde_json::from_str(line)?;
    let mut events = Vec::new();

    match str_field(&v, "type").unwrap_or("") {
        "assistant" => events.push(ExecutionEvent::Message(v.clone())),

        "state" => {
            let values = v.get("values").cloned().unwrap_or(Value::Null);
            events.push(ExecutionEvent::StateUpdate(values));
        }

        "checkpoint" => {
            let state = v.get("state").cloned().unwrap_or(Value::Null);
            events.push(ExecutionEvent::Checkpoint(state));
        }

        "interrupt" => {
            let info = interrupt_from(&v, false);
            events.push(ExecutionEvent::Interrupt(info));
            events.push(ExecutionEvent::Finished {
                state: TaskState::InputRequired,
                message: str_field(&v, "prompt").map(str::to_owned),
            });
        }

        "auth_required" => {
            let info = interrupt_from(&v, true);
            events.push(ExecutionEvent::Interrupt(info));
            events.push(ExecutionEvent::Finished {
                state: TaskState::AuthRequired,
                message: str_field(&v, "prompt").map(str::to_owned),
            });
        }

        "result" => {
            // A final text, if any, is delivered as one more assistant message.
            if let Some(text) = str_field(&v, "result") {
                events.push(ExecutionEvent::Message(assistant_line(text)));
            }
            let status = str_field(&v, "status").unwrap_or("completed");
            match status.parse::<TaskState>() {
                Ok(state) => events.push(ExecutionEvent::Finished {
                    state,
                    message: str_field(&v, "message").map(str::to_owned),
                }),
                Err(e) => events.push(ExecutionEvent::Error {
                    message: format!("agent reported {e}"),
                }),
            }
        }

        "error" => {
            let message = v
                .get("error")
                .and_then(|e| str_field(e, "message"))
                .or_else(|| str_field(&v, "message"))
                .unwrap_or("unknown error")
                .to_string();
            events.push(ExecutionEvent::Error { message });
        }

        other => {
            debug!(event_type = other, "ignoring unrecognised output line type");
        }
    }

    Ok(events)
}

fn assistant_line(text: &str) -> Value {
    json!({
        "type": "assistant",
        "message": { "role": "assistant", "content": [{ "type": "text", "text": text }] },
    })
}

// ---------------------------------------------------------------------------
// Messages and state
// ---------------------------------------------------------------------------

/// Converts between universal payloads and the subprocess line format.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubprocessMessages;

impl MessageAdapter for SubprocessMessages {
    fn to_native(&self, input: &UniversalInput) -> Result<Value, AdapterError> {
        Ok(json!({
            "role": "user",
            "content": [{ "type": "text", "text": input.text }],
        }))
    }

    fn from_native(&self, message: &Value) -> Result<UniversalOutput, AdapterError> {
        // Accept a whole `assistant` line or the bare message inside it.
        let inner = message.get("message").unwrap_or(message);
        let Some(content) = inner.get("content") else {
            return Err(AdapterError::MessageConversion(format!(
                "agent message has no content: {message}"
            )));
        };
        let text = match content {
            Value::String(text) => text.clone(),
            Value::Array(blocks) => blocks
                .iter()
                .filter(|block| str_field(block, "type") == Some("text"))
                .filter_map(|block| str_field(block, "text"))
                .collect(),
            other => {
                return Err(AdapterError::MessageConversion(format!(
                    "unsupported content shape: {other}"
                )));
            }
        };
        Ok(UniversalOutput {
            text,
            role: str_field(inner, "role").unwrap_or("assistant").to_string(),
            is_chunk: self.is_streaming_chunk(message),
        })
    }

    fn is_streaming_chunk(&self, message: &Value) -> bool {
        message
            .get("partial")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Reads checkpoint payloads written by the agent.
///
/// The expected shape is `{"values": {...}, "next": [...], "interrupt": {...}}`;
/// every key is optional.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubprocessState;

impl StateAdapter for SubprocessState {
    fn snapshot_to_state(&self, snapshot: &Value) -> Result<AgentState, AdapterError> {
        let Some(object) = snapshot.as_object() else {
            return Err(AdapterError::StateRetrieval(format!(
                "agent checkpoint is not an object: {snapshot}"
            )));
        };
        let values = object
            .get("values")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let next_steps = object
            .get("next")
            .and_then(Value::as_array)
            .map(|steps| {
                steps
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        let interrupt = object.get("interrupt").filter(|v| !v.is_null());
        let mut metadata = Map::new();
        if let Some(interrupt) = interrupt {
            metadata.insert("interrupt".to_string(), interrupt.clone());
        }
        Ok(AgentState {
            values,
            next_steps,
            interrupted: interrupt.is_some(),
            messages: object
                .get("messages")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            metadata,
        })
    }

    fn interrupt_info(&self, state: &AgentState) -> Option<InterruptInfo> {
        if !state.interrupted {
            return None;
        }
        let raw = state.metadata.get("interrupt").cloned().unwrap_or(Value::Null);
        let auth = raw.get("auth").and_then(Value::as_bool).unwrap_or(false);
        Some(interrupt_from(&raw, auth))
    }

    fn resume_input(
        &self,
        input: &UniversalInput,
        state: &AgentState,
    ) -> Result<Value, AdapterError> {
        let mut native = SubprocessMessages.to_native(input)?;
        if let Some(info) = self.interrupt_info(state) {
            native["resume"] = json!({ "reason": info.reason, "prompt": info.prompt });
        }
        Ok(native)
    }
}

// ---------------------------------------------------------------------------
// Process control
// ---------------------------------------------------------------------------

/// Ask `child` to stop with SIGTERM, then kill it if it outlives the grace
/// period.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: pid belongs to a child we spawned and have not reaped.
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                warn!(pid, "SIGTERM failed, proceeding to SIGKILL");
            }
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!(%status, "agent process exited after SIGTERM"),
        _ => {
            debug!("agent process did not exit after SIGTERM, sending SIGKILL");
            let _ = child.kill().await;
        }
    }
}

fn request_line(request: &TurnRequest) -> Value {
    let mode = match request.mode {
        TurnMode::Start => "start",
        TurnMode::Resume => "resume",
    };
    json!({
        "type": "turn",
        "mode": mode,
        "task_id": request.task.id,
        "context_id": request.task.context_id,
        "input": request.native_input,
        "checkpoint": request.checkpoint.as_ref().map(|c| &c.state),
    })
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Command line and environment for one hosted agent.
#[derive(Debug, Clone)]
pub struct SubprocessExecutor {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    grace: Duration,
}

impl SubprocessExecutor {
    fn spawn(&self) -> Result<Child, AdapterError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd.spawn().map_err(|e| {
            AdapterError::Execution(format!(
                "failed to spawn agent command '{}': {e}",
                self.program.display()
            ))
        })
    }
}

#[async_trait]
impl ExecutorAdapter for SubprocessExecutor {
    async fn execute(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, AdapterError> {
        let mut child = self.spawn()?;
        let task_id = request.task.id.clone();

        // Hand over the request, then close stdin so the agent sees EOF.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AdapterError::Execution("agent stdin not captured".to_string()))?;
        let mut line = request_line(&request).to_string();
        line.push('\n');
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            warn!(task_id = %task_id, error = %e, "failed to write request to agent stdin");
        }
        drop(stdin);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AdapterError::Execution("agent stdout not captured".to_string()))?;
        let grace = self.grace;

        let stream = async_stream::stream! {
            let mut lines = BufReader::new(stdout).lines();

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => None,
                    next = lines.next_line() => Some(next),
                };
                let Some(next) = next else {
                    debug!(task_id = %task_id, "turn cancelled, stopping agent process");
                    terminate(&mut child, grace).await;
                    return;
                };

                match next {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        let events = match parse_output_line(trimmed) {
                            Ok(events) => events,
                            Err(e) => {
                                warn!(line = trimmed, error = %e, "skipping malformed JSONL line");
                                continue;
                            }
                        };
                        for event in events {
                            let finished = matches!(event, ExecutionEvent::Finished { .. });
                            yield event;
                            if finished {
                                terminate(&mut child, grace).await;
                                return;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "error reading agent stdout");
                        yield ExecutionEvent::Error {
                            message: format!("stdout read error: {e}"),
                        };
                        terminate(&mut child, grace).await;
                        return;
                    }
                }
            }

            // EOF without a result line: the exit status decides.
            let last = match child.wait().await {
                Ok(status) if status.success() => ExecutionEvent::Finished {
                    state: TaskState::Completed,
                    message: None,
                },
                Ok(status) => ExecutionEvent::Error {
                    message: format!("agent exited with {status}"),
                },
                Err(e) => ExecutionEvent::Error {
                    message: format!("failed to wait for agent: {e}"),
                },
            };
            yield last;
        };

        Ok(Box::pin(stream))
    }
}

// ---------------------------------------------------------------------------
// Adapter + probe
// ---------------------------------------------------------------------------

/// Adapter for agents that run as external commands.
pub struct SubprocessAdapter {
    name: FrameworkName,
    program: PathBuf,
    args: Vec<String>,
    checkpointer: Arc<dyn CheckpointerAdapter>,
}

impl SubprocessAdapter {
    pub fn new(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        checkpointer: Arc<dyn CheckpointerAdapter>,
    ) -> Self {
        Self {
            name: FrameworkName::builtin(FRAMEWORK),
            program: program.into(),
            args,
            checkpointer,
        }
    }

    /// Extra arguments and environment from an agent's settings.
    fn agent_overrides(
        &self,
        config: &AgentConfig,
    ) -> Result<(Vec<String>, Vec<(String, String)>), AdapterError> {
        let args = match config.settings.get("args") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_owned))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| AdapterError::configuration(&self.name, "args must be strings"))?,
            Some(_) => {
                return Err(AdapterError::configuration(&self.name, "args must be a list"));
            }
        };
        let env = match config.settings.get("env") {
            None => Vec::new(),
            Some(Value::Object(vars)) => vars
                .iter()
                .map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_owned())))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    AdapterError::configuration(&self.name, "env values must be strings")
                })?,
            Some(_) => {
                return Err(AdapterError::configuration(&self.name, "env must be a table"));
            }
        };
        Ok((args, env))
    }
}

impl std::fmt::Debug for SubprocessAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubprocessAdapter")
            .field("program", &self.program)
            .field("args", &self.args)
            .finish()
    }
}

#[async_trait]
impl AgentAdapter for SubprocessAdapter {
    fn framework_name(&self) -> &FrameworkName {
        &self.name
    }

    fn validate_config(&self, config: &AgentConfig) -> Result<(), AdapterError> {
        self.agent_overrides(config).map(|_| ())
    }

    async fn create_executor(
        &self,
        config: &AgentConfig,
    ) -> Result<Box<dyn ExecutorAdapter>, AdapterError> {
        let (extra_args, env) = self.agent_overrides(config)?;
        let mut args = self.args.clone();
        args.extend(extra_args);
        Ok(Box::new(SubprocessExecutor {
            program: self.program.clone(),
            args,
            env,
            grace: KILL_GRACE,
        }))
    }

    fn message_adapter(&self) -> Option<&dyn MessageAdapter> {
        Some(&SubprocessMessages)
    }

    fn state_adapter(&self) -> Option<&dyn StateAdapter> {
        Some(&SubprocessState)
    }

    fn checkpointer(&self) -> Option<Arc<dyn CheckpointerAdapter>> {
        Some(Arc::clone(&self.checkpointer))
    }

    fn metadata(&self) -> Value {
        json!({
            "framework": self.name,
            "capabilities": self.capabilities(),
            "command": self.program,
        })
    }
}

/// Available when the configured command resolves on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubprocessProbe;

impl FrameworkProbe for SubprocessProbe {
    fn framework_name(&self) -> FrameworkName {
        FrameworkName::builtin(FRAMEWORK)
    }

    fn is_available(&self, settings: &FrameworkSettings) -> bool {
        settings
            .command
            .as_deref()
            .is_some_and(|command| which::which(command).is_ok())
    }

    fn build(
        &self,
        settings: &FrameworkSettings,
        ctx: &BootstrapContext,
    ) -> Result<Arc<dyn AgentAdapter>, AdapterError> {
        let name = self.framework_name();
        let command = settings
            .command
            .as_deref()
            .ok_or_else(|| AdapterError::configuration(&name, "command is required"))?;
        let program = which::which(command).map_err(|e| {
            AdapterError::configuration(&name, format!("command '{command}' not found: {e}"))
        })?;
        Ok(Arc::new(SubprocessAdapter::new(
            program,
            settings.args.clone(),
            Arc::clone(&ctx.checkpointer),
        )))
    }
}
