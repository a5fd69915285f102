//! Dispatch flow: request -> registry lookup -> executor -> checkpointer ->
//! message translation.
//!
//! The [`Dispatcher`] owns no tasks. Each call to
//! [`Dispatcher::start_turn`] classifies the task it is handed, prepares the
//! framework-native input, and returns a [`Turn`]: a lazy stream of
//! [`TurnEvent`]s that always ends with exactly one terminal
//! [`TurnEvent::Status`] and can be cancelled at any point.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::adapter::{
    AdapterRegistry, AgentAdapter, AgentState, Checkpoint, CheckpointerAdapter, ExecutionEvent,
    ExecutorAdapter, FrameworkName, InterruptInfo, TurnMode, TurnRequest, UniversalInput,
    UniversalOutput,
};
use crate::config::AgentConfig;
use crate::error::{AdapterError, ErrorResponse};
use crate::lifecycle::{Disposition, TaskClassifier};
use crate::task::{ContextId, Task, TaskId, TaskState, TaskStatus};

/// How long a cancelled executor gets to wind down before its stream is
/// dropped.
const CANCEL_DRAIN: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Hosted agents
// ---------------------------------------------------------------------------

/// Optional features detected from the executor's state schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentFeatures {
    /// The state carries a `messages` list, so replies can be streamed.
    pub streaming: bool,
    /// The state carries a `memory` entry kept across turns.
    pub memory: bool,
}

/// An agent loaded from config and ready to run turns.
#[derive(Clone)]
pub struct HostedAgent {
    config: AgentConfig,
    adapter: Arc<dyn AgentAdapter>,
    executor: Arc<dyn ExecutorAdapter>,
    features: AgentFeatures,
}

impl HostedAgent {
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn framework(&self) -> &FrameworkName {
        self.adapter.framework_name()
    }

    pub fn adapter(&self) -> &Arc<dyn AgentAdapter> {
        &self.adapter
    }

    pub fn features(&self) -> AgentFeatures {
        self.features
    }

    /// Public description of the agent.
    pub fn card(&self) -> Value {
        serde_json::json!({
            "id": self.config.id,
            "name": self.config.name,
            "description": self.config.description,
            "version": self.config.version,
            "framework": self.framework(),
            "capabilities": self.adapter.capabilities(),
            "features": self.features,
        })
    }
}

impl std::fmt::Debug for HostedAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedAgent")
            .field("id", &self.config.id)
            .field("framework", self.framework())
            .field("features", &self.features)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Turns
// ---------------------------------------------------------------------------

/// Event surfaced to the request layer while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// The task moved to a new status.
    Status(TaskStatus),
    /// Output from the agent, already in universal form.
    Output(UniversalOutput),
    /// The framework reported new state.
    State(AgentState),
    /// The framework paused and waits for the caller.
    Interrupt(InterruptInfo),
    /// A per-request error. The turn still ends with a status.
    Error(ErrorResponse),
}

/// Everything a finished turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Task as of the final status.
    pub task: Task,
    pub outputs: Vec<UniversalOutput>,
    pub interrupt: Option<InterruptInfo>,
    pub errors: Vec<ErrorResponse>,
}

impl TurnOutcome {
    /// Concatenated text of every non-user output.
    pub fn text(&self) -> String {
        self.outputs
            .iter()
            .filter(|o| o.role != "user")
            .map(|o| o.text.as_str())
            .collect()
    }
}

type TurnStream = Pin<Box<dyn Stream<Item = TurnEvent> + Send>>;

/// One running turn of a task.
///
/// The event stream is lazy: nothing happens until [`Turn::next`] or
/// [`Turn::collect`] is polled.
pub struct Turn {
    task: Task,
    mode: TurnMode,
    cancel: CancellationToken,
    events: TurnStream,
}

impl Turn {
    /// The task as of the last status event seen.
    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn mode(&self) -> TurnMode {
        self.mode
    }

    /// Stop the turn. The stream ends with a `canceled` status.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this turn, for wiring to signal handlers.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn next(&mut self) -> Option<TurnEvent> {
        let event = self.events.next().await?;
        if let TurnEvent::Status(status) = &event {
            self.task.status = status.clone();
        }
        Some(event)
    }

    /// Drive the turn to the end.
    pub async fn collect(mut self) -> TurnOutcome {
        let mut outputs = Vec::new();
        let mut interrupt = None;
        let mut errors = Vec::new();
        while let Some(event) = self.next().await {
            match event {
                TurnEvent::Output(output) => outputs.push(output),
                TurnEvent::Interrupt(info) => interrupt = Some(info),
                TurnEvent::Error(error) => errors.push(error),
                TurnEvent::Status(_) | TurnEvent::State(_) => {}
            }
        }
        TurnOutcome {
            task: self.task,
            outputs,
            interrupt,
            errors,
        }
    }
}

impl std::fmt::Debug for Turn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Turn")
            .field("task_id", &self.task.id)
            .field("mode", &self.mode)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// One request from the transport layer.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub agent: AgentConfig,
    /// Current task in the conversation, if there is one.
    pub task: Option<Task>,
    pub context_id: ContextId,
    pub input: UniversalInput,
}

/// Routes requests to framework adapters.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<AdapterRegistry>,
    classifier: TaskClassifier,
}

impl Dispatcher {
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self {
            registry,
            classifier: TaskClassifier::default(),
        }
    }

    /// Use a status mapping other than A2A.
    pub fn with_classifier(mut self, classifier: TaskClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Adapter that handles `task` for `framework`.
    ///
    /// A paused task can only be continued by the framework that paused it.
    pub fn resolve(
        &self,
        framework: &FrameworkName,
        task: &Task,
    ) -> Result<Arc<dyn AgentAdapter>, AdapterError> {
        check_task_framework(framework, task, &self.classifier)?;
        let adapter = self.registry.get(framework.as_str())?;
        tracing::debug!(framework = %framework, task_id = %task.id, "resolved adapter");
        Ok(adapter)
    }

    /// Validate `config` and build its executor.
    pub async fn load_agent(&self, config: &AgentConfig) -> Result<HostedAgent, AdapterError> {
        let adapter = self.registry.get(config.framework.as_str())?;
        adapter.validate_config(config)?;
        let executor: Arc<dyn ExecutorAdapter> = adapter.create_executor(config).await?.into();
        let features = detect_features(adapter.as_ref(), executor.as_ref());

        tracing::info!(
            agent = %config.id,
            framework = %config.framework,
            capabilities = %adapter.capabilities(),
            streaming = features.streaming,
            memory = features.memory,
            "agent loaded"
        );

        Ok(HostedAgent {
            config: config.clone(),
            adapter,
            executor,
            features,
        })
    }

    /// Begin a turn of `agent`.
    ///
    /// - A resumable `task` is continued from its last checkpoint.
    /// - An interrupted `task` is refused with
    ///   [`AdapterError::OperatorRequired`].
    /// - Otherwise a new task is submitted in `context_id`.
    pub async fn start_turn(
        &self,
        agent: &HostedAgent,
        task: Option<Task>,
        context_id: ContextId,
        input: UniversalInput,
    ) -> Result<Turn, AdapterError> {
        let framework = agent.framework().clone();

        let (mut task, mode) = match (self.classifier.disposition(task.as_ref()), task) {
            (Disposition::OperatorRequired, Some(task)) => {
                tracing::warn!(
                    task_id = %task.id,
                    state = %task.state(),
                    "task is interrupted, refusing to continue"
                );
                return Err(AdapterError::OperatorRequired {
                    task_id: task.id.to_string(),
                    state: task.state().to_string(),
                });
            }
            (Disposition::Resume, Some(task)) => {
                check_task_framework(&framework, &task, &self.classifier)?;
                (task, TurnMode::Resume)
            }
            _ => (Task::submitted(context_id), TurnMode::Start),
        };
        task.framework = Some(framework.clone());

        let messages = agent
            .adapter
            .message_adapter()
            .ok_or_else(|| AdapterError::unsupported(&framework, "message conversion"))?;
        let checkpointer = agent.adapter.checkpointer();

        let checkpoint = match (mode, &checkpointer) {
            (TurnMode::Resume, Some(store)) => {
                let checkpoint = store.load(&task.id).await?;
                if checkpoint.is_none() {
                    tracing::warn!(
                        framework = %framework,
                        task_id = %task.id,
                        "no checkpoint saved for resumed task, continuing from input alone"
                    );
                }
                checkpoint
            }
            _ => None,
        };
        let native_input = match (agent.adapter.state_adapter(), &checkpoint) {
            (Some(state), Some(checkpoint)) if mode == TurnMode::Resume => {
                let snapshot = state.snapshot_to_state(&checkpoint.state)?;
                state.resume_input(&input, &snapshot)?
            }
            _ => messages.to_native(&input)?,
        };

        tracing::info!(
            framework = %framework,
            task_id = %task.id,
            mode = ?mode,
            resumed_from = ?checkpoint.as_ref().map(|c| c.id),
            "starting turn"
        );

        let request = TurnRequest {
            task: task.clone(),
            input,
            native_input,
            mode,
            checkpoint,
        };
        let cancel = CancellationToken::new();
        let events = run_turn(
            Arc::clone(&agent.adapter),
            Arc::clone(&agent.executor),
            checkpointer,
            request,
            cancel.clone(),
        );

        Ok(Turn {
            task,
            mode,
            cancel,
            events,
        })
    }

    /// Resolve, load and start in one step, reporting failures as an
    /// [`ErrorResponse`] for the request layer.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<Turn, ErrorResponse> {
        let agent_id = request.agent.id.clone();
        self.try_dispatch(request).await.map_err(|e| {
            tracing::warn!(agent = %agent_id, error = %e, "request rejected");
            e.to_response()
        })
    }

    async fn try_dispatch(&self, request: DispatchRequest) -> Result<Turn, AdapterError> {
        if let Some(task) = &request.task {
            self.resolve(&request.agent.framework, task)?;
        }
        let agent = self.load_agent(&request.agent).await?;
        self.start_turn(&agent, request.task, request.context_id, request.input)
            .await
    }
}

fn check_task_framework(
    framework: &FrameworkName,
    task: &Task,
    classifier: &TaskClassifier,
) -> Result<(), AdapterError> {
    match &task.framework {
        Some(owner) if owner != framework && classifier.is_resumable(task) => Err(
            AdapterError::unsupported(framework, format!("resume a task paused by '{owner}'")),
        ),
        _ => Ok(()),
    }
}

fn detect_features(adapter: &dyn AgentAdapter, executor: &dyn ExecutorAdapter) -> AgentFeatures {
    match (adapter.state_adapter(), executor.state_schema()) {
        (Some(state), Some(schema)) => AgentFeatures {
            streaming: state.has_property(&schema, "messages"),
            memory: state.has_property(&schema, "memory"),
        },
        _ => AgentFeatures::default(),
    }
}

/// Remove the task's checkpoints once its turn has ended for good.
async fn clear_checkpoints(checkpointer: Option<&dyn CheckpointerAdapter>, task_id: &TaskId) {
    let Some(store) = checkpointer else {
        return;
    };
    if let Err(e) = store.delete(task_id).await {
        tracing::warn!(task_id = %task_id, error = %e, "failed to clear checkpoint");
    }
}

fn failed(message: impl Into<String>) -> [TurnEvent; 2] {
    [
        TurnEvent::Error(AdapterError::Execution(message.into()).to_response()),
        TurnEvent::Status(TaskStatus::new(TaskState::Failed)),
    ]
}

/// Translate an executor's event stream into turn events.
fn run_turn(
    adapter: Arc<dyn AgentAdapter>,
    executor: Arc<dyn ExecutorAdapter>,
    checkpointer: Option<Arc<dyn CheckpointerAdapter>>,
    request: TurnRequest,
    cancel: CancellationToken,
) -> TurnStream {
    let stream = async_stream::stream! {
        let task = request.task.clone();
        let framework = adapter.framework_name().clone();

        yield TurnEvent::Status(TaskStatus::new(TaskState::Working));

        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            started = executor.execute(request, cancel.clone()) => Some(started),
        };
        let mut events = match started {
            None => {
                tracing::info!(framework = %framework, task_id = %task.id, "turn cancelled");
                clear_checkpoints(checkpointer.as_deref(), &task.id).await;
                yield TurnEvent::Status(TaskStatus::new(TaskState::Canceled));
                return;
            }
            Some(Ok(events)) => events,
            Some(Err(e)) => {
                tracing::warn!(framework = %framework, task_id = %task.id, error = %e, "executor failed to start");
                clear_checkpoints(checkpointer.as_deref(), &task.id).await;
                yield TurnEvent::Error(e.to_response());
                yield TurnEvent::Status(TaskStatus::new(TaskState::Failed));
                return;
            }
        };

        let mut last_checkpoint: Option<Checkpoint> = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = events.next() => Some(next),
            };

            let Some(next) = next else {
                tracing::info!(framework = %framework, task_id = %task.id, "turn cancelled");
                // Let the executor observe the token and clean up.
                let _ = tokio::time::timeout(CANCEL_DRAIN, events.by_ref().for_each(|_| async {})).await;
                clear_checkpoints(checkpointer.as_deref(), &task.id).await;
                yield TurnEvent::Status(TaskStatus::new(TaskState::Canceled));
                return;
            };

            let Some(event) = next else {
                tracing::warn!(framework = %framework, task_id = %task.id, "executor stream ended without finishing");
                clear_checkpoints(checkpointer.as_deref(), &task.id).await;
                for event in failed("agent stopped without reporting a result") {
                    yield event;
                }
                return;
            };

            match event {
                ExecutionEvent::Message(native) => {
                    let converted = adapter
                        .message_adapter()
                        .ok_or_else(|| AdapterError::unsupported(&framework, "message conversion"))
                        .and_then(|messages| messages.from_native(&native));
                    match converted {
                        Ok(output) => {
                            yield TurnEvent::Output(output);
                        }
                        Err(e) => {
                            tracing::warn!(task_id = %task.id, error = %e, "dropping unconvertible message");
                            yield TurnEvent::Error(e.to_response());
                        }
                    }
                }

                ExecutionEvent::StateUpdate(values) => {
                    let Some(state) = adapter.state_adapter() else {
                        tracing::debug!(task_id = %task.id, "state update ignored, no state adapter");
                        continue;
                    };
                    match state.snapshot_to_state(&values) {
                        Ok(snapshot) => {
                            yield TurnEvent::State(snapshot);
                        }
                        Err(e) => {
                            tracing::warn!(task_id = %task.id, error = %e, "unreadable state update");
                        }
                    }
                }

                ExecutionEvent::Checkpoint(state) => {
                    let Some(store) = &checkpointer else {
                        tracing::debug!(task_id = %task.id, "checkpoint ignored, no checkpointer");
                        continue;
                    };
                    let checkpoint = Checkpoint::next(&task, last_checkpoint.as_ref(), state);
                    // Awaited in order, so one turn never has two writes in flight.
                    if let Err(e) = store.save(&task.id, checkpoint.clone()).await {
                        tracing::warn!(task_id = %task.id, error = %e, "checkpoint save failed");
                        clear_checkpoints(checkpointer.as_deref(), &task.id).await;
                        yield TurnEvent::Error(e.to_response());
                        yield TurnEvent::Status(TaskStatus::new(TaskState::Failed));
                        return;
                    }
                    tracing::debug!(task_id = %task.id, checkpoint_id = %checkpoint.id, "checkpoint saved");
                    last_checkpoint = Some(checkpoint);
                }

                ExecutionEvent::Interrupt(info) => {
                    tracing::info!(task_id = %task.id, reason = %info.reason, "agent paused");
                    yield TurnEvent::Interrupt(info);
                }

                ExecutionEvent::Error { message } => {
                    tracing::warn!(framework = %framework, task_id = %task.id, error = %message, "execution error");
                    clear_checkpoints(checkpointer.as_deref(), &task.id).await;
                    for event in failed(message) {
                        yield event;
                    }
                    return;
                }

                ExecutionEvent::Finished { state, message } => {
                    if matches!(state, TaskState::Submitted | TaskState::Working) {
                        tracing::warn!(framework = %framework, task_id = %task.id, state = %state, "agent finished in a non-final state");
                        clear_checkpoints(checkpointer.as_deref(), &task.id).await;
                        for event in failed(format!("agent finished while still {state}")) {
                            yield event;
                        }
                        return;
                    }
                    if state.is_terminal() {
                        clear_checkpoints(checkpointer.as_deref(), &task.id).await;
                    }
                    tracing::info!(framework = %framework, task_id = %task.id, state = %state, "turn finished");
                    yield TurnEvent::Status(TaskStatus {
                        state,
                        message,
                        timestamp: chrono::Utc::now(),
                    });
                    return;
                }
            }
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::RegistryBuilder;
    use crate::checkpoint::MemoryCheckpointer;
    use crate::frameworks::{EchoAdapter, EchoSettings};

    fn dispatcher_with_echo() -> (Dispatcher, Arc<MemoryCheckpointer>) {
        let store = Arc::new(MemoryCheckpointer::new());
        let mut builder = RegistryBuilder::new();
        builder
            .register(EchoAdapter::new(
                EchoSettings::default(),
                Arc::clone(&store) as Arc<dyn CheckpointerAdapter>,
            ))
            .unwrap();
        (Dispatcher::new(Arc::new(builder.freeze())), store)
    }

    fn echo_agent() -> AgentConfig {
        AgentConfig::new("demo", FrameworkName::new("echo").unwrap())
    }

    #[tokio::test]
    async fn new_turn_completes_and_echoes() {
        let (dispatcher, store) = dispatcher_with_echo();
        let agent = dispatcher.load_agent(&echo_agent()).await.unwrap();
        assert!(agent.features().streaming);
        assert!(!agent.features().memory);

        let turn = dispatcher
            .start_turn(&agent, None, ContextId::from("ctx"), UniversalInput::text("hello"))
            .await
            .unwrap();
        assert_eq!(turn.mode(), TurnMode::Start);

        let outcome = turn.collect().await;
        assert_eq!(outcome.task.state(), TaskState::Completed);
        assert_eq!(outcome.text(), "hello");
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.task.framework.as_ref().unwrap().as_str(), "echo");
        // Terminal tasks leave no checkpoint behind.
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn paused_task_resumes_from_checkpoint() {
        let (dispatcher, store) = dispatcher_with_echo();
        let agent = dispatcher.load_agent(&echo_agent()).await.unwrap();

        let first = dispatcher
            .start_turn(&agent, None, ContextId::from("ctx"), UniversalInput::text("?name"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(first.task.state(), TaskState::InputRequired);
        assert_eq!(first.interrupt.unwrap().prompt.as_deref(), Some("name"));
        assert_eq!(store.len().await, 1);

        let turn = dispatcher
            .start_turn(
                &agent,
                Some(first.task.clone()),
                ContextId::from("ctx"),
                UniversalInput::text("Ada"),
            )
            .await
            .unwrap();
        assert_eq!(turn.mode(), TurnMode::Resume);
        assert_eq!(turn.task().id, first.task.id);

        let second = turn.collect().await;
        assert_eq!(second.task.id, first.task.id);
        assert_eq!(second.task.state(), TaskState::Completed);
        assert_eq!(second.text(), "Ada");
    }

    #[tokio::test]
    async fn interrupted_task_requires_operator() {
        let (dispatcher, _) = dispatcher_with_echo();
        let agent = dispatcher.load_agent(&echo_agent()).await.unwrap();
        let mut task = Task::submitted(ContextId::from("ctx"));
        task.set_status(TaskState::Unknown, None);

        let err = dispatcher
            .start_turn(&agent, Some(task), ContextId::from("ctx"), UniversalInput::text("x"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AdapterError::OperatorRequired { ref state, .. } if state == "unknown"));
    }

    #[tokio::test]
    async fn completed_task_starts_a_new_one() {
        let (dispatcher, _) = dispatcher_with_echo();
        let agent = dispatcher.load_agent(&echo_agent()).await.unwrap();
        let mut done = Task::submitted(ContextId::from("ctx"));
        done.set_status(TaskState::Completed, None);

        let turn = dispatcher
            .start_turn(&agent, Some(done.clone()), ContextId::from("ctx"), UniversalInput::text("again"))
            .await
            .unwrap();
        assert_eq!(turn.mode(), TurnMode::Start);
        assert_ne!(turn.task().id, done.id);
    }

    #[tokio::test]
    async fn resolve_unknown_framework() {
        let (dispatcher, _) = dispatcher_with_echo();
        let task = Task::submitted(ContextId::from("ctx"));
        let err = dispatcher
            .resolve(&FrameworkName::new("langgraph").unwrap(), &task)
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::FrameworkNotAvailable);
    }

    #[tokio::test]
    async fn resolve_refuses_cross_framework_resume() {
        let (dispatcher, _) = dispatcher_with_echo();
        let mut task = Task::submitted(ContextId::from("ctx"));
        task.framework = Some(FrameworkName::new("other").unwrap());
        task.set_status(TaskState::InputRequired, None);
        let err = dispatcher
            .resolve(&FrameworkName::new("echo").unwrap(), &task)
            .err()
            .unwrap();
        assert!(matches!(err, AdapterError::UnsupportedOperation { .. }));
    }

    #[tokio::test]
    async fn dispatch_reports_bad_config_as_response() {
        let (dispatcher, _) = dispatcher_with_echo();
        let request = DispatchRequest {
            agent: echo_agent().with_setting("chunk_size", serde_json::json!(0)),
            task: None,
            context_id: ContextId::from("ctx"),
            input: UniversalInput::text("hi"),
        };
        let response = dispatcher.dispatch(request).await.err().unwrap();
        assert_eq!(response.kind, crate::error::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn card_describes_agent() {
        let (dispatcher, _) = dispatcher_with_echo();
        let agent = dispatcher.load_agent(&echo_agent()).await.unwrap();
        let card = agent.card();
        assert_eq!(card["id"], "demo");
        assert_eq!(card["framework"], "echo");
        assert_eq!(card["features"]["streaming"], true);
    }
}
