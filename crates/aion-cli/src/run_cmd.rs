//! `aion run` command: run one turn of a hosted agent.
//!
//! With `--task-file` the task is read before the turn and written back
//! after it, so a task paused for input can be resumed by a later
//! invocation.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

use aion_core::adapter::{UniversalInput, bootstrap, default_probes};
use aion_core::config::HostConfig;
use aion_core::dispatch::{DispatchRequest, Dispatcher, TurnEvent};
use aion_core::task::{ContextId, Task, TaskState};

/// Options for one `aion run` invocation.
#[derive(Debug)]
pub struct RunOptions<'a> {
    pub agent: &'a str,
    pub text: &'a str,
    pub task_file: Option<&'a Path>,
    pub context_id: Option<&'a str>,
}

/// Run the run command.
pub async fn run_turn(config: &HostConfig, options: &RunOptions<'_>) -> Result<()> {
    let agent = config
        .agent(options.agent)
        .context("run `aion init` to create a config with a demo agent")?
        .clone();

    let task = match options.task_file {
        Some(path) => read_task(path)?,
        None => None,
    };
    let context_id = match (options.context_id, &task) {
        (Some(id), _) => ContextId::from(id),
        (None, Some(task)) => task.context_id.clone(),
        (None, None) => ContextId::generate(),
    };

    let registry = bootstrap(&default_probes(), config).context("failed to bootstrap adapters")?;
    let dispatcher = Dispatcher::new(Arc::new(registry));

    let mut turn = dispatcher
        .dispatch(DispatchRequest {
            agent,
            task,
            context_id,
            input: UniversalInput::text(options.text),
        })
        .await
        .with_context(|| format!("agent '{}' could not start a turn", options.agent))?;

    // First Ctrl+C cancels the turn, second force-exits.
    let cancel = turn.cancel_token();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let signal_task = tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_signal.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nCancelling turn (Ctrl+C again to force)...");
            cancel.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    let mut mid_line = false;
    while let Some(event) = turn.next().await {
        match event {
            TurnEvent::Output(output) if output.role != "user" => {
                if output.is_chunk {
                    print!("{}", output.text);
                    stdout.flush().ok();
                    mid_line = true;
                } else {
                    println!("{}", output.text);
                    mid_line = false;
                }
            }
            TurnEvent::Output(_) => {}
            TurnEvent::Status(status) => {
                tracing::debug!(state = %status.state, "task status");
            }
            TurnEvent::State(state) => {
                tracing::debug!(next = ?state.next_steps, "agent state");
            }
            TurnEvent::Interrupt(info) => {
                end_line(&mut mid_line);
                match info.prompt {
                    Some(prompt) => println!("[{}] {prompt}", info.reason),
                    None => println!("[{}]", info.reason),
                }
                if !info.options.is_empty() {
                    println!("  options: {}", info.options.join(", "));
                }
            }
            TurnEvent::Error(error) => {
                end_line(&mut mid_line);
                eprintln!("error ({:?}): {}", error.kind, error.message);
            }
        }
    }
    signal_task.abort();
    end_line(&mut mid_line);

    let task = turn.task();
    println!("Task {}: {}", task.id, task.state());

    if let Some(path) = options.task_file {
        write_task(path, task)?;
        if task.is_resumable() {
            println!(
                "Resume with: aion run {} <reply> --task-file {}",
                options.agent,
                path.display()
            );
        }
    }

    if task.state() == TaskState::Failed {
        anyhow::bail!("task {} failed", task.id);
    }
    Ok(())
}

fn end_line(mid_line: &mut bool) {
    if std::mem::take(mid_line) {
        println!();
    }
}

/// Read a task saved by a previous run. A missing file means no task yet.
fn read_task(path: &Path) -> Result<Option<Task>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read task file {}", path.display()))?;
    let task = serde_json::from_str(&contents)
        .with_context(|| format!("invalid task in {}", path.display()))?;
    Ok(Some(task))
}

fn write_task(path: &Path, task: &Task) -> Result<()> {
    let contents = serde_json::to_string_pretty(task).context("failed to serialize task")?;
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write task file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_task_file_means_no_task() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(read_task(&tmp.path().join("task.json")).unwrap().is_none());
    }

    #[test]
    fn task_file_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("task.json");
        let mut task = Task::submitted(ContextId::from("ctx"));
        task.set_status(TaskState::InputRequired, Some("which city?".to_string()));

        write_task(&path, &task).unwrap();
        let loaded = read_task(&path).unwrap().unwrap();
        assert_eq!(loaded.id, task.id);
        assert_eq!(loaded.state(), TaskState::InputRequired);
    }

    #[test]
    fn garbage_task_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("task.json");
        std::fs::write(&path, "not json").unwrap();
        let err = read_task(&path).unwrap_err();
        assert!(err.to_string().contains("invalid task"));
    }

    #[tokio::test]
    async fn paused_task_resumes_from_task_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = HostConfig::from_toml_str(&format!(
            "[checkpoints]\ndir = \"{}\"\n\n[agents.demo]\nframework = \"echo\"\n",
            tmp.path().join("checkpoints").display()
        ))
        .unwrap();
        let task_file = tmp.path().join("task.json");

        let ask = RunOptions {
            agent: "demo",
            text: "?name",
            task_file: Some(&task_file),
            context_id: None,
        };
        run_turn(&config, &ask).await.unwrap();
        let paused = read_task(&task_file).unwrap().unwrap();
        assert_eq!(paused.state(), TaskState::InputRequired);

        let answer = RunOptions {
            text: "Ada",
            ..ask
        };
        run_turn(&config, &answer).await.unwrap();
        let done = read_task(&task_file).unwrap().unwrap();
        assert_eq!(done.id, paused.id);
        assert_eq!(done.state(), TaskState::Completed);
    }

    #[tokio::test]
    async fn unknown_agent_is_an_error() {
        let options = RunOptions {
            agent: "ghost",
            text: "hi",
            task_file: None,
            context_id: None,
        };
        let err = run_turn(&HostConfig::default(), &options).await.unwrap_err();
        assert!(format!("{err:#}").contains("ghost"));
    }
}
