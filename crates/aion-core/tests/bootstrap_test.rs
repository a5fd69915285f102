//! Bootstrap from host configuration with the built-in probes.

use std::sync::Arc;

use aion_core::adapter::{Capability, UniversalInput, bootstrap, default_probes};
use aion_core::config::HostConfig;
use aion_core::dispatch::Dispatcher;
use aion_core::task::{ContextId, TaskState};

#[test]
fn default_config_hosts_echo_only() {
    let registry = bootstrap(&default_probes(), &HostConfig::default()).unwrap();
    assert_eq!(registry.list(), vec!["echo"]);
    let echo = registry.get("echo").unwrap();
    assert!(echo.supports(Capability::Message));
    assert!(echo.supports(Capability::State));
    assert!(echo.supports(Capability::Checkpointer));
}

#[test]
fn disabled_and_misconfigured_frameworks_are_skipped() {
    let config = HostConfig::from_toml_str(
        r#"
[frameworks.echo]
chunk_size = 0

[frameworks.subprocess]
enabled = false
command = "sh"
"#,
    )
    .unwrap();
    let registry = bootstrap(&default_probes(), &config).unwrap();
    assert!(registry.is_empty());
}

#[cfg(unix)]
#[test]
fn subprocess_registers_when_command_resolves() {
    let config = HostConfig::from_toml_str("[frameworks.subprocess]\ncommand = \"sh\"\n").unwrap();
    let registry = bootstrap(&default_probes(), &config).unwrap();
    assert_eq!(registry.list(), vec!["echo", "subprocess"]);
    let metadata = registry.get("subprocess").unwrap().metadata();
    assert!(metadata["command"].as_str().unwrap().ends_with("sh"));
}

#[tokio::test]
async fn configured_agent_runs_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        format!(
            r#"
[checkpoints]
dir = "{}"

[agents.greeter]
framework = "echo"
name = "Greeter"

[agents.greeter.settings]
chunk_size = 2
"#,
            dir.path().join("checkpoints").display()
        ),
    )
    .unwrap();

    let config = HostConfig::load(&path).unwrap();
    let registry = Arc::new(bootstrap(&default_probes(), &config).unwrap());
    let dispatcher = Dispatcher::new(registry);

    let hosted = dispatcher
        .load_agent(config.agent("greeter").unwrap())
        .await
        .unwrap();
    assert_eq!(hosted.card()["name"], "Greeter");

    let outcome = dispatcher
        .start_turn(&hosted, None, ContextId::generate(), UniversalInput::text("hello"))
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(outcome.task.state(), TaskState::Completed);
    assert_eq!(outcome.outputs.len(), 3);
    assert!(outcome.outputs.iter().all(|o| o.is_chunk));
    assert_eq!(outcome.text(), "hello");
}
