//! `aion frameworks` command: list the frameworks this host can run.

use anyhow::{Context, Result};

use aion_core::adapter::{bootstrap, default_probes};
use aion_core::config::HostConfig;

/// Run the frameworks command.
pub fn run_frameworks(config: &HostConfig) -> Result<()> {
    let registry = bootstrap(&default_probes(), config).context("failed to bootstrap adapters")?;

    if registry.is_empty() {
        println!("No frameworks available.");
        return Ok(());
    }

    println!("{:<14} CAPABILITIES", "FRAMEWORK");
    for name in registry.list() {
        let adapter = registry.get(name)?;
        println!("{name:<14} {}", adapter.capabilities());
    }

    let agents: Vec<_> = config.agents.values().collect();
    if !agents.is_empty() {
        println!();
        println!("{:<14} {:<14} NAME", "AGENT", "FRAMEWORK");
        for agent in agents {
            let marker = if registry.is_registered(agent.framework.as_str()) {
                ""
            } else {
                " (unavailable)"
            };
            println!(
                "{:<14} {:<14} {}{marker}",
                agent.id, agent.framework, agent.name
            );
        }
    }
    Ok(())
}
