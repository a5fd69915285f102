mod config;
mod frameworks_cmd;
mod run_cmd;

use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "aion", about = "Host agent frameworks behind one task contract")]
struct Cli {
    /// Config file path (overrides AION_CONFIG env var)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// List available frameworks and configured agents
    Frameworks,
    /// Run one turn of a hosted agent
    Run {
        /// Agent id from the config file
        agent: String,
        /// Input text for the turn
        text: String,
        /// Task JSON to resume from and save to
        #[arg(long)]
        task_file: Option<PathBuf>,
        /// Conversation id (defaults to the task's, or a new one)
        #[arg(long)]
        context_id: Option<String>,
    },
    /// Print shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// Execute the `aion init` command: write config file.
fn cmd_init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::starter_config(path)?;
    config::save_config(path, &cfg)?;

    println!("Config written to {}", path.display());
    if let Some(dir) = &cfg.checkpoints.dir {
        println!("  checkpoints.dir = {}", dir.display());
    }
    for (id, agent) in &cfg.agents {
        println!("  agents.{id}.framework = {}", agent.framework);
    }
    println!();
    println!("Next: run `aion run demo hello`.");

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let path = config::config_path(cli.config.as_deref());

    match cli.command {
        Commands::Init { force } => {
            cmd_init(&path, force)?;
        }
        Commands::Frameworks => {
            let host = config::load_config(&path)?;
            frameworks_cmd::run_frameworks(&host)?;
        }
        Commands::Run {
            agent,
            text,
            task_file,
            context_id,
        } => {
            let host = config::load_config(&path)?;
            let options = run_cmd::RunOptions {
                agent: &agent,
                text: &text,
                task_file: task_file.as_deref(),
                context_id: context_id.as_deref(),
            };
            run_cmd::run_turn(&host, &options).await?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "aion", &mut std::io::stdout());
        }
    }

    Ok(())
}
