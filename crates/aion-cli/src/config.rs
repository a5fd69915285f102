//! Configuration file management for aion.
//!
//! The host reads one TOML file. Its path is resolved as:
//! `--config` flag > `AION_CONFIG` env var > `~/.config/aion/config.toml`.
//! A missing file means the built-in defaults (echo only, in-memory
//! checkpoints).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::json;

use aion_core::adapter::FrameworkName;
use aion_core::config::{AgentConfig, FrameworkSettings, HostConfig};

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the aion config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/aion` or `~/.config/aion`.
/// The platform-specific `dirs::config_dir()` is ignored so macOS hosts
/// use the same layout as Linux.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("aion");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("aion")
}

/// Resolve the config file path: flag > `AION_CONFIG` > default location.
pub fn config_path(cli_path: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_path {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("AION_CONFIG") {
        return PathBuf::from(path);
    }
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load the host config from `path`, falling back to defaults when the
/// file does not exist. `AION_CHECKPOINT_DIR` overrides `checkpoints.dir`.
pub fn load_config(path: &Path) -> Result<HostConfig> {
    let mut config = if path.exists() {
        HostConfig::load(path)
            .with_context(|| format!("failed to load config file at {}", path.display()))?
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        HostConfig::default()
    };

    if let Ok(dir) = std::env::var("AION_CHECKPOINT_DIR") {
        config.checkpoints.dir = Some(PathBuf::from(dir));
    }
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(path: &Path, config: &HostConfig) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = config
        .to_toml_string()
        .context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

/// Config written by `aion init`.
///
/// Enables echo, lists the subprocess framework switched off, keeps
/// checkpoints next to the config file, and hosts one `demo` agent.
pub fn starter_config(path: &Path) -> Result<HostConfig> {
    let mut config = HostConfig::default();

    config
        .frameworks
        .insert("echo".to_string(), FrameworkSettings::default());
    config.frameworks.insert(
        "subprocess".to_string(),
        FrameworkSettings {
            enabled: false,
            command: Some("my-agent".to_string()),
            ..FrameworkSettings::default()
        },
    );

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    config.checkpoints.dir = Some(dir.join("checkpoints"));

    let framework = FrameworkName::new("echo").context("invalid framework name")?;
    let mut demo = AgentConfig::new("demo", framework).with_setting("chunk_size", json!(16));
    demo.name = "Demo agent".to_string();
    demo.description = "Echoes its input back".to_string();
    config.agents.insert(demo.id.clone(), demo);

    Ok(config)
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
