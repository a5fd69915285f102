//! Host configuration consumed by bootstrap and dispatch.
//!
//! The file format is TOML:
//!
//! ```toml
//! [frameworks.subprocess]
//! command = "my-agent"
//!
//! [checkpoints]
//! dir = "/var/lib/aion/checkpoints"
//!
//! [agents.demo]
//! framework = "echo"
//! ```
//!
//! Locating the file is the hosting application's job; this module only
//! parses and queries it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapter::FrameworkName;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("no agent named {0:?} in config")]
    UnknownAgent(String),
}

/// Whole host configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Per-framework availability flags and settings, keyed by framework name.
    #[serde(default)]
    pub frameworks: BTreeMap<String, FrameworkSettings>,
    #[serde(default)]
    pub checkpoints: CheckpointSettings,
    /// Hosted agents, keyed by agent id.
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,
}

impl HostConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(contents)?;
        for (id, agent) in &mut config.agents {
            agent.id.clone_from(id);
        }
        Ok(config)
    }

    /// Read and parse the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Settings for `framework`, or the defaults if it has no section.
    pub fn framework(&self, framework: &str) -> FrameworkSettings {
        self.frameworks.get(framework).cloned().unwrap_or_default()
    }

    /// Look up a hosted agent by id.
    pub fn agent(&self, id: &str) -> Result<&AgentConfig, ConfigError> {
        self.agents
            .get(id)
            .ok_or_else(|| ConfigError::UnknownAgent(id.to_owned()))
    }
}

/// Availability flag and settings for one framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkSettings {
    /// Operators can switch a framework off even when it is installed.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// External command for process-backed frameworks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Anything else, passed through to the framework adapter.
    #[serde(flatten)]
    pub options: serde_json::Map<String, Value>,
}

impl Default for FrameworkSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
            args: Vec::new(),
            options: serde_json::Map::new(),
        }
    }
}

/// Where checkpoints are kept. No directory means in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// Configuration of one hosted agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Filled from the table key when loaded from a file.
    #[serde(default, skip_serializing)]
    pub id: String,
    pub framework: FrameworkName,
    #[serde(default = "default_agent_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Framework-specific settings, validated by the framework's adapter.
    #[serde(default)]
    pub settings: serde_json::Map<String, Value>,
}

impl AgentConfig {
    /// A config with default metadata and no settings.
    pub fn new(id: impl Into<String>, framework: FrameworkName) -> Self {
        Self {
            id: id.into(),
            framework,
            name: default_agent_name(),
            description: String::new(),
            version: default_version(),
            settings: serde_json::Map::new(),
        }
    }

    /// Builder-style setter for one framework-specific setting.
    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_agent_name() -> String {
    "Agent".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[frameworks.echo]
enabled = false

[frameworks.subprocess]
command = "my-agent"
args = ["--jsonl"]
timeout_secs = 30

[checkpoints]
dir = "/tmp/aion-checkpoints"

[agents.demo]
framework = "echo"
name = "Demo"

[agents.demo.settings]
chunk_size = 4
"#;

    #[test]
    fn parses_full_document() {
        let config = HostConfig::from_toml_str(SAMPLE).unwrap();

        assert!(!config.framework("echo").enabled);
        let sub = config.framework("subprocess");
        assert!(sub.enabled);
        assert_eq!(sub.command.as_deref(), Some("my-agent"));
        assert_eq!(sub.args, vec!["--jsonl"]);
        assert_eq!(sub.options["timeout_secs"], 30);

        assert_eq!(
            config.checkpoints.dir.as_deref(),
            Some(Path::new("/tmp/aion-checkpoints"))
        );

        let demo = config.agent("demo").unwrap();
        assert_eq!(demo.id, "demo");
        assert_eq!(demo.framework.as_str(), "echo");
        assert_eq!(demo.name, "Demo");
        assert_eq!(demo.version, "1.0.0");
        assert_eq!(demo.settings["chunk_size"], 4);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config = HostConfig::from_toml_str("").unwrap();
        assert_eq!(config, HostConfig::default());
        let echo = config.framework("echo");
        assert!(echo.enabled);
        assert!(echo.command.is_none());
        assert!(config.checkpoints.dir.is_none());
    }

    #[test]
    fn unknown_agent_is_an_error() {
        let config = HostConfig::default();
        let err = config.agent("ghost").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAgent(ref id) if id == "ghost"));
    }

    #[test]
    fn blank_framework_name_fails_to_parse() {
        let err = HostConfig::from_toml_str("[agents.bad]\nframework = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn toml_round_trip_preserves_agents() {
        let config = HostConfig::from_toml_str(SAMPLE).unwrap();
        let text = config.to_toml_string().unwrap();
        let reparsed = HostConfig::from_toml_str(&text).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn load_reports_missing_file_path() {
        let err = HostConfig::load(Path::new("/nonexistent/aion.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/aion.toml"));
    }
}
