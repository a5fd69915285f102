//! Framework detection and registry construction.
//!
//! Each hosted framework ships a [`FrameworkProbe`] that knows whether the
//! framework can run on this host and how to build its adapter. Bootstrap
//! walks an explicit list of probes once per process and freezes the
//! result into an [`AdapterRegistry`].

use std::sync::Arc;

use super::contracts::{AgentAdapter, CheckpointerAdapter};
use super::registry::{AdapterRegistry, RegistryBuilder};
use super::types::FrameworkName;
use crate::config::{FrameworkSettings, HostConfig};
use crate::error::AdapterError;
use crate::frameworks::{EchoProbe, SubprocessProbe};

/// Shared resources handed to every probe while building adapters.
#[derive(Clone)]
pub struct BootstrapContext {
    pub checkpointer: Arc<dyn CheckpointerAdapter>,
}

impl BootstrapContext {
    /// Context with the checkpointer selected by `config`.
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            checkpointer: crate::checkpoint::from_settings(&config.checkpoints),
        }
    }
}

/// Detects one framework and builds its adapter.
pub trait FrameworkProbe: Send + Sync {
    fn framework_name(&self) -> FrameworkName;

    /// Can the framework run here with `settings`? Must not have side
    /// effects.
    fn is_available(&self, settings: &FrameworkSettings) -> bool;

    fn build(
        &self,
        settings: &FrameworkSettings,
        ctx: &BootstrapContext,
    ) -> Result<Arc<dyn AgentAdapter>, AdapterError>;
}

/// Probes for every framework built into the core.
pub fn default_probes() -> Vec<Box<dyn FrameworkProbe>> {
    vec![Box::new(EchoProbe), Box::new(SubprocessProbe)]
}

/// Build the frozen registry from `probes`.
///
/// Disabled and unavailable frameworks are skipped. A framework whose
/// settings are invalid is skipped with a warning so one bad section does
/// not take the host down. Two probes claiming the same name abort
/// bootstrap.
pub fn bootstrap(
    probes: &[Box<dyn FrameworkProbe>],
    config: &HostConfig,
) -> Result<AdapterRegistry, AdapterError> {
    let ctx = BootstrapContext::from_config(config);
    let mut builder = RegistryBuilder::new();

    for probe in probes {
        let name = probe.framework_name();
        let settings = config.framework(name.as_str());

        if !settings.enabled {
            tracing::info!(framework = %name, "framework disabled in config, skipping");
            continue;
        }
        if !probe.is_available(&settings) {
            tracing::info!(framework = %name, "framework not available, skipping");
            continue;
        }

        let adapter = match probe.build(&settings, &ctx) {
            Ok(adapter) => adapter,
            Err(e @ AdapterError::Configuration { .. }) => {
                tracing::warn!(framework = %name, error = %e, "skipping misconfigured framework");
                continue;
            }
            Err(e) => return Err(e),
        };
        builder.register_shared(adapter)?;
        tracing::info!(framework = %name, "framework registered");
    }

    let registry = builder.freeze();
    tracing::info!(frameworks = ?registry.list(), "adapter registry ready");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ExecutorAdapter;
    use crate::config::AgentConfig;
    use async_trait::async_trait;

    struct StubAdapter(FrameworkName);

    #[async_trait]
    impl AgentAdapter for StubAdapter {
        fn framework_name(&self) -> &FrameworkName {
            &self.0
        }

        fn validate_config(&self, _config: &AgentConfig) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn create_executor(
            &self,
            _config: &AgentConfig,
        ) -> Result<Box<dyn ExecutorAdapter>, AdapterError> {
            Err(AdapterError::unsupported(&self.0, "execute"))
        }
    }

    enum Outcome {
        Build,
        Unavailable,
        Misconfigured,
    }

    struct StubProbe {
        name: &'static str,
        outcome: Outcome,
    }

    impl FrameworkProbe for StubProbe {
        fn framework_name(&self) -> FrameworkName {
            FrameworkName::new(self.name).unwrap()
        }

        fn is_available(&self, _settings: &FrameworkSettings) -> bool {
            !matches!(self.outcome, Outcome::Unavailable)
        }

        fn build(
            &self,
            _settings: &FrameworkSettings,
            _ctx: &BootstrapContext,
        ) -> Result<Arc<dyn AgentAdapter>, AdapterError> {
            let name = self.framework_name();
            match self.outcome {
                Outcome::Misconfigured => Err(AdapterError::configuration(&name, "bad settings")),
                _ => Ok(Arc::new(StubAdapter(name))),
            }
        }
    }

    fn probe(name: &'static str, outcome: Outcome) -> Box<dyn FrameworkProbe> {
        Box::new(StubProbe { name, outcome })
    }

    #[test]
    fn registers_available_frameworks_only() {
        let probes = vec![
            probe("alpha", Outcome::Build),
            probe("beta", Outcome::Unavailable),
            probe("gamma", Outcome::Misconfigured),
        ];
        let registry = bootstrap(&probes, &HostConfig::default()).unwrap();
        assert_eq!(registry.list(), vec!["alpha"]);
        assert!(!registry.is_registered("beta"));
        assert!(!registry.is_registered("gamma"));
    }

    #[test]
    fn disabled_framework_is_skipped() {
        let config = HostConfig::from_toml_str("[frameworks.alpha]\nenabled = false\n").unwrap();
        let registry = bootstrap(&[probe("alpha", Outcome::Build)], &config).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_probe_aborts_bootstrap() {
        let probes = vec![probe("alpha", Outcome::Build), probe("alpha", Outcome::Build)];
        let err = bootstrap(&probes, &HostConfig::default()).unwrap_err();
        assert!(matches!(err, AdapterError::DuplicateRegistration(_)));
    }

    #[test]
    fn default_probes_register_echo_out_of_the_box() {
        let registry = bootstrap(&default_probes(), &HostConfig::default()).unwrap();
        assert!(registry.is_registered("echo"));
        // No command configured, so the subprocess framework stays out.
        assert!(!registry.is_registered("subprocess"));
    }
}
