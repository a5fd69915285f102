//! Registry of framework adapters, keyed by framework name.
//!
//! Registration happens on a [`RegistryBuilder`] during bootstrap. Once
//! [`RegistryBuilder::freeze`] is called the resulting [`AdapterRegistry`]
//! is immutable: it has no registration method, so concurrent readers never
//! observe a half-registered framework and need no locks.

use std::collections::HashMap;
use std::sync::Arc;

use super::contracts::AgentAdapter;
use super::types::FrameworkName;
use crate::error::AdapterError;

type AdapterMap = HashMap<FrameworkName, Arc<dyn AgentAdapter>>;

/// Mutable registry used while bootstrapping.
///
/// # Example
///
/// ```ignore
/// let mut builder = RegistryBuilder::new();
/// builder.register(EchoAdapter::new(checkpointer))?;
/// let registry = Arc::new(builder.freeze());
/// let adapter = registry.get("echo")?;
/// ```
#[derive(Default)]
pub struct RegistryBuilder {
    adapters: AdapterMap,
}

impl RegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its [`AgentAdapter::framework_name`].
    ///
    /// Fails with [`AdapterError::DuplicateRegistration`] if the name is
    /// taken; the adapter registered first stays in place.
    pub fn register(&mut self, adapter: impl AgentAdapter + 'static) -> Result<(), AdapterError> {
        self.register_shared(Arc::new(adapter))
    }

    /// Register an adapter that is already shared.
    pub fn register_shared(&mut self, adapter: Arc<dyn AgentAdapter>) -> Result<(), AdapterError> {
        let name = adapter.framework_name().clone();
        if self.adapters.contains_key(&name) {
            return Err(AdapterError::DuplicateRegistration(name));
        }
        tracing::debug!(framework = %name, "registered framework adapter");
        self.adapters.insert(name, adapter);
        Ok(())
    }

    /// Whether an adapter is registered under `name` so far.
    pub fn is_registered(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    /// Look up an adapter by framework name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn AgentAdapter>, AdapterError> {
        lookup(&self.adapters, name)
    }

    /// Number of adapters registered so far.
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Returns `true` if nothing has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// End the bootstrap phase.
    pub fn freeze(self) -> AdapterRegistry {
        AdapterRegistry {
            adapters: self.adapters,
        }
    }
}

impl std::fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("frameworks", &sorted_names(&self.adapters))
            .finish()
    }
}

/// Frozen, read-only registry shared by all request handlers.
pub struct AdapterRegistry {
    adapters: AdapterMap,
}

impl AdapterRegistry {
    /// A frozen registry with no adapters.
    pub fn empty() -> Self {
        RegistryBuilder::new().freeze()
    }

    /// Check whether an adapter is registered for the given framework name.
    pub fn is_registered(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    /// Look up an adapter by framework name.
    ///
    /// Fails with [`AdapterError::UnknownFramework`] if nothing is
    /// registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn AgentAdapter>, AdapterError> {
        lookup(&self.adapters, name)
    }

    /// Registered framework names, sorted.
    pub fn list(&self) -> Vec<&str> {
        sorted_names(&self.adapters)
    }

    /// Number of registered adapters.
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Returns `true` if the registry holds no adapters.
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("frameworks", &self.list())
            .finish()
    }
}

fn lookup(adapters: &AdapterMap, name: &str) -> Result<Arc<dyn AgentAdapter>, AdapterError> {
    adapters
        .get(name)
        .map(Arc::clone)
        .ok_or_else(|| AdapterError::UnknownFramework(name.to_owned()))
}

fn sorted_names(adapters: &AdapterMap) -> Vec<&str> {
    let mut names: Vec<&str> = adapters.keys().map(FrameworkName::as_str).collect();
    names.sort_unstable();
    names
}
