//! Registry behaviour through the public API.

use std::sync::Arc;

use aion_core::adapter::{AdapterRegistry, AgentAdapter, RegistryBuilder};
use aion_core::AdapterError;
use aion_test_utils::{Script, ScriptedAdapter};

fn scripted(name: &str) -> ScriptedAdapter {
    ScriptedAdapter::new(name, Script::Events(Vec::new()))
}

#[test]
fn alpha_registered_beta_unknown() {
    let mut builder = RegistryBuilder::new();
    builder.register(scripted("alpha")).unwrap();
    let registry = builder.freeze();

    assert!(registry.is_registered("alpha"));
    assert!(!registry.is_registered("beta"));
    assert!(matches!(
        registry.get("beta"),
        Err(AdapterError::UnknownFramework(ref name)) if name == "beta"
    ));
    assert_eq!(registry.get("alpha").unwrap().framework_name().as_str(), "alpha");
}

#[test]
fn duplicate_registration_leaves_original_in_place() {
    let original: Arc<dyn AgentAdapter> = Arc::new(scripted("alpha"));
    let mut builder = RegistryBuilder::new();
    builder.register_shared(Arc::clone(&original)).unwrap();

    let err = builder.register(scripted("alpha")).unwrap_err();
    assert!(matches!(err, AdapterError::DuplicateRegistration(_)));

    let registry = builder.freeze();
    assert_eq!(registry.len(), 1);
    assert!(Arc::ptr_eq(&registry.get("alpha").unwrap(), &original));
}

#[test]
fn capabilities_reflect_optional_roles() {
    let mut builder = RegistryBuilder::new();
    builder.register(scripted("plain")).unwrap();
    builder
        .register(scripted("bare").without_messages())
        .unwrap();
    builder.register(scripted("stateful").with_state()).unwrap();
    let registry = builder.freeze();

    let plain = registry.get("plain").unwrap().capabilities();
    assert!(plain.message && !plain.state && !plain.checkpointer);
    assert!(!registry.get("bare").unwrap().capabilities().message);
    assert!(registry.get("stateful").unwrap().capabilities().state);
}

#[tokio::test]
async fn frozen_registry_is_shared_across_tasks() {
    let mut builder = RegistryBuilder::new();
    builder.register(scripted("alpha")).unwrap();
    builder.register(scripted("gamma")).unwrap();
    let registry: Arc<AdapterRegistry> = Arc::new(builder.freeze());

    let mut handles = Vec::new();
    for i in 0..16 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let name = if i % 2 == 0 { "alpha" } else { "gamma" };
            registry.get(name).map(|a| a.framework_name().to_string())
        }));
    }
    for handle in handles {
        let name = handle.await.unwrap().unwrap();
        assert!(name == "alpha" || name == "gamma");
    }
    assert_eq!(registry.list(), vec!["alpha", "gamma"]);
}
