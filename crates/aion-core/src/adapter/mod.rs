//! Framework adapter interface.
//!
//! This module defines the capability contracts every hosted framework
//! implements ([`AgentAdapter`], [`ExecutorAdapter`], [`StateAdapter`],
//! [`MessageAdapter`], [`CheckpointerAdapter`]), the shared payload types,
//! and the [`AdapterRegistry`] used for runtime lookup.
//!
//! # Architecture
//!
//! ```text
//! bootstrap(probes, config)
//!     |
//!     v
//! RegistryBuilder --freeze()--> Arc<AdapterRegistry>
//!                                    |
//! Dispatcher --get("echo")-----------+--> Arc<dyn AgentAdapter>
//!     |                                        |
//!     |   create_executor(config) -------------+
//!     |        |
//!     |        v
//!     |   Box<dyn ExecutorAdapter>
//!     |        |
//!     |   execute(request, cancel) --> Stream<ExecutionEvent>
//!     |
//!     |   message_adapter()  to_native / from_native
//!     |   state_adapter()    snapshot_to_state / resume_input
//!     |   checkpointer()     save / load / delete
//! ```

pub mod bootstrap;
pub mod contracts;
pub mod registry;
pub mod types;

// Re-export the primary public API at the module level.
pub use bootstrap::{BootstrapContext, FrameworkProbe, bootstrap, default_probes};
pub use contracts::{
    AgentAdapter, CheckpointerAdapter, ExecutorAdapter, MessageAdapter, StateAdapter,
    schema_has_property,
};
pub use registry::{AdapterRegistry, RegistryBuilder};
pub use types::{
    AgentState, Capabilities, Capability, Checkpoint, EventStream, ExecutionEvent, FrameworkName,
    InterruptInfo, InvalidFrameworkName, TurnMode, TurnRequest, UniversalInput, UniversalOutput,
};
