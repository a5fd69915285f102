//! Core of the aion agent host.
//!
//! Hosts several agent-execution frameworks behind one task contract:
//!
//! - [`adapter`] -- the five capability contracts, the frozen
//!   [`adapter::AdapterRegistry`] and the bootstrap probes that fill it.
//! - [`lifecycle`] -- classification of a task's current status as
//!   resumable or interrupted.
//! - [`dispatch`] -- drives one conversational turn through the resolved
//!   adapter, translating messages and persisting checkpoints.
//! - [`frameworks`] -- the built-in framework adapters.
//! - [`checkpoint`] -- checkpointer implementations.

pub mod adapter;
pub mod checkpoint;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frameworks;
pub mod lifecycle;
pub mod task;

pub use error::{AdapterError, ErrorKind, ErrorResponse};
