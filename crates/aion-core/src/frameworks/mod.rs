//! Frameworks built into the core.
//!
//! - [`echo`]: in-process reference framework, always available.
//! - [`subprocess`]: external agent command speaking JSON lines.

pub mod echo;
pub mod subprocess;

pub use echo::{EchoAdapter, EchoProbe, EchoSettings};
pub use subprocess::{SubprocessAdapter, SubprocessProbe};
