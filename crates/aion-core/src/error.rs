//! Errors raised across the adapter contract boundary.
//!
//! Framework-native failures never leak past an adapter: each adapter maps
//! them into one of the [`AdapterError`] variants below. The dispatch layer
//! turns per-request errors into an [`ErrorResponse`] instead of crashing.

use serde::{Deserialize, Serialize};

use crate::adapter::FrameworkName;

/// Failure raised by an adapter, the registry, or the dispatch flow.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Framework-specific settings are missing or invalid.
    #[error("invalid configuration for framework '{framework}': {message}")]
    Configuration {
        framework: FrameworkName,
        message: String,
    },

    /// A second adapter was registered under an existing framework name.
    #[error("adapter for framework '{0}' is already registered")]
    DuplicateRegistration(FrameworkName),

    /// No adapter is registered under the requested name.
    #[error("no adapter registered for framework '{0}'")]
    UnknownFramework(String),

    /// The framework failed while running a turn.
    #[error("execution failed: {0}")]
    Execution(String),

    #[error("failed to retrieve agent state: {0}")]
    StateRetrieval(String),

    #[error("checkpoint operation failed: {0}")]
    Checkpoint(String),

    #[error("message conversion failed: {0}")]
    MessageConversion(String),

    /// The adapter does not provide the capability an operation needs.
    #[error("operation '{operation}' is not supported by the '{framework}' adapter")]
    UnsupportedOperation {
        operation: String,
        framework: FrameworkName,
    },

    /// The task needs an operator before it can continue.
    #[error("task {task_id} is {state} and requires operator intervention")]
    OperatorRequired { task_id: String, state: String },
}

impl AdapterError {
    /// Shorthand for a [`AdapterError::Configuration`] error.
    pub fn configuration(framework: &FrameworkName, message: impl Into<String>) -> Self {
        Self::Configuration {
            framework: framework.clone(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`AdapterError::UnsupportedOperation`] error.
    pub fn unsupported(framework: &FrameworkName, operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
            framework: framework.clone(),
        }
    }

    /// Classify this error for the request layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::DuplicateRegistration(_) => ErrorKind::Internal,
            Self::UnknownFramework(_) => ErrorKind::FrameworkNotAvailable,
            Self::Execution(_) => ErrorKind::Execution,
            Self::StateRetrieval(_) | Self::Checkpoint(_) => ErrorKind::State,
            Self::MessageConversion(_) => ErrorKind::InvalidInput,
            Self::UnsupportedOperation { .. } => ErrorKind::Unsupported,
            Self::OperatorRequired { .. } => ErrorKind::OperatorRequired,
        }
    }

    /// Convert into the structured response handed to the request layer.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Coarse error category exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    FrameworkNotAvailable,
    Execution,
    State,
    InvalidInput,
    Unsupported,
    OperatorRequired,
    Internal,
}

/// Structured per-request error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub message: String,
}
