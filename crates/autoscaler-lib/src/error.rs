//! Error taxonomy shared by every layer of the provider
//!
//! Callers match on the variant to decide how loudly to log and whether the
//! control loop should retry on its next tick.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T, E = CloudError> = std::result::Result<T, E>;

/// Errors surfaced by the cloud provider
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CloudError {
    /// Spec parse or bootstrap failure. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unresolved group, instance or launch shape
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure or a 5xx from the cloud backend
    #[error("cloud backend error{}: {message}", .code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Backend {
        code: Option<String>,
        message: String,
    },

    /// A cloud call exceeded its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// A resize or delete would break the group's size bounds
    #[error("capacity constraint: {0}")]
    CapacityConstraint(String),

    /// Instances in one delete call resolve to more than one group
    #[error("instance {instance} belongs to group {found}, expected {expected}")]
    GroupMismatch {
        instance: String,
        expected: String,
        found: String,
    },

    /// Malformed caller input such as a delta with the wrong sign
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Optional contract method this provider does not support
    #[error("not implemented")]
    NotImplemented,
}

impl CloudError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            code: None,
            message: message.into(),
        }
    }

    pub fn backend_with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Label used for the `status` dimension of the request histogram
    pub fn status_label(&self) -> String {
        match self {
            Self::Backend { code: Some(code), .. } => code.clone(),
            Self::NotFound(_) => "NotFound".to_string(),
            Self::Timeout { .. } => "Timeout".to_string(),
            _ => "error".to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the next control-loop tick may succeed where this call failed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Timeout { .. })
    }
}
