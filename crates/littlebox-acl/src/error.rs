//! Error types for littlebox-acl.

use crate::types::{Action, ResourceKind, Role};
use thiserror::Error;

/// Result type alias for littlebox-acl operations.
pub type Result<T> = std::result::Result<T, AclError>;

/// Errors raised by grant evaluation and policy loading.
#[derive(Debug, Error)]
pub enum AclError {
    /// The role holds no grant for the action
    #[error("role {role} may not {action} {resource}")]
    Denied {
        role: Role,
        action: Action,
        resource: ResourceKind,
    },

    /// Inheritance would make a role its own ancestor
    #[error("role {role} cannot inherit from {parent}: cycle")]
    Cycle { role: Role, parent: Role },

    /// Unrecognized vocabulary term
    #[error("unknown {kind}: {value}")]
    Unknown { kind: &'static str, value: String },

    /// Policy document could not be parsed
    #[error("invalid policy: {0}")]
    Policy(#[from] serde_json::Error),
}
