//! # littlebox-acl
//!
//! Role-based access control for littlebox operations.
//!
//! This crate only answers "may this role do that?". Nothing in
//! `littlebox-core` consults it; host applications check a grant before
//! calling into a container handle.
//!
//! ```
//! use littlebox_acl::{AccessControl, Action, ResourceKind, Role};
//!
//! let acl = AccessControl::default();
//! assert!(acl.can(Role::Operator, Action::Start, ResourceKind::Container));
//! assert!(!acl.can(Role::Viewer, Action::Create, ResourceKind::Container));
//! ```

mod control;
mod error;
mod types;

pub use control::{AccessControl, Grant, Inheritance, Policy};
pub use error::{AclError, Result};
pub use types::{Action, ResourceKind, Role};
