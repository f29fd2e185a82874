//! The remote client seam used by the lifecycle layer.
//!
//! [`RemoteClient`] is what the rest of littlebox sees of the daemon. The
//! socket and HTTPS implementation lives in [`crate::client`]; tests substitute
//! their own.

use crate::error::{LxdError, Result};
use crate::types::{ContainerDescriptor, RemoteRequest, RuntimeInfo, StateAction};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Seconds the daemon may spend on a graceful state change before giving up.
pub const STATE_CHANGE_TIMEOUT_SECS: i64 = 30;

/// Longest container name LXD accepts (a DNS label).
pub const MAX_NAME_LEN: usize = 63;

/// Check `name` against LXD's instance name rules.
///
/// Names are used verbatim as a path segment, so anything outside ASCII
/// letters, digits and `-` is rejected before a request is built.
pub fn validate_container_name(name: &str) -> Result<()> {
    let invalid = |reason| {
        Err(LxdError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return invalid("must not be empty");
    }
    if name.len() > MAX_NAME_LEN {
        return invalid("must be at most 63 characters");
    }
    if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
        return invalid("may only contain ASCII letters, digits and '-'");
    }
    if name.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        return invalid("must not start with a digit or '-'");
    }
    if name.ends_with('-') {
        return invalid("must not end with '-'");
    }
    Ok(())
}

/// Trait for talking to a container runtime daemon.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Query runtime information (`GET /1.0`).
    async fn get_info(&self) -> Result<RuntimeInfo>;

    /// Query a single container (`GET /1.0/containers/<name>`).
    ///
    /// # Errors
    /// Returns a not-found class [`LxdError::Api`](crate::LxdError::Api) if
    /// the container does not exist.
    async fn get_container(&self, name: &str) -> Result<ContainerDescriptor>;

    /// Issue a generic REST call and return the response metadata.
    ///
    /// Background operations are awaited before returning.
    async fn request(&self, request: RemoteRequest) -> Result<serde_json::Value>;

    /// Change the run state of a container.
    async fn update_state(&self, name: &str, action: StateAction) -> Result<()> {
        let body = serde_json::json!({
            "action": action,
            "timeout": STATE_CHANGE_TIMEOUT_SECS,
            "force": false,
            "stateful": false,
        });
        self.request(RemoteRequest::put(format!("/containers/{name}/state"), body))
            .await?;
        Ok(())
    }
}

/// A container descriptor together with the client that produced it.
///
/// The descriptor is a snapshot. Calling [`start`](Self::start) or
/// [`stop`](Self::stop) does not refresh it; query the daemon again for the
/// current status.
#[derive(Clone)]
pub struct ContainerRef {
    descriptor: ContainerDescriptor,
    client: Arc<dyn RemoteClient>,
}

impl ContainerRef {
    pub fn new(descriptor: ContainerDescriptor, client: Arc<dyn RemoteClient>) -> Self {
        Self { descriptor, client }
    }

    /// Fetch `name` from the daemon and wrap it.
    pub async fn fetch(client: Arc<dyn RemoteClient>, name: &str) -> Result<Self> {
        validate_container_name(name)?;
        let descriptor = client.get_container(name).await?;
        Ok(Self::new(descriptor, client))
    }

    /// Container name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Last known status string.
    pub fn status(&self) -> &str {
        &self.descriptor.status
    }

    /// Whether the snapshot reports the container as running.
    pub fn is_running(&self) -> bool {
        self.descriptor.is_running()
    }

    /// The descriptor snapshot.
    pub fn descriptor(&self) -> &ContainerDescriptor {
        &self.descriptor
    }

    /// Start the container.
    pub async fn start(&self) -> Result<()> {
        tracing::info!(container = %self.descriptor.name, "Starting container");
        self.client
            .update_state(&self.descriptor.name, StateAction::Start)
            .await
    }

    /// Stop the container.
    pub async fn stop(&self) -> Result<()> {
        tracing::info!(container = %self.descriptor.name, "Stopping container");
        self.client
            .update_state(&self.descriptor.name, StateAction::Stop)
            .await
    }
}

impl fmt::Debug for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerRef")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl PartialEq for ContainerRef {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor == other.descriptor
    }
}
