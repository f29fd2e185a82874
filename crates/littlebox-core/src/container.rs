//! Container handle - a named container treated as a lazy local resource.
//!
//! Opening a handle brings the container up:
//!
//! ```text
//! open ──▶ lookup ─┬─ running ──────────────────────────▶ Open
//!                  ├─ stopped ──▶ start ────────────────▶ Open
//!                  ├─ missing ──▶ create + start ───────▶ Open   (create_if_not_exists)
//!                  ├─ missing ──────────────────────────▶ Errored (PolicyDenied)
//!                  └─ other error ──────────────────────▶ Errored
//! ```
//!
//! Closing only releases the local handle. The remote container keeps
//! running and is never deleted.

use crate::error::{CoreError, Result};
use crate::gateway::{validate_name, RuntimeGateway};
use crate::resource::{LazyResource, Lifecycle, Resource, ResourceState};
use crate::spec::ContainerSpec;
use async_trait::async_trait;
use littlebox_lxd::ContainerRef;
use parking_lot::Mutex;
use std::fmt;

/// How the last successful open found the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUp {
    /// It was already running; nothing was sent besides the lookup.
    AlreadyRunning,
    /// It existed but was not running, and was started.
    Started,
    /// It did not exist, and was created and started.
    Created,
}

impl fmt::Display for BringUp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "already running"),
            Self::Started => write!(f, "started"),
            Self::Created => write!(f, "created"),
        }
    }
}

struct BringUpRoutine {
    name: String,
    spec: ContainerSpec,
    gateway: RuntimeGateway,
    reference: Mutex<Option<(ContainerRef, BringUp)>>,
}

impl BringUpRoutine {
    async fn bring_up(&self) -> Result<(ContainerRef, BringUp)> {
        self.gateway.ready().await?;

        tracing::debug!(container = %self.name, "Probing container");
        match self.gateway.container(&self.name).await {
            Ok(found) if found.is_running() => {
                tracing::debug!(container = %self.name, "Container already running");
                Ok((found, BringUp::AlreadyRunning))
            }
            Ok(found) => {
                tracing::debug!(container = %self.name, status = %found.status(), "Container not running");
                found.start().await?;
                Ok((found, BringUp::Started))
            }
            Err(CoreError::NotFound(reason)) => {
                if !self.spec.create_if_not_exists {
                    tracing::debug!(container = %self.name, %reason, "Container missing, creation disabled");
                    return Err(CoreError::PolicyDenied(self.name.clone()));
                }
                tracing::debug!(container = %self.name, %reason, "Container missing, launching");
                let created = self
                    .gateway
                    .launch_container(&self.name, &self.spec)
                    .await?;
                Ok((created, BringUp::Created))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Resource for BringUpRoutine {
    async fn on_open(&self) -> Result<()> {
        let start = std::time::Instant::now();
        match self.bring_up().await {
            Ok((reference, outcome)) => {
                tracing::info!(
                    container = %self.name,
                    outcome = %outcome,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Container ready"
                );
                *self.reference.lock() = Some((reference, outcome));
                Ok(())
            }
            Err(e) => {
                tracing::warn!(container = %self.name, error = %e, "Container bring-up failed");
                *self.reference.lock() = None;
                Err(e)
            }
        }
    }

    async fn on_close(&self) -> Result<()> {
        tracing::debug!(container = %self.name, "Releasing container handle");
        *self.reference.lock() = None;
        Ok(())
    }
}

/// A named container on a [`RuntimeGateway`].
///
/// `open` makes sure the container exists and is running; concurrent opens
/// share one bring-up. `close` drops the local reference only.
///
/// Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct ContainerHandle {
    resource: LazyResource<BringUpRoutine>,
}

impl fmt::Debug for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerHandle")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ContainerHandle {
    /// Create a closed handle for `name`.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidArgument`] for an empty name or an
    /// invalid spec.
    pub fn new(gateway: RuntimeGateway, name: impl Into<String>, spec: ContainerSpec) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        spec.validate()?;

        Ok(Self {
            resource: LazyResource::new(
                format!("container:{name}"),
                BringUpRoutine {
                    name,
                    spec,
                    gateway,
                    reference: Mutex::new(None),
                },
            ),
        })
    }

    /// Container name.
    pub fn name(&self) -> &str {
        &self.resource.hooks().name
    }

    /// Spec used if the container has to be created.
    pub fn spec(&self) -> &ContainerSpec {
        &self.resource.hooks().spec
    }

    /// The gateway this handle talks through.
    pub fn gateway(&self) -> &RuntimeGateway {
        &self.resource.hooks().gateway
    }

    /// Ensure the container exists and is running.
    pub async fn open(&self) -> Result<()> {
        self.resource.open().await
    }

    /// Release the handle. The remote container is left as it is.
    pub async fn close(&self) -> Result<()> {
        self.resource.close().await
    }

    /// Wait until the handle is open, opening it if nobody has yet.
    pub async fn ready(&self) -> Result<()> {
        self.resource.ready().await
    }

    /// Alias for [`open`](Self::open).
    pub async fn start(&self) -> Result<()> {
        self.open().await
    }

    /// Alias for [`close`](Self::close).
    pub async fn stop(&self) -> Result<()> {
        self.close().await
    }

    /// Current handle state.
    pub fn state(&self) -> ResourceState {
        self.resource.state()
    }

    /// Error from the last failed open.
    pub fn last_error(&self) -> Option<CoreError> {
        self.resource.last_error()
    }

    /// The container as it was when the handle opened.
    ///
    /// `None` unless the handle is open. The snapshot is not refreshed;
    /// use [`stat`](Self::stat) for the current status.
    pub fn reference(&self) -> Option<ContainerRef> {
        if !self.resource.is_open() {
            return None;
        }
        self.resource
            .hooks()
            .reference
            .lock()
            .as_ref()
            .map(|(reference, _)| reference.clone())
    }

    /// How the last successful open found the container.
    pub fn bring_up(&self) -> Option<BringUp> {
        if !self.resource.is_open() {
            return None;
        }
        self.resource
            .hooks()
            .reference
            .lock()
            .as_ref()
            .map(|(_, outcome)| *outcome)
    }

    /// Query the runtime for the container's current state.
    ///
    /// Waits for the gateway to connect first. Does not change the stored
    /// reference.
    pub async fn stat(&self) -> Result<ContainerRef> {
        let gateway = self.gateway();
        gateway.ready().await?;
        gateway.container(self.name()).await
    }
}

#[async_trait]
impl Lifecycle for ContainerHandle {
    async fn open(&self) -> Result<()> {
        ContainerHandle::open(self).await
    }

    async fn close(&self) -> Result<()> {
        ContainerHandle::close(self).await
    }

    async fn ready(&self) -> Result<()> {
        ContainerHandle::ready(self).await
    }

    fn state(&self) -> ResourceState {
        ContainerHandle::state(self)
    }
}
