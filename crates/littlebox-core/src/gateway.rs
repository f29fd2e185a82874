//! Runtime gateway - the lazily connected entry point to the LXD daemon.

use crate::error::{CoreError, Result};
use crate::resource::{LazyResource, Lifecycle, Resource, ResourceState};
use crate::spec::ContainerSpec;
use async_trait::async_trait;
use littlebox_lxd::{
    validate_container_name, ContainerRef, LxdClient, LxdConfig, RemoteClient, RemoteRequest,
    RuntimeInfo,
};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Architecture requested for every created container.
pub const REFERENCE_ARCHITECTURE: &str = "x86_64";

/// Profile applied when the spec names none.
pub const DEFAULT_PROFILE: &str = "default";

/// Body of `POST /containers`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateContainerRequest {
    pub name: String,
    pub architecture: String,
    pub profiles: Vec<String>,
    pub ephemeral: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<serde_json::Value>,
}

impl CreateContainerRequest {
    /// Derive the create request for `name` from `spec`.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidArgument`] if the name is empty or the
    /// spec does not validate.
    pub fn from_spec(name: &str, spec: &ContainerSpec) -> Result<Self> {
        validate_name(name)?;
        spec.validate()?;

        Ok(Self {
            name: name.to_string(),
            architecture: REFERENCE_ARCHITECTURE.to_string(),
            profiles: vec![spec
                .profile
                .clone()
                .unwrap_or_else(|| DEFAULT_PROFILE.to_string())],
            ephemeral: spec.ephemeral,
            config: spec.config.clone(),
            source: spec.image.as_ref().map(|image| image.to_source()),
        })
    }
}

/// Reject names the daemon would refuse or that would not fit in a request path.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    Ok(validate_container_name(name)?)
}

/// Result of [`RuntimeGateway::stat`].
#[derive(Debug, Clone, PartialEq)]
pub enum Stat {
    /// Runtime information (no name given).
    Runtime(RuntimeInfo),
    /// A named container.
    Container(ContainerRef),
}

/// Open routine: prove the daemon answers before anything else is sent.
struct Connection {
    client: Arc<dyn RemoteClient>,
}

#[async_trait]
impl Resource for Connection {
    async fn on_open(&self) -> Result<()> {
        let info = self.client.get_info().await?;
        tracing::info!(
            api_version = %info.api_version,
            auth = %info.auth,
            server_version = info.environment.as_ref().map(|e| e.server_version.as_str()).unwrap_or(""),
            "Connected to container runtime"
        );
        Ok(())
    }

    async fn on_close(&self) -> Result<()> {
        Ok(())
    }
}

/// Lazily opened connection to a container runtime.
///
/// Cloning is cheap; clones share one connection state, so a gateway can be
/// handed to any number of [`ContainerHandle`](crate::ContainerHandle)s and
/// concurrent first opens still query the runtime once.
///
/// `stat`, `create_container` and `launch_container` do not open the
/// gateway themselves. Call [`open`](Self::open) or [`ready`](Self::ready)
/// first.
#[derive(Clone)]
pub struct RuntimeGateway {
    resource: LazyResource<Connection>,
    client: Arc<dyn RemoteClient>,
}

impl fmt::Debug for RuntimeGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeGateway")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RuntimeGateway {
    /// Create a gateway over any remote client.
    pub fn new(client: Arc<dyn RemoteClient>) -> Self {
        Self {
            resource: LazyResource::new(
                "runtime",
                Connection {
                    client: Arc::clone(&client),
                },
            ),
            client,
        }
    }

    /// Create a gateway over the daemon's Unix socket.
    ///
    /// Nothing is sent until the gateway is opened.
    pub fn connect(config: LxdConfig) -> Result<Self> {
        tracing::debug!(endpoint = %config.endpoint(), "Creating runtime gateway");
        let client = LxdClient::new(config)?;
        Ok(Self::new(Arc::new(client)))
    }

    /// The underlying remote client.
    pub fn client(&self) -> &Arc<dyn RemoteClient> {
        &self.client
    }

    /// Connect (query runtime info), or join the connection in flight.
    pub async fn open(&self) -> Result<()> {
        self.resource.open().await
    }

    /// Forget the connection. No remote call is made.
    pub async fn close(&self) -> Result<()> {
        self.resource.close().await
    }

    /// Wait until connected, connecting if nobody has yet.
    pub async fn ready(&self) -> Result<()> {
        self.resource.ready().await
    }

    /// Current connection state.
    pub fn state(&self) -> ResourceState {
        self.resource.state()
    }

    /// Error from the last failed connection attempt.
    pub fn last_error(&self) -> Option<CoreError> {
        self.resource.last_error()
    }

    /// Query the runtime.
    ///
    /// With a (non-empty) name this looks up that container, otherwise it
    /// returns information about the runtime itself.
    pub async fn stat(&self, name: Option<&str>) -> Result<Stat> {
        match name.filter(|n| !n.is_empty()) {
            Some(name) => Ok(Stat::Container(self.container(name).await?)),
            None => Ok(Stat::Runtime(self.runtime_info().await?)),
        }
    }

    /// Query runtime information.
    pub async fn runtime_info(&self) -> Result<RuntimeInfo> {
        Ok(self.client.get_info().await?)
    }

    /// Look up a container by name.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidArgument`] for a malformed name, before
    /// anything is sent, and [`CoreError::NotFound`] if the runtime has no
    /// such container.
    pub async fn container(&self, name: &str) -> Result<ContainerRef> {
        validate_name(name)?;
        tracing::debug!(container = %name, "Querying container");
        Ok(ContainerRef::fetch(Arc::clone(&self.client), name).await?)
    }

    /// Create a container and return the runtime's view of it.
    ///
    /// The name and spec are validated before anything is sent. After the
    /// create call succeeds the container is queried again so the returned
    /// reference is what the runtime reports, not what was asked for.
    pub async fn create_container(&self, name: &str, spec: &ContainerSpec) -> Result<ContainerRef> {
        let request = CreateContainerRequest::from_spec(name, spec)?;
        let body = serde_json::to_value(&request)
            .map_err(|e| CoreError::InvalidArgument(format!("unserializable spec: {e}")))?;

        tracing::info!(
            container = %name,
            profiles = ?request.profiles,
            ephemeral = request.ephemeral,
            "Creating container"
        );
        self.client
            .request(RemoteRequest::post("/containers", body))
            .await
            .map_err(|e| {
                tracing::warn!(container = %name, error = %e, "Container creation failed");
                CoreError::from(e)
            })?;

        self.container(name).await
    }

    /// Create a container and start it.
    ///
    /// Surfaces either the create error or the start error, never both.
    pub async fn launch_container(&self, name: &str, spec: &ContainerSpec) -> Result<ContainerRef> {
        let container = self.create_container(name, spec).await?;
        container.start().await?;
        tracing::info!(container = %name, "Container launched");
        Ok(container)
    }
}

#[async_trait]
impl Lifecycle for RuntimeGateway {
    async fn open(&self) -> Result<()> {
        RuntimeGateway::open(self).await
    }

    async fn close(&self) -> Result<()> {
        RuntimeGateway::close(self).await
    }

    async fn ready(&self) -> Result<()> {
        RuntimeGateway::ready(self).await
    }

    fn state(&self) -> ResourceState {
        RuntimeGateway::state(self)
    }
}
