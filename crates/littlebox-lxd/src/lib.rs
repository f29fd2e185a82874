//! # littlebox-lxd
//!
//! Client for the LXD container runtime's REST API, spoken over the daemon's
//! Unix socket or, for remote daemons, HTTPS with a client certificate.
//!
//! ## Quick Start
//!
//! ```no_run
//! use littlebox_lxd::{LxdClient, LxdConfig, RemoteClient};
//!
//! # async fn example() -> littlebox_lxd::Result<()> {
//! let client = LxdClient::new(LxdConfig::default())?;
//!
//! let info = client.get_info().await?;
//! println!("LXD API {}", info.api_version);
//!
//! let container = client.get_container("web").await?;
//! println!("web is {}", container.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Envelope Decoding**: sync, async and error responses mapped to typed results
//! - **Operation Waiting**: background operations are awaited before a call returns
//! - **Not-Found Classification**: 404-class errors are distinguishable via [`LxdError::is_not_found`]
//! - **Remote Daemons**: HTTPS with a client certificate and a pinned server certificate
//! - **Name Checks**: container names are validated before they are put in a request path
//! - **Pluggable Seam**: the [`RemoteClient`] trait lets callers substitute the transport

mod client;
mod config;
mod error;
mod remote;
mod tls;
mod types;

pub use client::LxdClient;
pub use config::{
    LxdConfig, LxdConfigBuilder, RemoteEndpoint, DEFAULT_API_VERSION, DEFAULT_REMOTE_PORT,
    DEFAULT_SOCKET_PATH,
};
pub use error::{LxdError, Result, NOT_FOUND_CODE};
pub use hyper::Method;
pub use remote::{
    validate_container_name, ContainerRef, RemoteClient, MAX_NAME_LEN, STATE_CHANGE_TIMEOUT_SECS,
};
pub use types::{
    ContainerDescriptor, RemoteRequest, RuntimeEnvironment, RuntimeInfo, StateAction,
};
