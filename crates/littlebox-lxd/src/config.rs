//! Connection configuration for the LXD daemon.

use crate::error::{LxdError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default socket for the snap-packaged daemon.
pub const DEFAULT_SOCKET_PATH: &str = "/var/snap/lxd/common/lxd/unix.socket";

/// Default REST API version prefix.
pub const DEFAULT_API_VERSION: &str = "1.0";

/// Default port of the daemon's HTTPS listener.
pub const DEFAULT_REMOTE_PORT: u16 = 8443;

/// A daemon reached over HTTPS with a trusted client certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    /// Base URL, e.g. `https://lxd.example.com:8443`.
    pub url: String,
    /// PEM certificate the daemon has in its trust store.
    pub client_cert: PathBuf,
    /// PEM private key for `client_cert`.
    pub client_key: PathBuf,
    /// PEM certificate the daemon presents. It is the only trusted root.
    pub server_cert: PathBuf,
}

impl RemoteEndpoint {
    /// Parse and check the endpoint. Certificate files are read by the client.
    pub fn validate(&self) -> Result<()> {
        let uri: hyper::Uri = self
            .url
            .parse()
            .map_err(|e| LxdError::Config(format!("invalid remote url {:?}: {e}", self.url)))?;
        if uri.scheme_str() != Some("https") {
            return Err(LxdError::Config(format!(
                "remote url {:?} must use https",
                self.url
            )));
        }
        if uri.host().map_or(true, str::is_empty) {
            return Err(LxdError::Config(format!(
                "remote url {:?} has no host",
                self.url
            )));
        }
        if uri.path_and_query().is_some_and(|p| p.as_str() != "/") {
            return Err(LxdError::Config(format!(
                "remote url {:?} must not carry a path",
                self.url
            )));
        }
        for (what, path) in [
            ("client_cert", &self.client_cert),
            ("client_key", &self.client_key),
            ("server_cert", &self.server_cert),
        ] {
            if path.as_os_str().is_empty() {
                return Err(LxdError::Config(format!("{what} is required for a remote")));
            }
        }
        Ok(())
    }

    /// Base URL without a trailing slash, with the default port filled in.
    pub fn base_url(&self) -> String {
        let url = self.url.trim_end_matches('/');
        match url.parse::<hyper::Uri>() {
            Ok(uri) if uri.port().is_none() => format!("{url}:{DEFAULT_REMOTE_PORT}"),
            _ => url.to_string(),
        }
    }
}

/// Connection options for [`LxdClient`](crate::LxdClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LxdConfig {
    /// Path to the daemon's Unix socket.
    pub socket_path: PathBuf,
    /// Talk to a remote daemon instead of the local socket.
    pub remote: Option<RemoteEndpoint>,
    /// API version prefix (default: `1.0`).
    pub api_version: String,
    /// Server-side wait for background operations (default: 30s).
    pub operation_timeout: Duration,
    /// Upper bound for a single HTTP exchange (default: 60s).
    pub request_timeout: Duration,
}

impl Default for LxdConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            remote: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            operation_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl LxdConfig {
    /// Create a new config builder.
    pub fn builder() -> LxdConfigBuilder {
        LxdConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        match &self.remote {
            Some(remote) => remote.validate()?,
            None if self.socket_path.as_os_str().is_empty() => {
                return Err(LxdError::Config("socket_path is required".into()));
            }
            None => {}
        }
        if self.api_version.is_empty() {
            return Err(LxdError::Config("api_version is required".into()));
        }
        if self.operation_timeout.is_zero() {
            return Err(LxdError::Config("operation_timeout must be > 0".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(LxdError::Config("request_timeout must be > 0".into()));
        }
        // Operation waits are themselves HTTP requests.
        if self.request_timeout <= self.operation_timeout {
            return Err(LxdError::Config(
                "request_timeout must exceed operation_timeout".into(),
            ));
        }
        Ok(())
    }

    /// Where requests go, for logs.
    pub fn endpoint(&self) -> String {
        match &self.remote {
            Some(remote) => remote.base_url(),
            None => format!("unix:{}", self.socket_path.display()),
        }
    }

    /// Prefix a relative API path with the version, e.g. `/containers` -> `/1.0/containers`.
    ///
    /// Paths that already carry the version prefix are returned unchanged.
    pub fn api_path(&self, path: &str) -> String {
        let prefix = format!("/{}", self.api_version);
        if path == prefix || path.starts_with(&format!("{prefix}/")) {
            return path.to_string();
        }
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            prefix
        } else {
            format!("{prefix}/{path}")
        }
    }
}

/// Builder for LxdConfig.
#[derive(Debug, Default)]
pub struct LxdConfigBuilder {
    config: LxdConfig,
}

impl LxdConfigBuilder {
    /// Set the daemon socket path.
    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.socket_path = path.into();
        self
    }

    /// Talk to a remote daemon over HTTPS.
    pub fn remote(mut self, remote: RemoteEndpoint) -> Self {
        self.config.remote = Some(remote);
        self
    }

    /// Set the API version prefix.
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.config.api_version = version.into();
        self
    }

    /// Set the server-side wait for background operations.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout = timeout;
        self
    }

    /// Set the per-request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<LxdConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
