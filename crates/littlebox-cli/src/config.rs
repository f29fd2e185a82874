//! Configuration for the littlebox CLI.
//!
//! Connection settings are loaded from environment variables with sensible defaults.

use littlebox_acl::AccessControl;
use littlebox_lxd::{LxdConfig, RemoteEndpoint, DEFAULT_API_VERSION, DEFAULT_SOCKET_PATH};
use std::path::PathBuf;
use std::time::Duration;

/// Socket used by distribution (non-snap) packages.
pub const LEGACY_SOCKET_PATH: &str = "/var/lib/lxd/unix.socket";

/// Connection settings for the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    /// Path to the LXD daemon socket.
    pub socket_path: PathBuf,

    /// REST API version prefix.
    pub api_version: String,

    /// Server-side wait for background operations.
    pub operation_timeout: Duration,

    /// Upper bound for a single HTTP exchange.
    pub request_timeout: Duration,

    /// Optional JSON grant table replacing the standard role hierarchy.
    pub policy_path: Option<PathBuf>,

    /// HTTPS URL of a remote daemon. The socket is ignored when set.
    pub remote: Option<String>,

    /// Client certificate presented to a remote daemon.
    pub client_cert: PathBuf,

    /// Key for `client_cert`.
    pub client_key: PathBuf,

    /// Certificate the remote daemon is expected to present.
    pub server_cert: Option<PathBuf>,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("LXD socket not found: {0}")]
    MissingSocket(PathBuf),

    #[error("{what} not found: {path}")]
    MissingFile { what: &'static str, path: PathBuf },

    #[error("LITTLEBOX_SERVER_CERT is required with LITTLEBOX_REMOTE")]
    MissingServerCert,

    #[error("invalid connection settings: {0}")]
    Invalid(#[from] littlebox_lxd::LxdError),

    #[error("cannot read policy {path}: {source}")]
    PolicyFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid policy: {0}")]
    Policy(#[from] littlebox_acl::AclError),
}

impl Default for CliConfig {
    fn default() -> Self {
        let lxd = LxdConfig::default();
        Self {
            socket_path: lxd.socket_path,
            api_version: lxd.api_version,
            operation_timeout: lxd.operation_timeout,
            request_timeout: lxd.request_timeout,
            policy_path: None,
            remote: None,
            client_cert: lxc_config_dir().join("client.crt"),
            client_key: lxc_config_dir().join("client.key"),
            server_cert: None,
        }
    }
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `LITTLEBOX_SOCKET` | `/var/snap/lxd/common/lxd/unix.socket`, or `/var/lib/lxd/unix.socket` if only that exists |
    /// | `LITTLEBOX_API_VERSION` | `1.0` |
    /// | `LITTLEBOX_OPERATION_TIMEOUT` | `30` (seconds) |
    /// | `LITTLEBOX_REQUEST_TIMEOUT` | `60` (seconds) |
    /// | `LITTLEBOX_POLICY` | unset (standard role hierarchy) |
    /// | `LITTLEBOX_REMOTE` | unset (use the socket), e.g. `https://lxd.example.com:8443` |
    /// | `LITTLEBOX_CLIENT_CERT` | `$LXD_CONF/client.crt`, `$LXD_CONF` defaulting to `~/.config/lxc` |
    /// | `LITTLEBOX_CLIENT_KEY` | `$LXD_CONF/client.key` |
    /// | `LITTLEBOX_SERVER_CERT` | unset, required with `LITTLEBOX_REMOTE` |
    pub fn from_env() -> Self {
        let default = Self::default();

        let socket_path = std::env::var("LITTLEBOX_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_socket());

        Self {
            socket_path,
            api_version: std::env::var("LITTLEBOX_API_VERSION")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(default.api_version),
            operation_timeout: std::env::var("LITTLEBOX_OPERATION_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.operation_timeout),
            request_timeout: std::env::var("LITTLEBOX_REQUEST_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.request_timeout),
            policy_path: non_empty_var("LITTLEBOX_POLICY").map(PathBuf::from),
            remote: non_empty_var("LITTLEBOX_REMOTE"),
            client_cert: non_empty_var("LITTLEBOX_CLIENT_CERT")
                .map(PathBuf::from)
                .unwrap_or(default.client_cert),
            client_key: non_empty_var("LITTLEBOX_CLIENT_KEY")
                .map(PathBuf::from)
                .unwrap_or(default.client_key),
            server_cert: non_empty_var("LITTLEBOX_SERVER_CERT").map(PathBuf::from),
        }
    }

    /// Connection settings for the LXD client.
    pub fn lxd_config(&self) -> Result<LxdConfig, ConfigError> {
        let mut builder = LxdConfig::builder()
            .socket_path(&self.socket_path)
            .api_version(&self.api_version)
            .operation_timeout(self.operation_timeout)
            .request_timeout(self.request_timeout);
        if let Some(remote) = self.remote_endpoint()? {
            builder = builder.remote(remote);
        }
        Ok(builder.build()?)
    }

    fn remote_endpoint(&self) -> Result<Option<RemoteEndpoint>, ConfigError> {
        let Some(url) = &self.remote else {
            return Ok(None);
        };
        let server_cert = self
            .server_cert
            .clone()
            .ok_or(ConfigError::MissingServerCert)?;
        Ok(Some(RemoteEndpoint {
            url: url.clone(),
            client_cert: self.client_cert.clone(),
            client_key: self.client_key.clone(),
            server_cert,
        }))
    }

    /// Load the grant table, falling back to the standard hierarchy.
    pub fn access_control(&self) -> Result<AccessControl, ConfigError> {
        let Some(path) = &self.policy_path else {
            return Ok(AccessControl::standard());
        };
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::PolicyFile {
            path: path.clone(),
            source,
        })?;
        Ok(AccessControl::from_json(&json)?)
    }

    /// Validate that the socket (or the remote's certificate files) exist
    /// and the settings are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.remote_endpoint()? {
            Some(remote) => {
                for (what, path) in [
                    ("client certificate", &remote.client_cert),
                    ("client key", &remote.client_key),
                    ("server certificate", &remote.server_cert),
                ] {
                    if !path.exists() {
                        return Err(ConfigError::MissingFile {
                            what,
                            path: path.clone(),
                        });
                    }
                }
            }
            None if !self.socket_path.exists() => {
                return Err(ConfigError::MissingSocket(self.socket_path.clone()));
            }
            None => {}
        }
        self.lxd_config()?;
        self.access_control()?;
        Ok(())
    }

    /// Validate configuration but only log warnings instead of failing.
    pub fn validate_warn(&self) {
        if let Err(e) = self.validate() {
            tracing::warn!(error = %e, "Configuration problem");
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Where the `lxc` client keeps its certificate.
fn lxc_config_dir() -> PathBuf {
    if let Some(dir) = non_empty_var("LXD_CONF") {
        return PathBuf::from(dir);
    }
    let home = non_empty_var("HOME").unwrap_or_else(|| "/root".to_string());
    PathBuf::from(home).join(".config").join("lxc")
}

fn default_socket() -> PathBuf {
    let snap = PathBuf::from(DEFAULT_SOCKET_PATH);
    let legacy = PathBuf::from(LEGACY_SOCKET_PATH);
    if !snap.exists() && legacy.exists() {
        legacy
    } else {
        snap
    }
}
