//! Typed LXD runtime objects.

use hyper::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Server information returned by `GET /1.0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    /// Highest API version the daemon speaks.
    #[serde(default)]
    pub api_version: String,
    /// `stable` or `development`.
    #[serde(default)]
    pub api_status: String,
    /// `trusted` or `untrusted`.
    #[serde(default)]
    pub auth: String,
    /// Host environment details (absent for untrusted clients).
    #[serde(default)]
    pub environment: Option<RuntimeEnvironment>,
}

/// Host environment section of [`RuntimeInfo`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeEnvironment {
    #[serde(default)]
    pub server_version: String,
    #[serde(default)]
    pub kernel: String,
    #[serde(default)]
    pub kernel_version: String,
    #[serde(default)]
    pub architectures: Vec<String>,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub storage: String,
}

/// The daemon's representation of a container (`GET /1.0/containers/<name>`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    pub name: String,
    /// Human readable status, e.g. `Running` or `Stopped`.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub profiles: Vec<String>,
    #[serde(default)]
    pub config: HashMap<String, String>,
    #[serde(default)]
    pub created_at: String,
}

impl ContainerDescriptor {
    /// Whether the last known status is running (case-insensitive).
    pub fn is_running(&self) -> bool {
        self.status.eq_ignore_ascii_case("running")
    }
}

/// Actions accepted by `PUT /1.0/containers/<name>/state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateAction {
    Start,
    Stop,
    Restart,
    Freeze,
    Unfreeze,
}

impl fmt::Display for StateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateAction::Start => write!(f, "start"),
            StateAction::Stop => write!(f, "stop"),
            StateAction::Restart => write!(f, "restart"),
            StateAction::Freeze => write!(f, "freeze"),
            StateAction::Unfreeze => write!(f, "unfreeze"),
        }
    }
}

/// A generic REST call against the daemon.
///
/// `path` is relative to the API version (`/containers` means `/1.0/containers`).
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl RemoteRequest {
    /// Build a `GET` request.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    /// Build a `POST` request with a JSON body.
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
        }
    }

    /// Build a `PUT` request with a JSON body.
    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::PUT,
            path: path.into(),
            body: Some(body),
        }
    }

    /// Build a `DELETE` request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::DELETE,
            path: path.into(),
            body: None,
        }
    }
}

impl fmt::Display for RemoteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}
