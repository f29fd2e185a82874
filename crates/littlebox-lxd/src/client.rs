//! LXD REST client, over the daemon's Unix socket or HTTPS.
//!
//! Every response from LXD is wrapped in an envelope:
//!
//! ```text
//! {"type": "sync",  "status_code": 200, "metadata": {...}}
//! {"type": "async", "status_code": 100, "operation": "/1.0/operations/<id>", "metadata": {...}}
//! {"type": "error", "error_code": 404, "error": "not found"}
//! ```
//!
//! Async responses are resolved by waiting on the operation before the call
//! returns, so callers only ever see the final outcome.

use crate::config::LxdConfig;
use crate::error::{LxdError, Result};
use crate::remote::{validate_container_name, RemoteClient};
use crate::tls;
use crate::types::{ContainerDescriptor, RemoteRequest, RuntimeInfo};
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode};
use hyper_rustls::HttpsConnector;
use hyperlocal::{UnixClientExt, UnixConnector};
use serde::Deserialize;
use std::os::unix::ffi::OsStrExt;

/// `status_code` LXD reports for a successful operation. Codes below it
/// (created, running, pending, ...) mean the operation has not settled.
const OPERATION_SUCCESS: u16 = 200;

#[derive(Clone)]
enum Transport {
    Unix(Client<UnixConnector, Body>),
    Https(Client<HttpsConnector<HttpConnector>, Body>),
}

/// Client for an LXD daemon.
#[derive(Clone)]
pub struct LxdClient {
    transport: Transport,
    config: LxdConfig,
}

impl std::fmt::Debug for LxdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LxdClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LxdClient {
    /// Create a client for the given configuration.
    ///
    /// For a remote endpoint the certificate files are read here. No
    /// connection is made until the first request.
    pub fn new(config: LxdConfig) -> Result<Self> {
        config.validate()?;
        tracing::debug!(endpoint = %config.endpoint(), "Creating LXD client");
        let transport = match &config.remote {
            Some(remote) => Transport::Https(Client::builder().build(tls::connector(remote)?)),
            None => Transport::Unix(Client::unix()),
        };
        Ok(Self { transport, config })
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &LxdConfig {
        &self.config
    }

    /// Absolute request URI for an already versioned path.
    fn uri(&self, path: &str) -> Result<hyper::Uri> {
        let uri = match &self.config.remote {
            Some(remote) => format!("{}{path}", remote.base_url()),
            // hyperlocal carries the socket path hex-encoded in the host.
            None => format!(
                "unix://{}:0{path}",
                hex::encode(self.config.socket_path.as_os_str().as_bytes())
            ),
        };
        uri.parse()
            .map_err(|e| LxdError::Protocol(format!("invalid request path {path:?}: {e}")))
    }

    /// Send one HTTP exchange and decode the envelope.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Reply> {
        let start = std::time::Instant::now();
        let path = self.config.api_path(path);
        let uri = self.uri(&path)?;

        let mut builder = Request::builder().method(method.clone()).uri(uri);
        let body = match body {
            Some(value) => {
                let body = serde_json::to_string(value)?;
                tracing::trace!(body = %body, "LXD request body");
                builder = builder.header("Content-Type", "application/json");
                Body::from(body)
            }
            None => Body::empty(),
        };
        let request = builder
            .body(body)
            .map_err(|e| LxdError::Transport(format!("failed to build request: {e}")))?;

        tracing::debug!(method = %method, path = %path, "Sending LXD request");
        let exchange = async {
            match &self.transport {
                Transport::Unix(client) => client.request(request).await,
                Transport::Https(client) => client.request(request).await,
            }
        };
        let response = tokio::time::timeout(self.config.request_timeout, exchange)
            .await
            .map_err(|_| {
                tracing::warn!(method = %method, path = %path, "LXD request timed out");
                LxdError::Timeout(self.config.request_timeout)
            })?
            .map_err(|e| {
                tracing::error!(error = %e, path = %path, "LXD request failed");
                LxdError::from(e)
            })?;

        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await?;
        tracing::trace!(status = %status, body = %String::from_utf8_lossy(&bytes), "LXD response body");

        let reply = parse_reply(status, &bytes);
        tracing::debug!(
            method = %method,
            path = %path,
            status = %status,
            ok = reply.is_ok(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "LXD request completed"
        );
        reply
    }

    /// Block on a background operation until it settles.
    ///
    /// The daemon answers a wait once its own timeout expires even if the
    /// operation is still running; the wait is then re-issued until
    /// `request_timeout` has passed in total.
    async fn wait_operation(&self, operation: &str) -> Result<serde_json::Value> {
        let path = format!(
            "{}/wait?timeout={}",
            operation.trim_end_matches('/'),
            self.config.operation_timeout.as_secs()
        );
        let deadline = tokio::time::Instant::now() + self.config.request_timeout;

        loop {
            tracing::debug!(operation = %operation, "Waiting for LXD operation");
            let metadata = match self.send(Method::GET, &path, None).await? {
                Reply::Sync(metadata) => metadata,
                Reply::Async { .. } => {
                    return Err(LxdError::Protocol(
                        "operation wait returned an async response".into(),
                    ))
                }
            };

            match operation_outcome(metadata)? {
                Outcome::Done(value) => return Ok(value),
                Outcome::Pending(status) => {
                    if tokio::time::Instant::now() >= deadline {
                        tracing::warn!(operation = %operation, %status, "LXD operation did not settle in time");
                        return Err(LxdError::Timeout(self.config.request_timeout));
                    }
                    tracing::debug!(operation = %operation, %status, "LXD operation still pending");
                }
            }
        }
    }
}

#[async_trait]
impl RemoteClient for LxdClient {
    async fn get_info(&self) -> Result<RuntimeInfo> {
        let metadata = self.request(RemoteRequest::get("/")).await?;
        Ok(serde_json::from_value(metadata)?)
    }

    async fn get_container(&self, name: &str) -> Result<ContainerDescriptor> {
        validate_container_name(name)?;
        let metadata = self
            .request(RemoteRequest::get(format!("/containers/{name}")))
            .await?;
        Ok(serde_json::from_value(metadata)?)
    }

    async fn request(&self, request: RemoteRequest) -> Result<serde_json::Value> {
        match self
            .send(request.method.clone(), &request.path, request.body.as_ref())
            .await?
        {
            Reply::Sync(metadata) => Ok(metadata),
            Reply::Async { operation, .. } => self.wait_operation(&operation).await,
        }
    }
}

/// Decoded response envelope.
#[derive(Debug, Clone, PartialEq)]
enum Reply {
    Sync(serde_json::Value),
    Async {
        operation: String,
        #[allow(dead_code)]
        metadata: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    error_code: u16,
    #[serde(default)]
    error: String,
    #[serde(default)]
    operation: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

fn parse_reply(status: StatusCode, bytes: &[u8]) -> Result<Reply> {
    let envelope: Envelope = match serde_json::from_slice(bytes) {
        Ok(envelope) => envelope,
        // Proxies and older daemons may answer errors with plain text.
        Err(_) if !status.is_success() => {
            return Err(LxdError::Api {
                code: status.as_u16(),
                message: String::from_utf8_lossy(bytes).trim().to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    match envelope.kind.as_str() {
        "sync" => Ok(Reply::Sync(envelope.metadata)),
        "async" => {
            if envelope.operation.is_empty() {
                return Err(LxdError::Protocol("async response without operation".into()));
            }
            Ok(Reply::Async {
                operation: envelope.operation,
                metadata: envelope.metadata,
            })
        }
        "error" => {
            let code = if envelope.error_code != 0 {
                envelope.error_code
            } else {
                status.as_u16()
            };
            Err(LxdError::Api {
                code,
                message: envelope.error,
            })
        }
        other => Err(LxdError::Protocol(format!("unknown response type: {other}"))),
    }
}

/// State of an operation after a wait.
#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    /// Settled successfully, with the operation's metadata.
    Done(serde_json::Value),
    /// Not settled yet, with the daemon's status string.
    Pending(String),
}

/// Turn an operation object into the call's result.
fn operation_outcome(operation: serde_json::Value) -> Result<Outcome> {
    let code = operation
        .get("status_code")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| LxdError::Protocol("operation without status_code".into()))?;

    if code == u64::from(OPERATION_SUCCESS) {
        return Ok(Outcome::Done(
            operation
                .get("metadata")
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        ));
    }
    if code < u64::from(OPERATION_SUCCESS) {
        let status = operation
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("Running")
            .to_string();
        return Ok(Outcome::Pending(status));
    }

    let err = operation
        .get("err")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .or_else(|| operation.get("status").and_then(|v| v.as_str()))
        .unwrap_or("unknown error")
        .to_string();
    tracing::debug!(status_code = code, error = %err, "LXD operation failed");
    Err(LxdError::Operation(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{UnixListener, UnixStream};

    #[test]
    fn test_parse_sync_reply() {
        let body = json!({
            "type": "sync",
            "status": "Success",
            "status_code": 200,
            "metadata": {"api_version": "1.0"}
        });
        let reply = parse_reply(StatusCode::OK, body.to_string().as_bytes()).unwrap();
        assert_eq!(reply, Reply::Sync(json!({"api_version": "1.0"})));
    }

    #[test]
    fn test_parse_async_reply() {
        let body = json!({
            "type": "async",
            "status_code": 100,
            "operation": "/1.0/operations/abc",
            "metadata": {"id": "abc"}
        });
        let reply = parse_reply(StatusCode::ACCEPTED, body.to_string().as_bytes()).unwrap();
        assert!(matches!(reply, Reply::Async { ref operation, .. } if operation == "/1.0/operations/abc"));
    }

    #[test]
    fn test_parse_error_reply_is_not_found() {
        let body = json!({"type": "error", "error": "not found", "error_code": 404});
        let err = parse_reply(StatusCode::NOT_FOUND, body.to_string().as_bytes()).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "LXD API error 404: not found");
    }

    #[test]
    fn test_parse_error_falls_back_to_http_status() {
        let err = parse_reply(StatusCode::NOT_FOUND, b"404 page not found").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_parse_malformed_success_body() {
        let err = parse_reply(StatusCode::OK, b"not json").unwrap_err();
        assert!(matches!(err, LxdError::Protocol(_)));
    }

    #[test]
    fn test_parse_unknown_type() {
        let body = json!({"type": "mystery"});
        let err = parse_reply(StatusCode::OK, body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, LxdError::Protocol(_)));
    }

    #[test]
    fn test_operation_success() {
        let op = json!({"id": "abc", "status": "Success", "status_code": 200, "metadata": null, "err": ""});
        assert_eq!(operation_outcome(op).unwrap(), Outcome::Done(serde_json::Value::Null));
    }

    #[test]
    fn test_operation_failure_surfaces_err() {
        let op = json!({"status": "Failure", "status_code": 400, "err": "Failed to fetch image"});
        let err = operation_outcome(op).unwrap_err();
        assert!(matches!(err, LxdError::Operation(ref m) if m == "Failed to fetch image"));
    }

    #[test]
    fn test_operation_still_running() {
        let op = json!({"status": "Running", "status_code": 103, "err": ""});
        assert_eq!(
            operation_outcome(op).unwrap(),
            Outcome::Pending("Running".into())
        );
    }

    #[test]
    fn test_client_rejects_invalid_config() {
        let config = LxdConfig {
            socket_path: "".into(),
            ..Default::default()
        };
        assert!(LxdClient::new(config).is_err());
    }

    /// A socket that answers each connection with the next canned response
    /// (the last one repeats) and records `METHOD path` of every request.
    struct CannedDaemon {
        dir: tempfile::TempDir,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl CannedDaemon {
        fn spawn(responses: Vec<serde_json::Value>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let listener = UnixListener::bind(dir.path().join("unix.socket")).unwrap();
            let requests = Arc::new(Mutex::new(Vec::new()));
            let seen = Arc::clone(&requests);

            tokio::spawn(async move {
                let mut queue = VecDeque::from(responses);
                while let Ok((mut stream, _)) = listener.accept().await {
                    let line = read_request(&mut stream).await;
                    seen.lock().unwrap().push(line);

                    let body = if queue.len() > 1 {
                        queue.pop_front().unwrap()
                    } else {
                        queue.front().cloned().unwrap()
                    };
                    let body = body.to_string();
                    let status = if body.contains(r#""type":"error""#) {
                        "404 Not Found"
                    } else {
                        "200 OK"
                    };
                    let response = format!(
                        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                }
            });

            Self { dir, requests }
        }

        fn socket_path(&self) -> PathBuf {
            self.dir.path().join("unix.socket")
        }

        fn client(&self, request_timeout: Duration) -> LxdClient {
            let config = LxdConfig::builder()
                .socket_path(self.socket_path())
                .operation_timeout(Duration::from_millis(100))
                .request_timeout(request_timeout)
                .build()
                .unwrap();
            LxdClient::new(config).unwrap()
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    /// Read one request (head and body) and return its `METHOD path`.
    async fn read_request(stream: &mut UnixStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let head_end = loop {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            let n = stream.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break buf.len();
            }
            buf.extend_from_slice(&chunk[..n]);
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < head_end + length {
            let n = stream.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let request_line = head.lines().next().unwrap_or_default();
        request_line
            .rsplit_once(' ')
            .map(|(line, _version)| line.to_string())
            .unwrap_or_default()
    }

    fn sync(metadata: serde_json::Value) -> serde_json::Value {
        json!({"type": "sync", "status": "Success", "status_code": 200, "metadata": metadata})
    }

    fn accepted(id: &str) -> serde_json::Value {
        json!({
            "type": "async",
            "status": "Operation created",
            "status_code": 100,
            "operation": format!("/1.0/operations/{id}"),
            "metadata": {"id": id, "status_code": 103}
        })
    }

    #[tokio::test]
    async fn test_get_container_over_socket() {
        let daemon = CannedDaemon::spawn(vec![sync(json!({
            "name": "web",
            "status": "Running",
            "status_code": 103,
            "architecture": "x86_64",
            "ephemeral": false,
            "profiles": ["default"],
            "config": {},
            "created_at": "2024-01-01T00:00:00Z"
        }))]);
        let client = daemon.client(Duration::from_secs(5));

        let container = client.get_container("web").await.unwrap();
        assert_eq!(container.name, "web");
        assert!(container.is_running());
        assert_eq!(daemon.requests(), vec!["GET /1.0/containers/web"]);
    }

    #[tokio::test]
    async fn test_error_envelope_over_socket() {
        let daemon = CannedDaemon::spawn(vec![json!({
            "type": "error",
            "error": "Instance not found",
            "error_code": 404
        })]);
        let client = daemon.client(Duration::from_secs(5));

        let err = client.get_container("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_async_operation_failure_surfaces_err() {
        let daemon = CannedDaemon::spawn(vec![
            accepted("abc"),
            sync(json!({
                "id": "abc",
                "status": "Failure",
                "status_code": 400,
                "err": "Failed to fetch image"
            })),
        ]);
        let client = daemon.client(Duration::from_secs(5));

        let err = client
            .request(RemoteRequest::post("/containers", json!({"name": "web"})))
            .await
            .unwrap_err();
        assert!(matches!(err, LxdError::Operation(ref m) if m == "Failed to fetch image"));
        assert_eq!(
            daemon.requests(),
            vec![
                "POST /1.0/containers",
                "GET /1.0/operations/abc/wait?timeout=0",
            ]
        );
    }

    #[tokio::test]
    async fn test_wait_is_reissued_while_running() {
        let daemon = CannedDaemon::spawn(vec![
            accepted("abc"),
            sync(json!({"id": "abc", "status": "Running", "status_code": 103, "err": ""})),
            sync(json!({
                "id": "abc",
                "status": "Success",
                "status_code": 200,
                "metadata": {"done": true},
                "err": ""
            })),
        ]);
        let client = daemon.client(Duration::from_secs(5));

        let metadata = client
            .request(RemoteRequest::put("/containers/web/state", json!({"action": "start"})))
            .await
            .unwrap();
        assert_eq!(metadata, json!({"done": true}));
        assert_eq!(daemon.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_wait_gives_up_after_request_timeout() {
        let daemon = CannedDaemon::spawn(vec![
            accepted("abc"),
            sync(json!({"id": "abc", "status": "Running", "status_code": 103, "err": ""})),
        ]);
        let client = daemon.client(Duration::from_secs(1));

        let err = client
            .request(RemoteRequest::put("/containers/web/state", json!({"action": "start"})))
            .await
            .unwrap_err();
        assert!(matches!(err, LxdError::Timeout(t) if t == Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_silent_daemon_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("unix.socket");
        let listener = UnixListener::bind(&socket).unwrap();
        // Accept and hold connections without ever answering.
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let config = LxdConfig::builder()
            .socket_path(&socket)
            .operation_timeout(Duration::from_millis(100))
            .request_timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        let client = LxdClient::new(config).unwrap();

        let err = client.get_info().await.unwrap_err();
        assert!(matches!(err, LxdError::Timeout(t) if t == Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_invalid_names_never_reach_the_socket() {
        let daemon = CannedDaemon::spawn(vec![sync(json!({"name": "web"}))]);
        let client = daemon.client(Duration::from_secs(5));

        for name in ["my box", "a/b", "x?y"] {
            let err = client.get_container(name).await.unwrap_err();
            assert!(matches!(err, LxdError::InvalidName { .. }), "{name}: {err}");
        }
        assert!(daemon.requests().is_empty());
    }

    #[test]
    fn test_unrepresentable_path_is_an_error() {
        let client = LxdClient::new(LxdConfig::default()).unwrap();
        let err = client.uri("/1.0/containers/my box").unwrap_err();
        assert!(matches!(err, LxdError::Protocol(_)));
        assert!(client.uri("/1.0/containers/web").is_ok());
    }
}
