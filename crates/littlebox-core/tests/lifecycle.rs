//! Bring-up scenarios against an in-memory runtime.

use async_trait::async_trait;
use futures::future::join_all;
use littlebox_core::{
    BringUp, ContainerHandle, ContainerSpec, CoreError, ImageSource, Lifecycle, ResourceState,
    RuntimeGateway, Stat,
};
use littlebox_lxd::{
    ContainerDescriptor, LxdError, Method, RemoteClient, RemoteRequest, RuntimeInfo,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory stand-in for the LXD daemon.
#[derive(Default)]
struct MockRuntime {
    containers: Mutex<HashMap<String, ContainerDescriptor>>,
    requests: Mutex<Vec<RemoteRequest>>,
    info_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
    fail_info: Option<String>,
    fail_lookup: Option<String>,
    fail_create: Option<String>,
    fail_start: Option<String>,
}

impl MockRuntime {
    fn with_container(self, name: &str, status: &str) -> Self {
        self.containers.lock().unwrap().insert(
            name.to_string(),
            ContainerDescriptor {
                name: name.to_string(),
                status: status.to_string(),
                ..Default::default()
            },
        );
        self
    }

    fn creates(&self) -> Vec<serde_json::Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == Method::POST && r.path == "/containers")
            .filter_map(|r| r.body.clone())
            .collect()
    }

    fn state_actions(&self, action: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == Method::PUT && r.path.ends_with("/state"))
            .filter(|r| r.body.as_ref().and_then(|b| b.get("action")) == Some(&json!(action)))
            .count()
    }

    fn starts(&self) -> usize {
        self.state_actions("start")
    }

    fn lookups(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    fn info_calls(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteClient for MockRuntime {
    async fn get_info(&self) -> littlebox_lxd::Result<RuntimeInfo> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if let Some(msg) = &self.fail_info {
            return Err(LxdError::Transport(msg.clone()));
        }
        Ok(RuntimeInfo {
            api_version: "1.0".into(),
            auth: "trusted".into(),
            ..Default::default()
        })
    }

    async fn get_container(&self, name: &str) -> littlebox_lxd::Result<ContainerDescriptor> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if let Some(msg) = &self.fail_lookup {
            return Err(LxdError::Transport(msg.clone()));
        }
        self.containers
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| LxdError::Api {
                code: 404,
                message: "not found".into(),
            })
    }

    async fn request(&self, request: RemoteRequest) -> littlebox_lxd::Result<serde_json::Value> {
        self.requests.lock().unwrap().push(request.clone());
        tokio::task::yield_now().await;

        if request.method == Method::POST && request.path == "/containers" {
            if let Some(msg) = &self.fail_create {
                return Err(LxdError::Operation(msg.clone()));
            }
            let body = request.body.unwrap_or_default();
            let name = body["name"].as_str().unwrap_or_default().to_string();
            self.containers.lock().unwrap().insert(
                name.clone(),
                ContainerDescriptor {
                    name,
                    status: "Stopped".into(),
                    ephemeral: body["ephemeral"].as_bool().unwrap_or(false),
                    ..Default::default()
                },
            );
            return Ok(serde_json::Value::Null);
        }

        if request.method == Method::PUT && request.path.ends_with("/state") {
            let name = request
                .path
                .trim_start_matches("/containers/")
                .trim_end_matches("/state")
                .to_string();
            let action = request
                .body
                .as_ref()
                .and_then(|b| b["action"].as_str())
                .unwrap_or_default()
                .to_string();
            if action == "start" {
                if let Some(msg) = &self.fail_start {
                    return Err(LxdError::Operation(msg.clone()));
                }
            }
            let mut containers = self.containers.lock().unwrap();
            let container = containers.get_mut(&name).ok_or_else(|| LxdError::Api {
                code: 404,
                message: "not found".into(),
            })?;
            container.status = match action.as_str() {
                "start" => "Running".into(),
                _ => "Stopped".into(),
            };
            return Ok(serde_json::Value::Null);
        }

        Err(LxdError::Api {
            code: 400,
            message: format!("unexpected request {request}"),
        })
    }
}

fn setup(runtime: MockRuntime) -> (Arc<MockRuntime>, RuntimeGateway) {
    let runtime = Arc::new(runtime);
    let gateway = RuntimeGateway::new(runtime.clone());
    (runtime, gateway)
}

fn handle(gateway: &RuntimeGateway, name: &str, spec: ContainerSpec) -> ContainerHandle {
    ContainerHandle::new(gateway.clone(), name, spec).expect("valid handle")
}

#[tokio::test]
async fn test_missing_container_is_created_and_started() {
    let (runtime, gateway) = setup(MockRuntime::default());
    let spec = ContainerSpec::builder().image("19.10").build().unwrap();
    let container = handle(&gateway, "x", spec);

    container.open().await.expect("open should succeed");

    let creates = runtime.creates();
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0]["profiles"], json!(["default"]));
    assert_eq!(creates[0]["ephemeral"], json!(false));
    assert_eq!(creates[0]["architecture"], json!("x86_64"));
    assert_eq!(runtime.starts(), 1);
    assert_eq!(container.state(), ResourceState::Open);
    assert_eq!(container.bring_up(), Some(BringUp::Created));
    assert_eq!(container.reference().map(|r| r.name().to_string()), Some("x".into()));
}

#[tokio::test]
async fn test_running_container_is_left_alone() {
    let (runtime, gateway) = setup(MockRuntime::default().with_container("x", "Running"));
    let container = handle(&gateway, "x", ContainerSpec::default());

    container.open().await.unwrap();

    assert_eq!(runtime.lookups(), 1);
    assert!(runtime.creates().is_empty());
    assert_eq!(runtime.starts(), 0);
    assert_eq!(container.state(), ResourceState::Open);
    assert_eq!(container.bring_up(), Some(BringUp::AlreadyRunning));
}

#[tokio::test]
async fn test_stopped_container_is_started() {
    let (runtime, gateway) = setup(MockRuntime::default().with_container("x", "Stopped"));
    let container = handle(&gateway, "x", ContainerSpec::default());

    container.open().await.unwrap();

    assert_eq!(runtime.starts(), 1);
    assert!(runtime.creates().is_empty());
    assert_eq!(container.bring_up(), Some(BringUp::Started));
}

#[tokio::test]
async fn test_start_failure_is_surfaced_verbatim() {
    let runtime = MockRuntime {
        fail_start: Some("boom".into()),
        ..Default::default()
    }
    .with_container("x", "Stopped");
    let (runtime, gateway) = setup(runtime);
    let container = handle(&gateway, "x", ContainerSpec::default());

    let err = container.open().await.unwrap_err();

    let expected = CoreError::from(LxdError::Operation("boom".into()));
    assert_eq!(err, expected);
    assert_eq!(runtime.starts(), 1);
    assert_eq!(container.state(), ResourceState::Errored);
    assert_eq!(container.last_error(), Some(expected));
    assert!(container.reference().is_none());
}

#[tokio::test]
async fn test_opening_twice_looks_up_once() {
    let (runtime, gateway) = setup(MockRuntime::default().with_container("x", "running"));
    let container = handle(&gateway, "x", ContainerSpec::default());

    container.open().await.unwrap();
    container.open().await.unwrap();
    container.ready().await.unwrap();

    assert_eq!(runtime.lookups(), 1);
    assert_eq!(runtime.starts(), 0);
    assert!(runtime.creates().is_empty());
}

#[tokio::test]
async fn test_missing_container_without_create_policy() {
    let (runtime, gateway) = setup(MockRuntime::default());
    let spec = ContainerSpec::builder()
        .image("19.10")
        .create_if_not_exists(false)
        .build()
        .unwrap();
    let container = handle(&gateway, "x", spec);

    let err = container.open().await.unwrap_err();

    assert_eq!(err, CoreError::PolicyDenied("x".into()));
    assert!(err.is_not_found());
    assert!(runtime.creates().is_empty());
    assert_eq!(container.state(), ResourceState::Errored);
}

#[tokio::test]
async fn test_lookup_failure_does_not_create() {
    let runtime = MockRuntime {
        fail_lookup: Some("permission denied".into()),
        ..Default::default()
    };
    let (runtime, gateway) = setup(runtime);
    let container = handle(&gateway, "x", ContainerSpec::default());

    let err = container.open().await.unwrap_err();

    assert!(matches!(err, CoreError::Remote(_)));
    assert!(runtime.creates().is_empty());
    assert_eq!(runtime.starts(), 0);
}

#[tokio::test]
async fn test_create_failure_skips_start() {
    let runtime = MockRuntime {
        fail_create: Some("image not found".into()),
        ..Default::default()
    };
    let (runtime, gateway) = setup(runtime);
    let container = handle(&gateway, "x", ContainerSpec::builder().image("nope").build().unwrap());

    let err = container.open().await.unwrap_err();

    assert_eq!(err, CoreError::from(LxdError::Operation("image not found".into())));
    assert_eq!(runtime.creates().len(), 1);
    assert_eq!(runtime.starts(), 0);
}

#[tokio::test]
async fn test_alias_image_is_normalized() {
    let (runtime, gateway) = setup(MockRuntime::default());
    let spec = ContainerSpec::builder().image("19.10").build().unwrap();

    gateway.open().await.unwrap();
    gateway.create_container("x", &spec).await.unwrap();

    assert_eq!(runtime.creates()[0]["source"], json!({"type": "image", "alias": "19.10"}));
}

#[tokio::test]
async fn test_structured_image_passes_through() {
    let (runtime, gateway) = setup(MockRuntime::default());
    let source = json!({
        "type": "image",
        "certificate": "",
        "alias": "19.10",
        "server": "https://cloud-images.ubuntu.com/releases",
        "protocol": "simplestreams",
        "mode": "pull"
    });
    let spec = ContainerSpec::builder()
        .image(ImageSource::Source(source.as_object().cloned().unwrap()))
        .profile("web")
        .ephemeral(true)
        .build()
        .unwrap();

    gateway.open().await.unwrap();
    let created = gateway.create_container("x", &spec).await.unwrap();

    let body = &runtime.creates()[0];
    assert_eq!(body["source"], source);
    assert_eq!(body["profiles"], json!(["web"]));
    assert_eq!(body["ephemeral"], json!(true));
    assert!(created.descriptor().ephemeral);
    assert_eq!(runtime.starts(), 0);
}

#[tokio::test]
async fn test_create_rejects_empty_name_before_sending() {
    let (runtime, gateway) = setup(MockRuntime::default());

    let err = gateway
        .create_container("", &ContainerSpec::default())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::InvalidArgument(_)));
    assert!(runtime.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_launch_creates_then_starts() {
    let (runtime, gateway) = setup(MockRuntime::default());

    let launched = gateway
        .launch_container("x", &ContainerSpec::default())
        .await
        .unwrap();

    assert_eq!(launched.name(), "x");
    assert_eq!(runtime.creates().len(), 1);
    assert_eq!(runtime.starts(), 1);
}

#[tokio::test]
async fn test_concurrent_opens_share_one_bring_up() {
    let (runtime, gateway) = setup(MockRuntime::default());
    let container = handle(&gateway, "x", ContainerSpec::default());

    let results = join_all((0..10).map(|_| container.open())).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(runtime.info_calls(), 1);
    assert_eq!(runtime.creates().len(), 1);
    assert_eq!(runtime.starts(), 1);
}

#[tokio::test]
async fn test_handles_share_gateway_connection() {
    let (runtime, gateway) = setup(
        MockRuntime::default()
            .with_container("a", "Running")
            .with_container("b", "Running"),
    );
    let a = handle(&gateway, "a", ContainerSpec::default());
    let b = handle(&gateway, "b", ContainerSpec::default());

    let (ra, rb) = tokio::join!(a.open(), b.open());

    assert!(ra.is_ok() && rb.is_ok());
    assert_eq!(runtime.info_calls(), 1);
    assert_eq!(runtime.lookups(), 2);
    assert_eq!(gateway.state(), ResourceState::Open);
}

#[tokio::test]
async fn test_gateway_failure_fans_out_to_handles() {
    let runtime = MockRuntime {
        fail_info: Some("connection refused".into()),
        ..Default::default()
    };
    let (runtime, gateway) = setup(runtime);
    let a = handle(&gateway, "a", ContainerSpec::default());
    let b = handle(&gateway, "b", ContainerSpec::default());

    let (ra, rb) = tokio::join!(a.open(), b.open());

    let expected = CoreError::from(LxdError::Transport("connection refused".into()));
    assert_eq!(ra, Err(expected.clone()));
    assert_eq!(rb, Err(expected));
    assert_eq!(runtime.info_calls(), 1);
    assert_eq!(runtime.lookups(), 0);
}

#[tokio::test]
async fn test_close_keeps_container_running() {
    let (runtime, gateway) = setup(MockRuntime::default().with_container("x", "Running"));
    let container = handle(&gateway, "x", ContainerSpec::default());

    container.start().await.unwrap();
    container.stop().await.unwrap();

    assert_eq!(container.state(), ResourceState::Closed);
    assert!(container.reference().is_none());
    assert_eq!(runtime.state_actions("stop"), 0);

    container.open().await.unwrap();
    assert_eq!(runtime.lookups(), 2);
}

#[tokio::test]
async fn test_reference_is_a_snapshot() {
    let (_runtime, gateway) = setup(MockRuntime::default().with_container("x", "Stopped"));
    let container = handle(&gateway, "x", ContainerSpec::default());

    container.open().await.unwrap();

    let snapshot = container.reference().unwrap();
    assert_eq!(snapshot.status(), "Stopped");
    let current = container.stat().await.unwrap();
    assert!(current.is_running());
}

#[tokio::test]
async fn test_gateway_stat() {
    let (runtime, gateway) = setup(MockRuntime::default().with_container("x", "Running"));
    gateway.ready().await.unwrap();

    let runtime_stat = gateway.stat(None).await.unwrap();
    assert!(matches!(runtime_stat, Stat::Runtime(ref info) if info.api_version == "1.0"));

    let empty_name = gateway.stat(Some("")).await.unwrap();
    assert!(matches!(empty_name, Stat::Runtime(_)));

    let container_stat = gateway.stat(Some("x")).await.unwrap();
    assert!(matches!(container_stat, Stat::Container(ref r) if r.is_running()));

    let missing = gateway.stat(Some("y")).await.unwrap_err();
    assert_eq!(missing, CoreError::NotFound("not found".into()));

    assert_eq!(runtime.info_calls(), 3);
}

#[tokio::test]
async fn test_lifecycle_trait_objects() {
    let (_runtime, gateway) = setup(MockRuntime::default().with_container("x", "Running"));
    let container = handle(&gateway, "x", ContainerSpec::default());

    let resources: Vec<Box<dyn Lifecycle>> = vec![Box::new(gateway.clone()), Box::new(container)];
    for resource in &resources {
        resource.ready().await.unwrap();
        assert_eq!(resource.state(), ResourceState::Open);
    }
    for resource in &resources {
        resource.close().await.unwrap();
        assert_eq!(resource.state(), ResourceState::Closed);
    }
}
