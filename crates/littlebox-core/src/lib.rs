//! # littlebox-core
//!
//! Lazy, single-flight lifecycle management for LXD containers.
//!
//! A remote container is treated as a cheap local resource: opening a
//! [`ContainerHandle`] makes sure the container exists and is running,
//! closing it only lets go of the handle. Every open or close of the same
//! handle, however many callers ask at once, maps onto one underlying
//! operation and one shared outcome.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  littlebox-core (host)                   │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │ ContainerHandle │────▶│  LazyResource            │   │
//! │  │   - open()      │     │  (single-flight state)   │   │
//! │  │   - close()     │     └──────────────────────────┘   │
//! │  │   - stat()      │                                    │
//! │  └─────────────────┘                                    │
//! │           │ lookup / create / start                      │
//! │           ▼                                              │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │ RuntimeGateway  │────▶│  LazyResource            │   │
//! │  │   - stat()      │     │  (runtime info query)    │   │
//! │  │   - create_..() │     └──────────────────────────┘   │
//! │  │   - launch_..() │                                    │
//! │  └─────────────────┘                                    │
//! │           │                                              │
//! └───────────┼──────────────────────────────────────────────┘
//!             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │        littlebox-lxd: RemoteClient (REST over UDS)       │
//! └──────────────────────────────────────────────────────────┘
//!             │
//!             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                       LXD daemon                         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use littlebox_core::{ContainerHandle, ContainerSpec, RuntimeGateway};
//! use littlebox_lxd::LxdConfig;
//!
//! # async fn example() -> littlebox_core::Result<()> {
//! let gateway = RuntimeGateway::connect(LxdConfig::default())?;
//!
//! let spec = ContainerSpec::builder()
//!     .image("ubuntu/22.04")
//!     .config_entry("limits.cpu", "2")
//!     .build()?;
//! let container = ContainerHandle::new(gateway, "test", spec)?;
//!
//! // Creates and starts `test` if needed; concurrent callers share the work.
//! container.open().await?;
//! let current = container.stat().await?;
//! println!("{} is {}", current.name(), current.status());
//!
//! // Releases the handle; the container keeps running.
//! container.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Single-Flight Lifecycle**: one open/close routine per transition, shared by all callers
//! - **Bring-Up State Machine**: lookup, create-if-absent, start
//! - **Creation Policy**: `create_if_not_exists` gates implicit container creation
//! - **Shared Gateways**: many handles over one lazily connected runtime
//! - **Timeout Friendly**: abandoned callers never cancel a transition in flight

mod container;
mod error;
mod gateway;
mod resource;
mod spec;

pub use container::{BringUp, ContainerHandle};
pub use error::{CoreError, Result};
pub use gateway::{
    CreateContainerRequest, RuntimeGateway, Stat, DEFAULT_PROFILE, REFERENCE_ARCHITECTURE,
};
pub use resource::{LazyResource, Lifecycle, Resource, ResourceState};
pub use spec::{ContainerSpec, ContainerSpecBuilder, ImageSource};
