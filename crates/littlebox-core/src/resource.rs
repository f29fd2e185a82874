//! Lazy, single-flight open/close lifecycle.
//!
//! [`LazyResource`] wraps a [`Resource`] (the routines that really acquire and
//! release something) with a state machine that guarantees each transition
//! runs its routine at most once no matter how many callers ask for it.
//!
//! # State machine
//!
//! ```text
//!             open()                 routine ok
//!   Closed ──────────▶ Opening ──────────────────▶ Open
//!     ▲                   │                         │
//!     │                   │ routine err             │ close()
//!     │                   ▼                         ▼
//!     │ close()        Errored ◀── open() retries  Closing
//!     └───────────────────┘                         │
//!     ▲                                             │ routine ok or err
//!     └─────────────────────────────────────────────┘
//! ```
//!
//! Callers that ask for the transition already in flight subscribe to it and
//! receive the same outcome, in the order they subscribed. Callers that ask
//! for the opposite transition are deferred until the in-flight one settles
//! and are then replayed in order.
//!
//! Routines run on spawned tasks. A caller that stops waiting (for example
//! by racing against a timer) does not cancel the transition; the resource
//! still settles and later callers observe the final state.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Current state of a lazy resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Not acquired. Initial state.
    Closed,
    /// Open routine in flight.
    Opening,
    /// Acquired.
    Open,
    /// Close routine in flight.
    Closing,
    /// Last open attempt failed. `open()` retries from scratch.
    Errored,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Opening => write!(f, "Opening"),
            Self::Open => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Errored => write!(f, "Errored"),
        }
    }
}

/// The acquire/release routines behind a [`LazyResource`].
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    /// Acquire the resource. Runs once per opening transition.
    async fn on_open(&self) -> Result<()>;

    /// Release the resource. Errors are logged and do not keep the
    /// resource from reaching `Closed`.
    async fn on_close(&self) -> Result<()>;
}

/// Open/close/ready capability shared by everything with a lazy lifecycle.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Acquire, or join the acquisition already in flight.
    async fn open(&self) -> Result<()>;

    /// Release, or join the release already in flight.
    async fn close(&self) -> Result<()>;

    /// Wait until the resource is open, opening it if nobody has yet.
    async fn ready(&self) -> Result<()>;

    /// Current state.
    fn state(&self) -> ResourceState;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Open,
    Close,
}

type Waiter = oneshot::Sender<Result<()>>;

struct Inner {
    state: ResourceState,
    /// Subscribers to the transition in flight.
    waiters: Vec<Waiter>,
    /// Requests queued behind the transition in flight.
    deferred: VecDeque<(Transition, Waiter)>,
    last_error: Option<CoreError>,
}

struct Shared<R> {
    label: String,
    hooks: R,
    inner: Mutex<Inner>,
}

/// Single-flight lifecycle around a [`Resource`].
///
/// Cloning is cheap and clones share the same state.
pub struct LazyResource<R: Resource> {
    shared: Arc<Shared<R>>,
}

impl<R: Resource> Clone for LazyResource<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: Resource> fmt::Debug for LazyResource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyResource")
            .field("label", &self.shared.label)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<R: Resource> LazyResource<R> {
    /// Wrap `hooks` in a closed resource. `label` identifies it in logs.
    pub fn new(label: impl Into<String>, hooks: R) -> Self {
        Self {
            shared: Arc::new(Shared {
                label: label.into(),
                hooks,
                inner: Mutex::new(Inner {
                    state: ResourceState::Closed,
                    waiters: Vec::new(),
                    deferred: VecDeque::new(),
                    last_error: None,
                }),
            }),
        }
    }

    /// The wrapped routines.
    pub fn hooks(&self) -> &R {
        &self.shared.hooks
    }

    /// Label used in logs.
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Current state.
    pub fn state(&self) -> ResourceState {
        self.shared.inner.lock().state
    }

    /// Whether the resource is open.
    pub fn is_open(&self) -> bool {
        self.state() == ResourceState::Open
    }

    /// Error from the most recent failed open, cleared by a successful one.
    pub fn last_error(&self) -> Option<CoreError> {
        self.shared.inner.lock().last_error.clone()
    }

    /// Acquire the resource.
    ///
    /// Returns immediately when already open. Otherwise joins the opening
    /// transition in flight, or starts one. An open requested while a close
    /// is in flight runs after the close settles.
    pub async fn open(&self) -> Result<()> {
        self.request(Transition::Open).await
    }

    /// Release the resource.
    ///
    /// Always ends in `Closed`. Closing a resource that never opened (or
    /// whose open failed) does not run the close routine.
    pub async fn close(&self) -> Result<()> {
        self.request(Transition::Close).await
    }

    /// Wait for the resource to be open.
    ///
    /// Same admission rules as [`open`](Self::open): late subscribers share
    /// the transition in flight, and a resource nobody opened yet is opened.
    pub async fn ready(&self) -> Result<()> {
        self.request(Transition::Open).await
    }

    async fn request(&self, transition: Transition) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.shared.inner.lock();
            self.shared.admit(&mut inner, transition, tx);
        }
        rx.await.unwrap_or_else(|_| {
            Err(CoreError::Remote(format!(
                "{} transition was abandoned",
                self.shared.label
            )))
        })
    }
}

#[async_trait]
impl<R: Resource> Lifecycle for LazyResource<R> {
    async fn open(&self) -> Result<()> {
        LazyResource::open(self).await
    }

    async fn close(&self) -> Result<()> {
        LazyResource::close(self).await
    }

    async fn ready(&self) -> Result<()> {
        LazyResource::ready(self).await
    }

    fn state(&self) -> ResourceState {
        LazyResource::state(self)
    }
}

impl<R: Resource> Shared<R> {
    /// Route one request: answer it, subscribe it, defer it, or start a transition for it.
    fn admit(self: &Arc<Self>, inner: &mut Inner, transition: Transition, waiter: Waiter) {
        use ResourceState::*;

        let in_flight = matches!(inner.state, Opening | Closing);
        if in_flight && !inner.deferred.is_empty() {
            // Keep request order once anything is queued.
            inner.deferred.push_back((transition, waiter));
            return;
        }

        match (inner.state, transition) {
            (Open, Transition::Open) | (Closed, Transition::Close) => {
                let _ = waiter.send(Ok(()));
            }
            (Errored, Transition::Close) => {
                tracing::debug!(resource = %self.label, "Closing errored resource");
                inner.state = Closed;
                let _ = waiter.send(Ok(()));
            }
            (Closed | Errored, Transition::Open) | (Open, Transition::Close) => {
                inner.waiters.push(waiter);
                self.begin(inner, transition);
            }
            (Opening, Transition::Open) | (Closing, Transition::Close) => {
                tracing::trace!(resource = %self.label, state = %inner.state, "Joining transition in flight");
                inner.waiters.push(waiter);
            }
            (Opening, Transition::Close) | (Closing, Transition::Open) => {
                tracing::trace!(resource = %self.label, state = %inner.state, "Deferring request");
                inner.deferred.push_back((transition, waiter));
            }
        }
    }

    /// Enter the transitional state and spawn the routine.
    fn begin(self: &Arc<Self>, inner: &mut Inner, transition: Transition) {
        inner.state = match transition {
            Transition::Open => ResourceState::Opening,
            Transition::Close => ResourceState::Closing,
        };
        tracing::debug!(resource = %self.label, state = %inner.state, "Transition started");

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let start = std::time::Instant::now();
            let routine = match transition {
                Transition::Open => shared.hooks.on_open(),
                Transition::Close => shared.hooks.on_close(),
            };
            let outcome = AssertUnwindSafe(routine)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    tracing::error!(resource = %shared.label, ?transition, "Lifecycle routine panicked");
                    Err(CoreError::Remote(format!(
                        "{} {:?} routine panicked",
                        shared.label, transition
                    )))
                });
            tracing::trace!(
                resource = %shared.label,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Routine finished"
            );
            shared.settle(transition, outcome);
        });
    }

    /// Record the outcome, notify subscribers in order, then replay deferred requests.
    fn settle(self: &Arc<Self>, transition: Transition, outcome: Result<()>) {
        let mut inner = self.inner.lock();

        let delivered = match (transition, outcome) {
            (Transition::Open, Ok(())) => {
                inner.state = ResourceState::Open;
                inner.last_error = None;
                Ok(())
            }
            (Transition::Open, Err(e)) => {
                tracing::debug!(resource = %self.label, error = %e, "Open failed");
                inner.state = ResourceState::Errored;
                inner.last_error = Some(e.clone());
                Err(e)
            }
            (Transition::Close, outcome) => {
                if let Err(e) = outcome {
                    tracing::warn!(resource = %self.label, error = %e, "Close routine failed, ignoring");
                }
                inner.state = ResourceState::Closed;
                Ok(())
            }
        };

        let waiters = std::mem::take(&mut inner.waiters);
        tracing::debug!(
            resource = %self.label,
            state = %inner.state,
            waiters = waiters.len(),
            "Transition settled"
        );
        for waiter in waiters {
            let _ = waiter.send(delivered.clone());
        }

        let deferred = std::mem::take(&mut inner.deferred);
        for (transition, waiter) in deferred {
            self.admit(&mut inner, transition, waiter);
        }
    }
}
