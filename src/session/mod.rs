//! Session manager - owns the MIDI access handle and the port registry
//!
//! The manager drives the `Idle -> Connecting -> Active -> Idle` lifecycle,
//! wires inbound messages from every active input into the fanout router, and
//! turns platform state notifications into device events.
//!
//! Every platform callback carries the session epoch it was registered under.
//! `cleanup()` bumps the epoch before detaching listeners, so a callback that
//! was already queued when cleanup ran is discarded instead of acting on a
//! dead session. A connect attempt takes a fresh epoch when it starts, so an
//! attempt overtaken by cleanup (or by a newer attempt) aborts without
//! installing anything.

mod dispatch;
mod handlers;
mod reconnect;


use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::error::ConnectionError;
use crate::platform::{MidiAccess, MidiPlatform, Subscription};
use crate::ports::{PortInfo, PortRegistry};
use crate::router::RoutingResult;

pub use reconnect::retry_delay;

const EVENT_CAPACITY: usize = 256;

/// Lifecycle state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
}

/// Domain events for the UI layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "detail", rename_all = "camelCase")]
pub enum SessionEvent {
    DeviceConnected { port: PortInfo },
    DeviceDisconnected { port: PortInfo },
    MessageRouted(RoutingResult),
}

#[derive(Default)]
struct Listeners {
    state: Option<Subscription>,
    inputs: Vec<Subscription>,
}

pub(crate) struct SessionInner {
    platform: Arc<dyn MidiPlatform>,
    /// Session token; callbacks registered under an older epoch are ignored
    epoch: AtomicU64,
    state: Mutex<SessionState>,
    access: Mutex<Option<Arc<dyn MidiAccess>>>,
    registry: Mutex<PortRegistry>,
    listeners: Mutex<Listeners>,
    events: broadcast::Sender<SessionEvent>,
}

/// Handle to a MIDI session. Cloning is cheap and clones share the session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Create an idle manager over an explicitly provided platform
    pub fn new(platform: Arc<dyn MidiPlatform>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                platform,
                epoch: AtomicU64::new(0),
                state: Mutex::new(SessionState::Idle),
                access: Mutex::new(None),
                registry: Mutex::new(PortRegistry::new()),
                listeners: Mutex::new(Listeners::default()),
                events,
            }),
        }
    }

    /// Acquire MIDI access and start routing.
    ///
    /// Returns whether at least one input or output is active. Calling this
    /// on an active session re-enumerates the ports instead of subscribing
    /// twice.
    pub async fn connect(&self) -> Result<bool, ConnectionError> {
        // Each attempt owns an epoch; cleanup() or a later attempt moves it on
        let epoch = {
            let mut state = self.inner.state.lock();
            let current = *state;
            match current {
                SessionState::Active => {
                    drop(state);
                    debug!("connect() on active session, refreshing devices");
                    let epoch = self.inner.current_epoch();
                    self.inner.refresh_devices(epoch);
                    return Ok(self.inner.registry.lock().has_ports());
                }
                SessionState::Connecting => return Err(ConnectionError::InProgress),
                SessionState::Idle => {
                    *state = SessionState::Connecting;
                    self.inner.epoch.fetch_add(1, Ordering::AcqRel) + 1
                }
            }
        };

        let access = match self.inner.platform.request_access().await {
            Ok(access) => access,
            Err(e) => {
                error!("MIDI connection error: {}", e);
                let mut state = self.inner.state.lock();
                if self.inner.is_current(epoch) {
                    *state = SessionState::Idle;
                }
                return Err(e);
            }
        };

        {
            let mut state = self.inner.state.lock();
            if !self.inner.is_current(epoch) {
                // cleanup() ran while access was being requested
                return Err(ConnectionError::Aborted);
            }
            *self.inner.access.lock() = Some(access.clone());
            *state = SessionState::Active;
        }

        let state_sub = access.subscribe_state(self.inner.state_handler(epoch));
        {
            let mut listeners = self.inner.listeners.lock();
            if !self.inner.is_current(epoch) {
                drop(listeners);
                drop(state_sub);
                return Err(ConnectionError::Aborted);
            }
            listeners.state = Some(state_sub);
        }

        let known: Vec<PortInfo> = access
            .inputs()
            .into_iter()
            .chain(access.outputs())
            .collect();
        let seeded = {
            let mut registry = self.inner.registry.lock();
            // cleanup() bumps the epoch before clearing the registry
            if !self.inner.is_current(epoch) {
                return Err(ConnectionError::Aborted);
            }
            registry.seed(&known)
        };
        info!("Initialized port states for {} ports", seeded);

        self.inner.refresh_devices(epoch);

        let registry = self.inner.registry.lock();
        if !self.inner.is_current(epoch) {
            return Err(ConnectionError::Aborted);
        }
        Ok(registry.has_ports())
    }

    /// Detach every listener, forget all ports, and release the access handle.
    ///
    /// Idempotent. No callback acts on this session after it returns.
    pub fn cleanup(&self) {
        let was = {
            let mut state = self.inner.state.lock();
            self.inner.epoch.fetch_add(1, Ordering::AcqRel);
            std::mem::replace(&mut *state, SessionState::Idle)
        };

        // Detach outside the lock: closing an input may wait for its callback
        let listeners = std::mem::take(&mut *self.inner.listeners.lock());
        drop(listeners);

        self.inner.registry.lock().clear();
        let access = self.inner.access.lock().take();
        drop(access);

        if was != SessionState::Idle {
            info!("MIDI resources cleaned up");
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Snapshot of the connected inputs
    pub fn inputs(&self) -> Vec<PortInfo> {
        self.inner.registry.lock().inputs().to_vec()
    }

    /// Snapshot of the connected outputs
    pub fn outputs(&self) -> Vec<PortInfo> {
        self.inner.registry.lock().outputs().to_vec()
    }

    /// Receive device and routing events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }
}

impl SessionInner {
    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.current_epoch() == epoch
    }

    fn access(&self) -> Option<Arc<dyn MidiAccess>> {
        self.access.lock().clone()
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine: nobody is listening yet
        let _ = self.events.send(event);
    }
}
