//! Host MIDI platform abstraction
//!
//! The session manager never talks to a MIDI API directly. It is handed a
//! [`MidiPlatform`], asks it for a [`MidiAccess`] session, and subscribes to
//! port state changes and inbound messages through explicit [`Subscription`]
//! handles.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{ConnectionError, DeliveryError};
use crate::midi::WireMessage;
use crate::ports::PortInfo;

pub mod midir_backend;
pub mod virtual_ports;

pub use midir_backend::MidirPlatform;
pub use virtual_ports::VirtualPlatform;

/// Callback for inbound wire bytes on one input
pub type MessageHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Callback for port state notifications. The port carries its new state.
pub type StateHandler = Arc<dyn Fn(&PortInfo) + Send + Sync>;

/// Something that can deliver a wire message to an output port
pub trait Transport: Send + Sync {
    fn send(&self, output: &PortInfo, message: &WireMessage) -> Result<(), DeliveryError>;
}

/// Entry point to the host MIDI system
#[async_trait]
pub trait MidiPlatform: Send + Sync {
    /// Request MIDI access. System exclusive permission is never requested.
    async fn request_access(&self) -> Result<Arc<dyn MidiAccess>, ConnectionError>;
}

/// An acquired MIDI session
pub trait MidiAccess: Transport {
    /// Raw input listing, including ports that are not connected
    fn inputs(&self) -> Vec<PortInfo>;

    /// Raw output listing, including ports that are not connected
    fn outputs(&self) -> Vec<PortInfo>;

    /// Listen for port state changes. Notifications may be redundant.
    fn subscribe_state(&self, handler: StateHandler) -> Subscription;

    /// Listen for inbound messages on one input port
    fn subscribe_messages(
        &self,
        input: &PortInfo,
        handler: MessageHandler,
    ) -> Result<Subscription, ConnectionError>;
}

/// Owned listener registration. Dropping it, or calling [`cancel`](Self::cancel),
/// detaches the listener.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to detach
    pub fn empty() -> Self {
        Self { cancel: None }
    }

    /// Detach the listener. Safe to call more than once.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Registered callbacks, keyed so that a [`Subscription`] can remove its own entry.
///
/// Handlers are always invoked on a snapshot taken outside the lock, so a
/// handler may subscribe or unsubscribe without deadlocking.
pub(crate) struct HandlerSet<H> {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, H)>>,
}

impl<H: Clone + Send + 'static> HandlerSet<H> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(0),
            handlers: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn insert(self: &Arc<Self>, handler: H) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().push((id, handler));

        let set: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(set) = set.upgrade() {
                set.handlers.lock().retain(|(entry, _)| *entry != id);
            }
        })
    }

    pub(crate) fn snapshot(&self) -> Vec<H> {
        self.handlers.lock().iter().map(|(_, h)| h.clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.lock().len()
    }
}
