//! In-memory MIDI platform
//!
//! Scriptable ports for tests and for the `--virtual` demo mode: ports can be
//! plugged and unplugged, notifications can be repeated, inbound messages
//! injected, and individual outputs forced to fail.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

use super::{
    HandlerSet, MessageHandler, MidiAccess, MidiPlatform, StateHandler, Subscription, Transport,
};
use crate::error::{ConnectionError, DeliveryError};
use crate::midi::WireMessage;
use crate::ports::{PortDirection, PortInfo, PortState};

#[derive(Default)]
struct Behaviour {
    denied: Option<String>,
    failing: HashSet<String>,
}

struct VirtualState {
    ports: Mutex<Vec<PortInfo>>,
    behaviour: Mutex<Behaviour>,
    sent: Mutex<Vec<(String, WireMessage)>>,
    state_handlers: Arc<HandlerSet<StateHandler>>,
    message_handlers: Arc<HandlerSet<(String, MessageHandler)>>,
}

/// Shared handle to a set of in-memory ports
#[derive(Clone)]
pub struct VirtualPlatform {
    state: Arc<VirtualState>,
}

impl Default for VirtualPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualPlatform {
    pub fn new() -> Self {
        Self {
            state: Arc::new(VirtualState {
                ports: Mutex::new(Vec::new()),
                behaviour: Mutex::new(Behaviour::default()),
                sent: Mutex::new(Vec::new()),
                state_handlers: HandlerSet::new(),
                message_handlers: HandlerSet::new(),
            }),
        }
    }

    /// Add a connected input without notifying listeners
    pub fn add_input(&self, id: &str, name: &str) -> PortInfo {
        self.add_port(PortInfo::new(id, name, PortDirection::Input, PortState::Connected))
    }

    /// Add a connected output without notifying listeners
    pub fn add_output(&self, id: &str, name: &str) -> PortInfo {
        self.add_port(PortInfo::new(id, name, PortDirection::Output, PortState::Connected))
    }

    fn add_port(&self, port: PortInfo) -> PortInfo {
        let mut ports = self.state.ports.lock();
        ports.retain(|p| p.id != port.id);
        ports.push(port.clone());
        port
    }

    /// Change a port's state and notify state listeners. Unknown ids are ignored.
    pub fn set_state(&self, id: &str, state: PortState) {
        let port = {
            let mut ports = self.state.ports.lock();
            match ports.iter_mut().find(|p| p.id == id) {
                Some(port) => {
                    port.state = state;
                    port.clone()
                }
                None => return,
            }
        };
        self.emit_state(&port);
    }

    /// Plug in a new connected port and notify listeners
    pub fn plug(&self, port: PortInfo) {
        let port = self.add_port(port.with_state(PortState::Connected));
        self.emit_state(&port);
    }

    /// Repeat the current state notification for a port, unchanged
    pub fn renotify(&self, id: &str) {
        let port = self.state.ports.lock().iter().find(|p| p.id == id).cloned();
        if let Some(port) = port {
            self.emit_state(&port);
        }
    }

    fn emit_state(&self, port: &PortInfo) {
        trace!("Virtual statechange: {} ({}) {}", port.name, port.direction, port.state);
        for handler in self.state.state_handlers.snapshot() {
            handler(port);
        }
    }

    /// Deliver raw bytes as if they arrived on an input.
    ///
    /// Nothing is delivered for unknown or disconnected inputs.
    pub fn inject(&self, input_id: &str, data: &[u8]) {
        let connected = self
            .state
            .ports
            .lock()
            .iter()
            .any(|p| p.id == input_id && p.direction == PortDirection::Input && p.is_connected());
        if !connected {
            debug!("Virtual inject on unavailable input '{}' dropped", input_id);
            return;
        }

        for (id, handler) in self.state.message_handlers.snapshot() {
            if id == input_id {
                handler(data);
            }
        }
    }

    /// Make every send to the named output fail
    pub fn fail_sends_to(&self, output_name: &str) {
        self.state
            .behaviour
            .lock()
            .failing
            .insert(output_name.to_string());
    }

    /// Make the next access requests fail
    pub fn deny_access(&self, reason: &str) {
        self.state.behaviour.lock().denied = Some(reason.to_string());
    }

    pub fn allow_access(&self) {
        self.state.behaviour.lock().denied = None;
    }

    /// Every successfully delivered message as `(output name, message)`
    pub fn sent(&self) -> Vec<(String, WireMessage)> {
        self.state.sent.lock().clone()
    }

    /// Names of the outputs that received messages, in delivery order
    pub fn sent_to(&self) -> Vec<String> {
        self.state
            .sent
            .lock()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn clear_sent(&self) {
        self.state.sent.lock().clear();
    }

    pub fn state_listener_count(&self) -> usize {
        self.state.state_handlers.len()
    }

    pub fn message_listener_count(&self, input_id: &str) -> usize {
        self.state
            .message_handlers
            .snapshot()
            .iter()
            .filter(|(id, _)| id == input_id)
            .count()
    }

    fn listing(&self, direction: PortDirection) -> Vec<PortInfo> {
        self.state
            .ports
            .lock()
            .iter()
            .filter(|p| p.direction == direction)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MidiPlatform for VirtualPlatform {
    async fn request_access(&self) -> Result<Arc<dyn MidiAccess>, ConnectionError> {
        if let Some(reason) = self.state.behaviour.lock().denied.clone() {
            return Err(ConnectionError::Denied(reason));
        }
        Ok(Arc::new(self.clone()))
    }
}

impl Transport for VirtualPlatform {
    fn send(&self, output: &PortInfo, message: &WireMessage) -> Result<(), DeliveryError> {
        if self.state.behaviour.lock().failing.contains(&output.name) {
            return Err(DeliveryError::new(&output.name, "send rejected by device"));
        }

        let available = self
            .state
            .ports
            .lock()
            .iter()
            .any(|p| p.id == output.id && p.is_connected());
        if !available {
            return Err(DeliveryError::new(&output.name, "port disconnected"));
        }

        self.state.sent.lock().push((output.name.clone(), *message));
        Ok(())
    }
}

impl MidiAccess for VirtualPlatform {
    fn inputs(&self) -> Vec<PortInfo> {
        self.listing(PortDirection::Input)
    }

    fn outputs(&self) -> Vec<PortInfo> {
        self.listing(PortDirection::Output)
    }

    fn subscribe_state(&self, handler: StateHandler) -> Subscription {
        self.state.state_handlers.insert(handler)
    }

    fn subscribe_messages(
        &self,
        input: &PortInfo,
        handler: MessageHandler,
    ) -> Result<Subscription, ConnectionError> {
        let known = self.state.ports.lock().iter().any(|p| p.id == input.id);
        if !known {
            return Err(ConnectionError::PortNotFound(input.name.clone()));
        }
        Ok(self
            .state
            .message_handlers
            .insert((input.id.clone(), handler)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_denied_access() {
        let platform = VirtualPlatform::new();
        platform.deny_access("user said no");
        assert!(matches!(
            platform.request_access().await,
            Err(ConnectionError::Denied(_))
        ));

        platform.allow_access();
        assert!(platform.request_access().await.is_ok());
    }

    #[test]
    fn test_send_to_disconnected_port_fails() {
        let platform = VirtualPlatform::new();
        let out = platform.add_output("o1", "Synth");
        let msg = WireMessage::new(&[0x90, 60, 100]).unwrap();

        assert!(platform.send(&out, &msg).is_ok());
        platform.set_state("o1", PortState::Disconnected);
        assert!(platform.send(&out, &msg).is_err());
        assert_eq!(platform.sent_to(), vec!["Synth".to_string()]);
    }

    #[test]
    fn test_inject_reaches_only_matching_input() {
        let platform = VirtualPlatform::new();
        let a = platform.add_input("a", "Keys");
        let b = platform.add_input("b", "Pads");

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _sub_a = platform
            .subscribe_messages(
                &a,
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        let _sub_b = platform
            .subscribe_messages(&b, Arc::new(|_| panic!("wrong input")))
            .unwrap();

        platform.inject("a", &[0xB0, 1, 2]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(platform.message_listener_count("a"), 1);
    }
}
