//! Platform callbacks: inbound messages and port state changes

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{SessionEvent, SessionInner};
use crate::midi::WireMessage;
use crate::platform::{MessageHandler, StateHandler};
use crate::ports::{PortInfo, Transition};
use crate::router;

impl SessionInner {
    pub(super) fn state_handler(self: &Arc<Self>, epoch: u64) -> StateHandler {
        let session = Arc::downgrade(self);
        Arc::new(move |port: &PortInfo| {
            if let Some(session) = session.upgrade() {
                session.on_port_state(epoch, port);
            }
        })
    }

    fn message_handler(self: &Arc<Self>, epoch: u64, source: PortInfo) -> MessageHandler {
        let session = Arc::downgrade(self);
        Arc::new(move |data: &[u8]| {
            if let Some(session) = session.upgrade() {
                session.on_message(epoch, &source, data);
            }
        })
    }

    /// Re-read the platform listing, rebuild the active lists, and listen on
    /// exactly the connected inputs.
    pub(super) fn refresh_devices(self: &Arc<Self>, epoch: u64) {
        if !self.is_current(epoch) {
            return;
        }
        let Some(access) = self.access() else {
            return;
        };

        let raw_inputs = access.inputs();
        let raw_outputs = access.outputs();
        let (inputs, output_count) = {
            let mut registry = self.registry.lock();
            registry.refresh(raw_inputs, raw_outputs);
            (registry.inputs().to_vec(), registry.outputs().len())
        };

        // Old input listeners go first so no input is ever subscribed twice
        let previous = std::mem::take(&mut self.listeners.lock().inputs);
        drop(previous);

        let mut subscriptions = Vec::with_capacity(inputs.len());
        for input in &inputs {
            match access.subscribe_messages(input, self.message_handler(epoch, input.clone())) {
                Ok(sub) => subscriptions.push(sub),
                Err(e) => warn!("Failed to listen on MIDI input '{}': {}", input.name, e),
            }
        }

        let stale = {
            let mut listeners = self.listeners.lock();
            if self.is_current(epoch) {
                std::mem::replace(&mut listeners.inputs, subscriptions)
            } else {
                subscriptions
            }
        };
        drop(stale);

        info!(
            "Device update completed - inputs: {}, outputs: {}",
            inputs.len(),
            output_count
        );
    }

    fn on_message(&self, epoch: u64, source: &PortInfo, data: &[u8]) {
        if !self.is_current(epoch) {
            return;
        }

        let message = match WireMessage::new(data) {
            Ok(message) => message,
            Err(e) => {
                debug!("Ignoring inbound data from '{}': {}", source.name, e);
                return;
            }
        };
        let Some(access) = self.access() else {
            return;
        };

        // Routing always uses the outputs connected right now
        let outputs = self.registry.lock().outputs().to_vec();
        let result = router::route(access.as_ref(), source, &message, &outputs);
        debug!(
            "{} -> [{}]: {}",
            source.name,
            result.destinations.join(", "),
            message.describe()
        );

        if self.is_current(epoch) {
            self.emit(SessionEvent::MessageRouted(result));
        }
    }

    fn on_port_state(self: &Arc<Self>, epoch: u64, port: &PortInfo) {
        if !self.is_current(epoch) {
            return;
        }

        let (changed, transition) = {
            let mut registry = self.registry.lock();
            let changed = registry.previous_state(&port.id) != Some(port.state);
            (changed, registry.record_transition(&port.id, port.state))
        };
        if !changed {
            // Redundant platform notification
            return;
        }

        // Listeners must see the updated lists when the event arrives
        self.refresh_devices(epoch);
        if !self.is_current(epoch) {
            return;
        }

        match transition {
            Some(Transition::Connected) => {
                info!("Device connected: {} ({})", port.name, port.direction);
                self.emit(SessionEvent::DeviceConnected { port: port.clone() });
            }
            Some(Transition::Disconnected) => {
                info!("Device disconnected: {} ({})", port.name, port.direction);
                self.emit(SessionEvent::DeviceDisconnected { port: port.clone() });
            }
            None => debug!("Port {} ({}) is now {}", port.name, port.direction, port.state),
        }
    }
}
