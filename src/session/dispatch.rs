//! Outbound sends triggered by the UI

use tracing::{debug, warn};

use super::{SessionEvent, SessionManager};
use crate::error::CodecError;
use crate::midi::{MessageDescriptor, WireMessage};
use crate::router::{self, RoutingResult};

impl SessionManager {
    /// Encode a descriptor and send it to every active output
    pub fn send_one(&self, descriptor: &MessageDescriptor) -> Result<RoutingResult, CodecError> {
        let message = descriptor.encode()?;
        Ok(self.send_message(&message))
    }

    /// Send each descriptor in order. Descriptors that fail to encode are
    /// logged and left out of the results; the rest are still sent.
    pub fn send_many(&self, descriptors: &[MessageDescriptor]) -> Vec<RoutingResult> {
        descriptors
            .iter()
            .filter_map(|descriptor| match self.send_one(descriptor) {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!("Error sending MIDI message: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Control Change shortcut
    pub fn send_control_change(
        &self,
        channel: u8,
        controller: u8,
        value: u8,
    ) -> Result<RoutingResult, CodecError> {
        self.send_one(&MessageDescriptor::cc(channel, controller, value))
    }

    /// Broadcast raw wire bytes to every active output.
    ///
    /// Without an active session the result simply has no destinations.
    pub fn send_message(&self, message: &WireMessage) -> RoutingResult {
        let inner = &self.inner;
        let result = match inner.access() {
            Some(access) => {
                let outputs = inner.registry.lock().outputs().to_vec();
                router::broadcast(access.as_ref(), message, &outputs)
            }
            None => RoutingResult {
                source: None,
                destinations: Vec::new(),
                message: *message,
            },
        };

        debug!(
            "Manual send -> [{}]: {}",
            result.destinations.join(", "),
            message.describe()
        );
        inner.emit(SessionEvent::MessageRouted(result.clone()));
        result
    }
}
