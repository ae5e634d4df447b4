//! Fanout router
//!
//! Delivers one message to a snapshot of the active outputs. Every delivery is
//! independent: a failing output is logged and left out of the result, the
//! remaining outputs still receive the message.

use serde::Serialize;
use tracing::warn;

use crate::error::CodecError;
use crate::midi::{MessageDescriptor, WireMessage};
use crate::platform::Transport;
use crate::ports::PortInfo;

/// Outcome of one forward or send, reported to the UI and the message log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingResult {
    /// Name of the input the message came from; `None` for manual sends
    pub source: Option<String>,
    /// Outputs that accepted the message, in enumeration order
    pub destinations: Vec<String>,
    pub message: WireMessage,
}

impl RoutingResult {
    pub fn is_manual(&self) -> bool {
        self.source.is_none()
    }
}

/// Forward an inbound message to every output except the source.
///
/// Outputs are matched against the source by display name: an input and an
/// output of the same device share a name but never an id.
pub fn route<T: Transport + ?Sized>(
    transport: &T,
    source: &PortInfo,
    message: &WireMessage,
    outputs: &[PortInfo],
) -> RoutingResult {
    let targets = outputs.iter().filter(|output| output.name != source.name);
    RoutingResult {
        source: Some(source.name.clone()),
        destinations: deliver(transport, message, targets),
        message: *message,
    }
}

/// Send a message to every output, with no source exclusion
pub fn broadcast<T: Transport + ?Sized>(
    transport: &T,
    message: &WireMessage,
    outputs: &[PortInfo],
) -> RoutingResult {
    RoutingResult {
        source: None,
        destinations: deliver(transport, message, outputs.iter()),
        message: *message,
    }
}

/// Encode a descriptor and broadcast it
pub fn broadcast_descriptor<T: Transport + ?Sized>(
    transport: &T,
    descriptor: &MessageDescriptor,
    outputs: &[PortInfo],
) -> Result<RoutingResult, CodecError> {
    let message = descriptor.encode()?;
    Ok(broadcast(transport, &message, outputs))
}

fn deliver<'a, T, I>(transport: &T, message: &WireMessage, outputs: I) -> Vec<String>
where
    T: Transport + ?Sized,
    I: Iterator<Item = &'a PortInfo>,
{
    outputs
        .filter_map(|output| match transport.send(output, message) {
            Ok(()) => Some(output.name.clone()),
            Err(e) => {
                warn!("MIDI send error: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;
    use crate::ports::{PortDirection, PortState};
    use parking_lot::Mutex;

    /// Records deliveries and rejects configured port names
    #[derive(Default)]
    struct RecordingTransport {
        failing: Vec<String>,
        delivered: Mutex<Vec<String>>,
    }

    impl Transport for RecordingTransport {
        fn send(&self, output: &PortInfo, _message: &WireMessage) -> Result<(), DeliveryError> {
            if self.failing.contains(&output.name) {
                return Err(DeliveryError::new(&output.name, "device unplugged"));
            }
            self.delivered.lock().push(output.name.clone());
            Ok(())
        }
    }

    fn output(name: &str) -> PortInfo {
        PortInfo::new(
            format!("out-{}", name),
            name,
            PortDirection::Output,
            PortState::Connected,
        )
    }

    fn input(name: &str) -> PortInfo {
        PortInfo::new(
            format!("in-{}", name),
            name,
            PortDirection::Input,
            PortState::Connected,
        )
    }

    fn cc() -> WireMessage {
        WireMessage::new(&[0xB0, 64, 127]).unwrap()
    }

    #[test]
    fn test_route_excludes_source_by_name() {
        let transport = RecordingTransport::default();
        let outputs = vec![output("A"), output("B"), output("C")];

        let result = route(&transport, &input("A"), &cc(), &outputs);

        assert_eq!(result.source.as_deref(), Some("A"));
        assert_eq!(result.destinations, vec!["B", "C"]);
        assert_eq!(*transport.delivered.lock(), vec!["B", "C"]);
    }

    #[test]
    fn test_route_keeps_enumeration_order() {
        let transport = RecordingTransport::default();
        let outputs = vec![output("Zeta"), output("Alpha"), output("Mid")];

        let result = route(&transport, &input("Keys"), &cc(), &outputs);
        assert_eq!(result.destinations, vec!["Zeta", "Alpha", "Mid"]);
    }

    #[test]
    fn test_partial_delivery_failure() {
        let transport = RecordingTransport {
            failing: vec!["C".to_string()],
            ..Default::default()
        };
        let outputs = vec![output("A"), output("B"), output("C")];

        let result = route(&transport, &input("A"), &cc(), &outputs);
        assert_eq!(result.destinations, vec!["B"]);
    }

    #[test]
    fn test_failure_does_not_abort_later_outputs() {
        let transport = RecordingTransport {
            failing: vec!["B".to_string()],
            ..Default::default()
        };
        let outputs = vec![output("A"), output("B"), output("C")];

        let result = broadcast(&transport, &cc(), &outputs);
        assert_eq!(result.destinations, vec!["A", "C"]);
        assert!(result.is_manual());
    }

    #[test]
    fn test_broadcast_includes_every_output() {
        let transport = RecordingTransport::default();
        let outputs = vec![output("A"), output("B")];

        let result = broadcast(&transport, &cc(), &outputs);
        assert_eq!(result.source, None);
        assert_eq!(result.destinations, vec!["A", "B"]);
    }

    #[test]
    fn test_broadcast_descriptor_rejects_unknown_type() {
        let transport = RecordingTransport::default();
        let mut desc = MessageDescriptor::cc(0, 1, 1);
        desc.kind = "clock".to_string();

        let result = broadcast_descriptor(&transport, &desc, &[output("A")]);
        assert!(matches!(result, Err(CodecError::UnsupportedType(_))));
        assert!(transport.delivered.lock().is_empty());
    }

    #[test]
    fn test_no_outputs_yields_empty_destinations() {
        let transport = RecordingTransport::default();
        let result = route(&transport, &input("A"), &cc(), &[]);
        assert!(result.destinations.is_empty());
    }
}
