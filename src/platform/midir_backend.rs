//! midir-backed MIDI platform
//!
//! midir enumerates ports but has no hot-plug notifications, so a polling task
//! diffs the port listing and synthesizes `connected`/`disconnected` state
//! changes. Output connections are opened lazily on first send and dropped
//! after a failed send so the next attempt reopens them.

use async_trait::async_trait;
use midir::{Ignore, MidiInput, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{
    HandlerSet, MessageHandler, MidiAccess, MidiPlatform, StateHandler, Subscription, Transport,
};
use crate::error::{ConnectionError, DeliveryError};
use crate::midi::{format_hex, WireMessage};
use crate::ports::{PortDirection, PortInfo, PortState};

const INPUT_PREFIX: &str = "in:";
const OUTPUT_PREFIX: &str = "out:";

/// Platform factory for the system MIDI stack (ALSA, CoreMIDI, WinMM)
pub struct MidirPlatform {
    client_name: String,
    poll_interval: Duration,
}

impl MidirPlatform {
    pub fn new(client_name: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            client_name: client_name.into(),
            poll_interval,
        }
    }
}

#[async_trait]
impl MidiPlatform for MidirPlatform {
    async fn request_access(&self) -> Result<Arc<dyn MidiAccess>, ConnectionError> {
        let scanner = PortScanner::new(&self.client_name)?;
        let initial = scanner.scan()?;
        info!("MIDI access acquired ({} ports visible)", initial.len());

        let state_handlers: Arc<HandlerSet<StateHandler>> = HandlerSet::new();
        let poller = tokio::spawn(poll_ports(
            PortScanner::new(&self.client_name)?,
            initial,
            self.poll_interval,
            state_handlers.clone(),
        ));

        Ok(Arc::new(MidirAccess {
            client_name: self.client_name.clone(),
            scanner: Mutex::new(scanner),
            connections: Mutex::new(HashMap::new()),
            state_handlers,
            poller,
        }))
    }
}

/// Long-lived midir clients used only for enumeration
struct PortScanner {
    client_name: String,
    midi_in: MidiInput,
    midi_out: MidiOutput,
}

impl PortScanner {
    fn new(client_name: &str) -> Result<Self, ConnectionError> {
        let midi_in = MidiInput::new(&format!("{}-scan-in", client_name))
            .map_err(|e| ConnectionError::Unavailable(e.to_string()))?;
        let midi_out = MidiOutput::new(&format!("{}-scan-out", client_name))
            .map_err(|e| ConnectionError::Unavailable(e.to_string()))?;
        Ok(Self {
            client_name: client_name.to_string(),
            midi_in,
            midi_out,
        })
    }

    /// Our own connections show up as ports on some backends; they are not devices
    fn is_own_port(&self, name: &str) -> bool {
        name.contains(&self.client_name)
    }

    fn inputs(&self) -> Result<Vec<PortInfo>, ConnectionError> {
        let mut ports = Vec::new();
        for port in self.midi_in.ports() {
            let name = self
                .midi_in
                .port_name(&port)
                .map_err(|e| ConnectionError::Unavailable(e.to_string()))?;
            if self.is_own_port(&name) {
                continue;
            }
            ports.push(PortInfo::new(
                format!("{}{}", INPUT_PREFIX, port.id()),
                name,
                PortDirection::Input,
                PortState::Connected,
            ));
        }
        Ok(ports)
    }

    fn outputs(&self) -> Result<Vec<PortInfo>, ConnectionError> {
        let mut ports = Vec::new();
        for port in self.midi_out.ports() {
            let name = self
                .midi_out
                .port_name(&port)
                .map_err(|e| ConnectionError::Unavailable(e.to_string()))?;
            if self.is_own_port(&name) {
                continue;
            }
            ports.push(PortInfo::new(
                format!("{}{}", OUTPUT_PREFIX, port.id()),
                name,
                PortDirection::Output,
                PortState::Connected,
            ));
        }
        Ok(ports)
    }

    fn scan(&self) -> Result<Vec<PortInfo>, ConnectionError> {
        let mut ports = self.inputs()?;
        ports.extend(self.outputs()?);
        Ok(ports)
    }
}

/// Strip the direction prefix to recover midir's own port id
fn raw_id<'a>(id: &'a str, prefix: &str) -> &'a str {
    id.strip_prefix(prefix).unwrap_or(id)
}

struct MidirAccess {
    client_name: String,
    scanner: Mutex<PortScanner>,
    connections: Mutex<HashMap<String, MidiOutputConnection>>,
    state_handlers: Arc<HandlerSet<StateHandler>>,
    poller: JoinHandle<()>,
}

impl MidirAccess {
    fn open_output(&self, output: &PortInfo) -> Result<MidiOutputConnection, DeliveryError> {
        let midi_out = MidiOutput::new(&format!("{}-out", self.client_name))
            .map_err(|e| DeliveryError::new(&output.name, e.to_string()))?;
        let port = midi_out
            .find_port_by_id(raw_id(&output.id, OUTPUT_PREFIX).to_string())
            .ok_or_else(|| DeliveryError::new(&output.name, "port no longer present"))?;
        let conn = midi_out
            .connect(&port, &format!("{}-out", self.client_name))
            .map_err(|e| DeliveryError::new(&output.name, e.to_string()))?;
        debug!("Opened MIDI output '{}'", output.name);
        Ok(conn)
    }
}

impl Drop for MidirAccess {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

impl Transport for MidirAccess {
    fn send(&self, output: &PortInfo, message: &WireMessage) -> Result<(), DeliveryError> {
        let mut connections = self.connections.lock();
        let conn = match connections.entry(output.id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.open_output(output)?),
        };

        trace!("TX -> {}: {}", output.name, format_hex(message.as_bytes()));
        if let Err(e) = conn.send(message.as_bytes()) {
            // Close the broken connection; the next send reopens it
            connections.remove(&output.id);
            return Err(DeliveryError::new(&output.name, e.to_string()));
        }
        Ok(())
    }
}

impl MidiAccess for MidirAccess {
    fn inputs(&self) -> Vec<PortInfo> {
        self.scanner.lock().inputs().unwrap_or_else(|e| {
            warn!("Failed to enumerate MIDI inputs: {}", e);
            Vec::new()
        })
    }

    fn outputs(&self) -> Vec<PortInfo> {
        self.scanner.lock().outputs().unwrap_or_else(|e| {
            warn!("Failed to enumerate MIDI outputs: {}", e);
            Vec::new()
        })
    }

    fn subscribe_state(&self, handler: StateHandler) -> Subscription {
        self.state_handlers.insert(handler)
    }

    fn subscribe_messages(
        &self,
        input: &PortInfo,
        handler: MessageHandler,
    ) -> Result<Subscription, ConnectionError> {
        let mut midi_in = MidiInput::new(&format!("{}-in", self.client_name))
            .map_err(|e| ConnectionError::Unavailable(e.to_string()))?;
        // No sysex, no clock, no active sensing
        midi_in.ignore(Ignore::All);

        let port = midi_in
            .find_port_by_id(raw_id(&input.id, INPUT_PREFIX).to_string())
            .ok_or_else(|| ConnectionError::PortNotFound(input.name.clone()))?;

        let conn = midi_in
            .connect(
                &port,
                &format!("{}-in", self.client_name),
                move |_timestamp, data, _| handler(data),
                (),
            )
            .map_err(|e| ConnectionError::OpenFailed {
                port: input.name.clone(),
                reason: e.to_string(),
            })?;

        debug!("Listening on MIDI input '{}'", input.name);
        let name = input.name.clone();
        Ok(Subscription::new(move || {
            let _ = conn.close();
            debug!("Stopped listening on MIDI input '{}'", name);
        }))
    }
}

/// Diff the port listing on every tick and notify state listeners
async fn poll_ports(
    scanner: PortScanner,
    initial: Vec<PortInfo>,
    interval: Duration,
    handlers: Arc<HandlerSet<StateHandler>>,
) {
    let mut known: HashMap<String, PortInfo> =
        initial.into_iter().map(|p| (p.id.clone(), p)).collect();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let current = match scanner.scan() {
            Ok(ports) => ports,
            Err(e) => {
                debug!("Port scan failed, skipping this cycle: {}", e);
                continue;
            }
        };

        let changed = diff_ports(&mut known, &current);
        for port in changed {
            for handler in handlers.snapshot() {
                handler(&port);
            }
        }
    }
}

/// Compare a fresh scan with the known ports and record the differences.
///
/// Returns one synthesized notification per change: ports that appeared (or
/// came back) as Connected, then ports that vanished as Disconnected, ordered
/// by id. `known` is updated so an unchanged scan yields nothing.
fn diff_ports(known: &mut HashMap<String, PortInfo>, current: &[PortInfo]) -> Vec<PortInfo> {
    let mut changed: Vec<PortInfo> = current
        .iter()
        .filter(|port| known.get(&port.id).map_or(true, |p| !p.is_connected()))
        .cloned()
        .collect();

    let mut vanished: Vec<PortInfo> = known
        .values()
        .filter(|p| p.is_connected() && !current.iter().any(|c| c.id == p.id))
        .map(|p| p.with_state(PortState::Disconnected))
        .collect();
    vanished.sort_by(|a, b| a.id.cmp(&b.id));
    changed.extend(vanished);

    for port in &changed {
        known.insert(port.id.clone(), port.clone());
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(id: &str, name: &str) -> PortInfo {
        let direction = if id.starts_with(INPUT_PREFIX) {
            PortDirection::Input
        } else {
            PortDirection::Output
        };
        PortInfo::new(id, name, direction, PortState::Connected)
    }

    fn known_from(ports: &[PortInfo]) -> HashMap<String, PortInfo> {
        ports.iter().map(|p| (p.id.clone(), p.clone())).collect()
    }

    #[test]
    fn test_diff_unchanged_scan_is_silent() {
        let scan = vec![port("in:1", "Keys"), port("out:2", "Synth")];
        let mut known = known_from(&scan);

        assert!(diff_ports(&mut known, &scan).is_empty());
        assert!(diff_ports(&mut known, &scan).is_empty());
    }

    #[test]
    fn test_diff_reports_new_port_once() {
        let mut known = known_from(&[port("out:2", "Synth")]);
        let scan = vec![port("out:2", "Synth"), port("out:3", "Drums")];

        let changed = diff_ports(&mut known, &scan);
        assert_eq!(changed, vec![port("out:3", "Drums")]);
        assert!(diff_ports(&mut known, &scan).is_empty());
    }

    #[test]
    fn test_diff_reports_vanished_ports_as_disconnected() {
        let mut known = known_from(&[
            port("in:1", "Keys"),
            port("out:3", "Drums"),
            port("out:2", "Synth"),
        ]);
        let scan = vec![port("in:1", "Keys")];

        let changed = diff_ports(&mut known, &scan);
        assert_eq!(
            changed,
            vec![
                port("out:2", "Synth").with_state(PortState::Disconnected),
                port("out:3", "Drums").with_state(PortState::Disconnected),
            ]
        );
        assert_eq!(known["out:2"].state, PortState::Disconnected);

        // Already known as gone: no second notification
        assert!(diff_ports(&mut known, &scan).is_empty());
    }

    #[test]
    fn test_diff_reports_port_coming_back() {
        let drums = port("out:3", "Drums");
        let mut known = known_from(&[drums.clone()]);

        diff_ports(&mut known, &[]);
        let changed = diff_ports(&mut known, &[drums.clone()]);
        assert_eq!(changed, vec![drums]);
        assert!(known["out:3"].is_connected());
    }

    #[test]
    fn test_raw_id_strips_direction_prefix() {
        assert_eq!(raw_id("in:24:0", INPUT_PREFIX), "24:0");
        assert_eq!(raw_id("out:24:0", OUTPUT_PREFIX), "24:0");
        assert_eq!(raw_id("24:0", OUTPUT_PREFIX), "24:0");
    }
}
