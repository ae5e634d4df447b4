//! Port registry
//!
//! Tracks the live lists of connected inputs and outputs, plus the last
//! observed state of every port id so that redundant platform notifications
//! can be absorbed without producing events.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Direction of a MIDI port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::Input => f.write_str("input"),
            PortDirection::Output => f.write_str("output"),
        }
    }
}

/// Device state as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Connected,
    Disconnected,
    Pending,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortState::Connected => f.write_str("connected"),
            PortState::Disconnected => f.write_str("disconnected"),
            PortState::Pending => f.write_str("pending"),
        }
    }
}

/// One physical or virtual MIDI endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub direction: PortDirection,
    pub state: PortState,
}

impl PortInfo {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        direction: PortDirection,
        state: PortState,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            direction,
            state,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == PortState::Connected
    }

    /// Copy of this port with a different state
    pub fn with_state(&self, state: PortState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }
}

/// A meaningful, non-duplicate change of a port's connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Connected,
    Disconnected,
}

impl Transition {
    /// Decide whether moving from `previous` to `current` is a real transition.
    ///
    /// An unknown previous state counts as disconnected.
    pub fn between(previous: Option<PortState>, current: PortState) -> Option<Self> {
        match (previous, current) {
            (None | Some(PortState::Disconnected), PortState::Connected) => {
                Some(Transition::Connected)
            }
            (Some(PortState::Connected), PortState::Disconnected) => Some(Transition::Disconnected),
            _ => None,
        }
    }
}

/// Authoritative view of the currently connected ports
#[derive(Debug, Default)]
pub struct PortRegistry {
    inputs: Vec<PortInfo>,
    outputs: Vec<PortInfo>,
    states: HashMap<String, PortState>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the active lists with the connected ports of a raw listing.
    ///
    /// Enumeration order is preserved.
    pub fn refresh<I, O>(&mut self, raw_inputs: I, raw_outputs: O)
    where
        I: IntoIterator<Item = PortInfo>,
        O: IntoIterator<Item = PortInfo>,
    {
        self.inputs = raw_inputs.into_iter().filter(PortInfo::is_connected).collect();
        self.outputs = raw_outputs
            .into_iter()
            .filter(PortInfo::is_connected)
            .collect();
    }

    /// Record the current state of every known port without producing
    /// transitions, so the first notification for a port already present at
    /// connect time is not reported as a new connection.
    pub fn seed<'a, I>(&mut self, ports: I) -> usize
    where
        I: IntoIterator<Item = &'a PortInfo>,
    {
        let mut count = 0;
        for port in ports {
            self.states.insert(port.id.clone(), port.state);
            count += 1;
        }
        count
    }

    /// Compare `state` with the stored state for `port_id` and report a
    /// transition if one happened. The stored state is always updated.
    pub fn record_transition(&mut self, port_id: &str, state: PortState) -> Option<Transition> {
        let previous = self.states.insert(port_id.to_string(), state);
        Transition::between(previous, state)
    }

    /// Last observed state of a port, if it was ever seen
    pub fn previous_state(&self, port_id: &str) -> Option<PortState> {
        self.states.get(port_id).copied()
    }

    pub fn inputs(&self) -> &[PortInfo] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PortInfo] {
        &self.outputs
    }

    pub fn has_ports(&self) -> bool {
        !self.inputs.is_empty() || !self.outputs.is_empty()
    }

    /// Forget every port and every recorded state
    pub fn clear(&mut self) {
        self.inputs.clear();
        self.outputs.clear();
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(id: &str, direction: PortDirection, state: PortState) -> PortInfo {
        PortInfo::new(id, format!("Device {}", id), direction, state)
    }

    #[test]
    fn test_refresh_keeps_only_connected_in_order() {
        let mut registry = PortRegistry::new();
        registry.refresh(
            vec![
                port("i1", PortDirection::Input, PortState::Connected),
                port("i2", PortDirection::Input, PortState::Disconnected),
            ],
            vec![
                port("o3", PortDirection::Output, PortState::Connected),
                port("o1", PortDirection::Output, PortState::Pending),
                port("o2", PortDirection::Output, PortState::Connected),
            ],
        );

        let ids: Vec<_> = registry.outputs().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["o3", "o2"]);
        assert_eq!(registry.inputs().len(), 1);
        assert!(registry.has_ports());
    }

    #[test]
    fn test_duplicate_connected_fires_once() {
        let mut registry = PortRegistry::new();
        assert_eq!(
            registry.record_transition("a", PortState::Connected),
            Some(Transition::Connected)
        );
        assert_eq!(registry.record_transition("a", PortState::Connected), None);
    }

    #[test]
    fn test_first_seen_connected_is_a_connection() {
        let mut registry = PortRegistry::new();
        assert_eq!(registry.previous_state("new"), None);
        assert_eq!(
            registry.record_transition("new", PortState::Connected),
            Some(Transition::Connected)
        );
    }

    #[test]
    fn test_disconnect_requires_prior_connected() {
        let mut registry = PortRegistry::new();
        // Unknown -> disconnected is not a transition
        assert_eq!(registry.record_transition("a", PortState::Disconnected), None);
        assert_eq!(
            registry.record_transition("a", PortState::Connected),
            Some(Transition::Connected)
        );
        assert_eq!(
            registry.record_transition("a", PortState::Disconnected),
            Some(Transition::Disconnected)
        );
        assert_eq!(registry.record_transition("a", PortState::Disconnected), None);
    }

    #[test]
    fn test_pending_is_recorded_without_transition() {
        let mut registry = PortRegistry::new();
        registry.record_transition("a", PortState::Connected);
        assert_eq!(registry.record_transition("a", PortState::Pending), None);
        assert_eq!(registry.previous_state("a"), Some(PortState::Pending));
        // Pending -> connected only counts after disconnected or unknown
        assert_eq!(registry.record_transition("a", PortState::Connected), None);
    }

    #[test]
    fn test_seed_suppresses_first_notification() {
        let mut registry = PortRegistry::new();
        let ports = vec![port("a", PortDirection::Input, PortState::Connected)];
        assert_eq!(registry.seed(&ports), 1);
        assert_eq!(registry.record_transition("a", PortState::Connected), None);
    }

    #[test]
    fn test_clear_forgets_states() {
        let mut registry = PortRegistry::new();
        registry.seed(&[port("a", PortDirection::Output, PortState::Connected)]);
        registry.refresh(
            Vec::new(),
            vec![port("a", PortDirection::Output, PortState::Connected)],
        );
        registry.clear();
        assert!(!registry.has_ports());
        assert_eq!(registry.previous_state("a"), None);
    }
}
