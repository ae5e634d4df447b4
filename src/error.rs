//! Error types for the switcher core
//!
//! Transport failures (`DeliveryError`) are absorbed per destination by the
//! fanout router. Access failures and bad descriptors propagate to the caller.

use thiserror::Error;

/// MIDI access could not be acquired or a port could not be opened
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("MIDI access denied: {0}")]
    Denied(String),

    #[error("MIDI is not available on this system: {0}")]
    Unavailable(String),

    #[error("MIDI port not found: {0}")]
    PortNotFound(String),

    #[error("Failed to open MIDI port '{port}': {reason}")]
    OpenFailed { port: String, reason: String },

    #[error("A connection attempt is already in progress")]
    InProgress,

    #[error("Connection attempt was cancelled by cleanup")]
    Aborted,
}

/// A single output rejected or failed a send
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed to send to '{port}': {reason}")]
pub struct DeliveryError {
    pub port: String,
    pub reason: String,
}

impl DeliveryError {
    pub fn new(port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            reason: reason.into(),
        }
    }
}

/// An outbound descriptor or raw byte sequence could not be encoded
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unsupported MIDI message type: {0}")]
    UnsupportedType(String),

    #[error("'{kind}' message requires a '{field}' field")]
    MissingField { kind: String, field: &'static str },

    #[error("Invalid MIDI channel {0} (must be 0-15)")]
    InvalidChannel(u8),

    #[error("Field '{field}' value {value} is out of range (max {max})")]
    OutOfRange {
        field: &'static str,
        value: u16,
        max: u16,
    },

    #[error("Wire messages are 1-3 bytes, got {0}")]
    InvalidLength(usize),
}

/// A button press or release could not be carried out
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ButtonError {
    #[error("Unknown button {0}")]
    UnknownButton(u32),

    #[error("No MIDI output devices connected")]
    NoOutputs,

    #[error("Press ignored (debounce)")]
    Debounced,

    #[error("No controller number left for button {0}")]
    ControllerExhausted(u32),
}
