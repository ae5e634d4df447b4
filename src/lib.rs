//! MIDI Switcher - routes every connected MIDI input to all other outputs
//!
//! The core is platform independent: a [`platform::MidiPlatform`] supplies
//! ports and delivery, the [`session::SessionManager`] keeps the port lists
//! current and fans inbound messages out, and the UI side sends configured
//! button messages through the same manager.

pub mod activity;
pub mod buttons;
pub mod config;
pub mod error;
pub mod midi;
pub mod platform;
pub mod ports;
pub mod router;
pub mod session;

pub use error::{ButtonError, CodecError, ConnectionError, DeliveryError};
pub use midi::{MessageDescriptor, WireMessage};
pub use ports::{PortDirection, PortInfo, PortState};
pub use router::RoutingResult;
pub use session::{SessionEvent, SessionManager, SessionState};
