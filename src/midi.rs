//! MIDI wire codec
//!
//! Encodes outbound message descriptors into wire bytes and renders any
//! inbound byte sequence as a human-readable label.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use crate::error::CodecError;

/// Pitch bend center position, used when a pitch descriptor has no value
pub const PITCH_CENTER: u16 = 8192;

const MAX_DATA: u16 = 0x7F;
const MAX_PITCH: u16 = 0x3FFF;

/// A single MIDI event exactly as transmitted: 1 to 3 raw bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WireMessage {
    data: [u8; 3],
    len: usize,
}

impl WireMessage {
    /// Build a wire message from raw bytes
    pub fn new(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.is_empty() || bytes.len() > 3 {
            return Err(CodecError::InvalidLength(bytes.len()));
        }
        let mut data = [0u8; 3];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            data,
            len: bytes.len(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn status(&self) -> u8 {
        self.data[0]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Human-readable label for log output
    pub fn describe(&self) -> String {
        describe(self.as_bytes())
    }
}

impl TryFrom<&[u8]> for WireMessage {
    type Error = CodecError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::new(bytes)
    }
}

impl fmt::Debug for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WireMessage({:02X?})", self.as_bytes())
    }
}

impl fmt::Display for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl Serialize for WireMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.as_bytes())
    }
}

/// Channel voice messages recognized by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMessage {
    /// Note Off, also produced for Note On with velocity 0
    NoteOff { channel: u8, note: u8, velocity: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    PolyPressure { channel: u8, note: u8, pressure: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, pressure: u8 },
    /// Pitch Bend with a 14-bit value (0-16383)
    PitchBend { channel: u8, value: u16 },
}

impl ChannelMessage {
    /// Classify raw bytes by the high nibble of the status byte.
    ///
    /// Returns `None` for system messages, running status, and messages that
    /// are too short for their type.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let status = *data.first()?;
        if !(0x80..0xF0).contains(&status) {
            return None;
        }

        let channel = status & 0x0F;
        let d1 = data.get(1).copied();
        let d2 = data.get(2).copied();

        match status & 0xF0 {
            0x80 => Some(ChannelMessage::NoteOff {
                channel,
                note: d1?,
                velocity: d2?,
            }),
            0x90 => {
                let (note, velocity) = (d1?, d2?);
                if velocity == 0 {
                    Some(ChannelMessage::NoteOff {
                        channel,
                        note,
                        velocity,
                    })
                } else {
                    Some(ChannelMessage::NoteOn {
                        channel,
                        note,
                        velocity,
                    })
                }
            }
            0xA0 => Some(ChannelMessage::PolyPressure {
                channel,
                note: d1?,
                pressure: d2?,
            }),
            0xB0 => Some(ChannelMessage::ControlChange {
                channel,
                controller: d1?,
                value: d2?,
            }),
            0xC0 => Some(ChannelMessage::ProgramChange {
                channel,
                program: d1?,
            }),
            0xD0 => Some(ChannelMessage::ChannelPressure {
                channel,
                pressure: d1?,
            }),
            0xE0 => {
                let lsb = u16::from(d1?);
                let msb = u16::from(d2?);
                Some(ChannelMessage::PitchBend {
                    channel,
                    value: (msb << 7) | lsb,
                })
            }
            _ => None,
        }
    }

    /// Wire channel (0-15)
    pub fn channel(&self) -> u8 {
        match *self {
            ChannelMessage::NoteOff { channel, .. }
            | ChannelMessage::NoteOn { channel, .. }
            | ChannelMessage::PolyPressure { channel, .. }
            | ChannelMessage::ControlChange { channel, .. }
            | ChannelMessage::ProgramChange { channel, .. }
            | ChannelMessage::ChannelPressure { channel, .. }
            | ChannelMessage::PitchBend { channel, .. } => channel,
        }
    }
}

impl fmt::Display for ChannelMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Channels are shown 1-indexed
        let ch = self.channel() + 1;
        match *self {
            ChannelMessage::NoteOff { note, velocity, .. } => {
                write!(f, "Note Off Ch:{} Note:{} Vel:{}", ch, note, velocity)
            }
            ChannelMessage::NoteOn { note, velocity, .. } => {
                write!(f, "Note On Ch:{} Note:{} Vel:{}", ch, note, velocity)
            }
            ChannelMessage::PolyPressure { note, pressure, .. } => {
                write!(f, "Aftertouch Ch:{} Note:{} Pressure:{}", ch, note, pressure)
            }
            ChannelMessage::ControlChange {
                controller, value, ..
            } => write!(f, "CC Ch:{} Controller:{} Value:{}", ch, controller, value),
            ChannelMessage::ProgramChange { program, .. } => {
                write!(f, "Program Change Ch:{} Program:{}", ch, program)
            }
            ChannelMessage::ChannelPressure { pressure, .. } => {
                write!(f, "Channel Pressure Ch:{} Pressure:{}", ch, pressure)
            }
            ChannelMessage::PitchBend { value, .. } => {
                write!(f, "Pitch Bend Ch:{} Value:{}", ch, value)
            }
        }
    }
}

/// Render any byte sequence as a label. Never fails: anything that is not a
/// complete channel voice message is shown as a raw hex dump.
pub fn describe(data: &[u8]) -> String {
    match ChannelMessage::parse(data) {
        Some(msg) => msg.to_string(),
        None => format!("Raw: [{}]", format_hex(data)),
    }
}

/// Format bytes as lowercase, space separated hex
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Structured, user-editable description of an outbound message.
///
/// Mirrors the button configuration format:
/// `{type: cc|note|program|pitch, channel: 0-15, controller|note|program|value, velocity?}`.
/// The `type` tag is free text on the wire. Loading a config or importing
/// settings encodes every descriptor and rejects an unknown tag there;
/// [`encode`](Self::encode) reports it as [`CodecError::UnsupportedType`] for
/// descriptors built in code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub channel: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<u8>,
}

impl MessageDescriptor {
    fn blank(kind: &str, channel: u8) -> Self {
        Self {
            kind: kind.to_string(),
            channel,
            controller: None,
            note: None,
            program: None,
            value: None,
            velocity: None,
        }
    }

    pub fn cc(channel: u8, controller: u8, value: u8) -> Self {
        Self {
            controller: Some(controller),
            value: Some(u16::from(value)),
            ..Self::blank("cc", channel)
        }
    }

    pub fn note(channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            note: Some(note),
            velocity: Some(velocity),
            ..Self::blank("note", channel)
        }
    }

    pub fn program(channel: u8, program: u8) -> Self {
        Self {
            program: Some(program),
            ..Self::blank("program", channel)
        }
    }

    /// Pitch bend; `None` sends the center position
    pub fn pitch(channel: u8, value: Option<u16>) -> Self {
        Self {
            value,
            ..Self::blank("pitch", channel)
        }
    }

    /// Encode into wire bytes.
    ///
    /// A note with zero (or missing) velocity is encoded as Note Off.
    pub fn encode(&self) -> Result<WireMessage, CodecError> {
        if self.channel > 15 {
            return Err(CodecError::InvalidChannel(self.channel));
        }
        let ch = self.channel;

        let bytes: Vec<u8> = match self.kind.as_str() {
            "cc" => {
                let controller = self.data_byte("controller", self.controller.map(u16::from))?;
                let value = self.data_byte("value", self.value)?;
                vec![0xB0 + ch, controller, value]
            }
            "note" => {
                let note = self.data_byte("note", self.note.map(u16::from))?;
                let velocity = checked("velocity", u16::from(self.velocity.unwrap_or(0)), MAX_DATA)?;
                if velocity > 0 {
                    vec![0x90 + ch, note, velocity as u8]
                } else {
                    vec![0x80 + ch, note, 0]
                }
            }
            "program" => {
                let program = self.data_byte("program", self.program.map(u16::from))?;
                vec![0xC0 + ch, program]
            }
            "pitch" => {
                let value = checked("value", self.value.unwrap_or(PITCH_CENTER), MAX_PITCH)?;
                vec![0xE0 + ch, (value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8]
            }
            other => return Err(CodecError::UnsupportedType(other.to_string())),
        };

        WireMessage::new(&bytes)
    }

    fn data_byte(&self, field: &'static str, value: Option<u16>) -> Result<u8, CodecError> {
        let value = value.ok_or_else(|| CodecError::MissingField {
            kind: self.kind.clone(),
            field,
        })?;
        Ok(checked(field, value, MAX_DATA)? as u8)
    }
}

fn checked(field: &'static str, value: u16, max: u16) -> Result<u16, CodecError> {
    if value > max {
        return Err(CodecError::OutOfRange { field, value, max });
    }
    Ok(value)
}
