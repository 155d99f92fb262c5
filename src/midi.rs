//! MIDI utilities and message types
//!
//! Status-byte classification used by the stream reassembler, a decoded view of
//! complete messages for logging and tests, and hex formatting for transfer dumps.

use std::fmt;

/// Start of a system-exclusive message
pub const SYSEX_START: u8 = 0xF0;

/// End of a system-exclusive message
pub const SYSEX_END: u8 = 0xF7;

pub const NOTE_OFF: u8 = 0x80;
pub const NOTE_ON: u8 = 0x90;
pub const CONTROL_CHANGE: u8 = 0xB0;

/// Length of a message as announced by its first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLength {
    /// Fixed number of bytes, status byte included
    Fixed(usize),
    /// System exclusive: runs until the 0xF7 terminator
    SysEx,
}

/// Expected length of the message starting with `status`.
///
/// Data bytes in status position have no defined length and fall back to 3.
pub fn message_length(status: u8) -> MessageLength {
    let high = status & 0xF0;
    let low = status & 0x0F;

    match (high, low) {
        (0xF0, 0x0) => MessageLength::SysEx,
        (0xC0, _) | (0xD0, _) => MessageLength::Fixed(2),
        (0xF0, 0x3) => MessageLength::Fixed(2),
        (0xF0, 0x2) => MessageLength::Fixed(3),
        (0xF0, _) => MessageLength::Fixed(1),
        _ => MessageLength::Fixed(3),
    }
}

/// Upper nibble of a status byte
#[inline]
pub fn status_kind(status: u8) -> u8 {
    status & 0xF0
}

/// True for a note-on with non-zero velocity
pub fn is_note_on(bytes: &[u8]) -> bool {
    bytes.len() >= 3 && status_kind(bytes[0]) == NOTE_ON && bytes[2] != 0
}

/// True for a note-off, including note-on with velocity 0
pub fn is_note_off(bytes: &[u8]) -> bool {
    bytes.len() >= 3
        && (status_kind(bytes[0]) == NOTE_OFF
            || (status_kind(bytes[0]) == NOTE_ON && bytes[2] == 0))
}

/// Decoded MIDI message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },

    /// Note On: channel (0-15), note (0-127), velocity (0-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },

    /// Polyphonic Key Pressure
    PolyPressure { channel: u8, note: u8, pressure: u8 },

    /// Control Change: channel (0-15), cc (0-127), value (0-127)
    ControlChange { channel: u8, cc: u8, value: u8 },

    ProgramChange { channel: u8, program: u8 },

    ChannelPressure { channel: u8, pressure: u8 },

    /// Pitch Bend: channel (0-15), value (0-16383, 14-bit)
    PitchBend { channel: u8, value: u16 },

    /// System Exclusive payload without the framing bytes
    SysEx { data: Vec<u8> },

    SongPosition { position: u16 },

    SongSelect { song: u8 },

    /// Any other single-byte system message
    System { status: u8 },
}

impl MidiMessage {
    /// Parse a complete MIDI message from raw bytes
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;
        if status < 0x80 {
            return None;
        }

        let channel = status & 0x0F;
        let byte = |i: usize| rest.get(i).map(|b| b & 0x7F);

        let message = match status_kind(status) {
            NOTE_OFF => MidiMessage::NoteOff {
                channel,
                note: byte(0)?,
                velocity: byte(1)?,
            },
            NOTE_ON => {
                let note = byte(0)?;
                let velocity = byte(1)?;
                if velocity == 0 {
                    MidiMessage::NoteOff { channel, note, velocity: 0 }
                } else {
                    MidiMessage::NoteOn { channel, note, velocity }
                }
            }
            0xA0 => MidiMessage::PolyPressure {
                channel,
                note: byte(0)?,
                pressure: byte(1)?,
            },
            CONTROL_CHANGE => MidiMessage::ControlChange {
                channel,
                cc: byte(0)?,
                value: byte(1)?,
            },
            0xC0 => MidiMessage::ProgramChange { channel, program: byte(0)? },
            0xD0 => MidiMessage::ChannelPressure { channel, pressure: byte(0)? },
            0xE0 => {
                let lsb = byte(0)? as u16;
                let msb = byte(1)? as u16;
                MidiMessage::PitchBend { channel, value: (msb << 7) | lsb }
            }
            _ => match status {
                SYSEX_START => {
                    let end = rest.iter().position(|&b| b == SYSEX_END)?;
                    MidiMessage::SysEx { data: rest[..end].to_vec() }
                }
                0xF2 => {
                    let lsb = byte(0)? as u16;
                    let msb = byte(1)? as u16;
                    MidiMessage::SongPosition { position: (msb << 7) | lsb }
                }
                0xF3 => MidiMessage::SongSelect { song: byte(0)? },
                _ => MidiMessage::System { status },
            },
        };

        Some(message)
    }

    /// Encode the message to MIDI bytes
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                vec![NOTE_OFF | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                vec![NOTE_ON | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::PolyPressure { channel, note, pressure } => {
                vec![0xA0 | (channel & 0x0F), note & 0x7F, pressure & 0x7F]
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                vec![CONTROL_CHANGE | (channel & 0x0F), cc & 0x7F, value & 0x7F]
            }
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), program & 0x7F]
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                vec![0xD0 | (channel & 0x0F), pressure & 0x7F]
            }
            MidiMessage::PitchBend { channel, value } => {
                let lsb = (value & 0x7F) as u8;
                let msb = ((value >> 7) & 0x7F) as u8;
                vec![0xE0 | (channel & 0x0F), lsb, msb]
            }
            MidiMessage::SysEx { ref data } => {
                let mut result = Vec::with_capacity(data.len() + 2);
                result.push(SYSEX_START);
                result.extend_from_slice(data);
                result.push(SYSEX_END);
                result
            }
            MidiMessage::SongPosition { position } => {
                vec![0xF2, (position & 0x7F) as u8, ((position >> 7) & 0x7F) as u8]
            }
            MidiMessage::SongSelect { song } => vec![0xF3, song & 0x7F],
            MidiMessage::System { status } => vec![status],
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                write!(f, "NoteOff ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                write!(f, "NoteOn ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, cc, value)
            }
            MidiMessage::PitchBend { channel, value } => {
                write!(f, "PitchBend ch:{} v:{}", channel + 1, value)
            }
            MidiMessage::SysEx { ref data } => write!(f, "SysEx {} bytes", data.len()),
            _ => write!(f, "{:?}", self),
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format a USB transfer for the debug dump
pub fn format_transfer(direction: &str, endpoint: u8, data: &[u8]) -> String {
    let message = MidiMessage::parse(data)
        .map(|m| format!(" => {}", m))
        .unwrap_or_default();

    format!(
        "{} ep 0x{:02X} [{} bytes] | {}{}",
        direction,
        endpoint,
        data.len(),
        format_hex(data),
        message
    )
}
