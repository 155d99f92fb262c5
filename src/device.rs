//! Novation device table
//!
//! Descriptors for the supported synthesizers (USB ids, endpoints, interfaces)
//! and the automap protocol byte patterns used on the controller channel.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ProtocolConfig;
use crate::midi::MidiMessage;

/// Novation USB vendor id
pub const NOVATION_VENDOR_ID: u16 = 0x1235;

/// Largest transfer the controller endpoint produces
pub const CONTROLLER_MAX_LENGTH: usize = 0x18;

/// Read buffer size for the MIDI endpoint
pub const MIDI_READ_LENGTH: usize = 32;

/// Logical input channel of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Vendor automap endpoint (buttons, encoders, LEDs)
    Controller,
    /// Standard MIDI endpoint (keyboard, synth engine)
    Midi,
}

impl Channel {
    pub fn name(self) -> &'static str {
        match self {
            Channel::Controller => "controller",
            Channel::Midi => "midi",
        }
    }
}

/// Supported hardware models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceModel {
    UltraNova,
    MiniNova,
}

/// Inbound/outbound interrupt endpoint addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointPair {
    pub inbound: u8,
    pub outbound: u8,
}

/// Static description of one device variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub model: DeviceModel,
    pub name: &'static str,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Default JACK client name
    pub client_name: &'static str,
    /// Automap endpoints, absent on devices without a control surface
    pub controller: Option<EndpointPair>,
    pub midi: EndpointPair,
    /// Interfaces claimed on open, released on close
    pub interfaces: &'static [u8],
}

pub const ULTRANOVA: DeviceDescriptor = DeviceDescriptor {
    model: DeviceModel::UltraNova,
    name: "Novation UltraNova",
    vendor_id: NOVATION_VENDOR_ID,
    product_id: 0x0011,
    client_name: "ultranova",
    controller: Some(EndpointPair { inbound: 0x85, outbound: 0x05 }),
    midi: EndpointPair { inbound: 0x83, outbound: 0x03 },
    interfaces: &[0, 1, 3],
};

pub const MININOVA: DeviceDescriptor = DeviceDescriptor {
    model: DeviceModel::MiniNova,
    name: "Novation MiniNova",
    vendor_id: NOVATION_VENDOR_ID,
    product_id: 0x001e,
    client_name: "mininova",
    controller: None,
    midi: EndpointPair { inbound: 0x81, outbound: 0x02 },
    interfaces: &[0],
};

/// Lookup order when probing the bus
pub const DEVICE_TABLE: [&DeviceDescriptor; 2] = [&ULTRANOVA, &MININOVA];

impl DeviceDescriptor {
    /// Find the descriptor matching a USB vendor/product id pair
    pub fn lookup(vendor_id: u16, product_id: u16) -> Option<&'static DeviceDescriptor> {
        DEVICE_TABLE
            .into_iter()
            .find(|d| d.vendor_id == vendor_id && d.product_id == product_id)
    }

    pub fn has_controller(&self) -> bool {
        self.controller.is_some()
    }

    /// Outbound endpoint for a channel, if the device has it
    pub fn outbound_endpoint(&self, channel: Channel) -> Option<u8> {
        match channel {
            Channel::Controller => self.controller.map(|c| c.outbound),
            Channel::Midi => Some(self.midi.outbound),
        }
    }

    /// Read length for the inbound endpoint of a channel
    pub fn read_length(&self, channel: Channel) -> usize {
        match channel {
            Channel::Controller => CONTROLLER_MAX_LENGTH,
            Channel::Midi => MIDI_READ_LENGTH,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid hex for '{field}': {source}")]
    InvalidHex {
        field: &'static str,
        #[source]
        source: hex::FromHexError,
    },

    #[error("'{field}' must not be empty")]
    Empty { field: &'static str },

    #[error("'{field}' must be a 3-byte message, got {len} bytes")]
    NotThreeBytes { field: &'static str, len: usize },
}

// Automap frames share the Novation sysex header.
const AUTOMAP_ACK: &[u8] = &[
    0xF0, 0x00, 0x20, 0x29, 0x03, 0x03, 0x12, 0x00, 0x04, 0x00, 0x01, 0x01, 0xF7,
];
const AUTOMAP_OFF: &[u8] = &[
    0xF0, 0x00, 0x20, 0x29, 0x03, 0x03, 0x12, 0x00, 0x04, 0x00, 0x01, 0x00, 0xF7,
];
const AUTOMAP_BUTTON_PRESSED: &[u8] = &[
    0xF0, 0x00, 0x20, 0x29, 0x03, 0x03, 0x12, 0x00, 0x04, 0x00, 0x02, 0x01, 0xF7,
];
const GREETING: &[u8] = &[
    0xF0, 0x00, 0x20, 0x29, 0x03, 0x03, 0x12, 0x00, 0x04, 0x00, 0x02, 0x02, 0x01, b'L', b'I',
    b'N', b'U', b'X', 0xF7,
];
const LED_OCTAVE_MINUS: u8 = 0x4A;
const LED_OCTAVE_PLUS: u8 = 0x4B;
const BUTTON_OCTAVE_MINUS: [u8; 3] = [0xB2, 0x2A, 0x7F];
const BUTTON_OCTAVE_PLUS: [u8; 3] = [0xB2, 0x2B, 0x7F];

/// Byte patterns of the automap handshake and surface feedback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomapProtocol {
    /// Device reports automap mode on; also sent back to confirm
    pub ack: Vec<u8>,
    /// Device left automap mode
    pub off: Vec<u8>,
    /// Automap button pressed on the panel
    pub button_pressed: Vec<u8>,
    /// Sent after the acknowledge when entering automap mode
    pub greeting: Vec<u8>,
    pub led_octave_minus: u8,
    pub led_octave_plus: u8,
    pub button_octave_minus: [u8; 3],
    pub button_octave_plus: [u8; 3],
}

impl Default for AutomapProtocol {
    fn default() -> Self {
        Self {
            ack: AUTOMAP_ACK.to_vec(),
            off: AUTOMAP_OFF.to_vec(),
            button_pressed: AUTOMAP_BUTTON_PRESSED.to_vec(),
            greeting: GREETING.to_vec(),
            led_octave_minus: LED_OCTAVE_MINUS,
            led_octave_plus: LED_OCTAVE_PLUS,
            button_octave_minus: BUTTON_OCTAVE_MINUS,
            button_octave_plus: BUTTON_OCTAVE_PLUS,
        }
    }
}

impl AutomapProtocol {
    /// Built-in patterns with any configured hex overrides applied
    pub fn with_overrides(config: &ProtocolConfig) -> Result<Self, ProtocolError> {
        let mut protocol = Self::default();

        if let Some(s) = &config.ack {
            protocol.ack = parse_pattern("ack", s)?;
        }
        if let Some(s) = &config.off {
            protocol.off = parse_pattern("off", s)?;
        }
        if let Some(s) = &config.button_pressed {
            protocol.button_pressed = parse_pattern("button_pressed", s)?;
        }
        if let Some(s) = &config.greeting {
            protocol.greeting = parse_pattern("greeting", s)?;
        }
        if let Some(led) = config.led_octave_minus {
            protocol.led_octave_minus = led;
        }
        if let Some(led) = config.led_octave_plus {
            protocol.led_octave_plus = led;
        }
        if let Some(s) = &config.button_octave_minus {
            protocol.button_octave_minus = parse_message("button_octave_minus", s)?;
        }
        if let Some(s) = &config.button_octave_plus {
            protocol.button_octave_plus = parse_message("button_octave_plus", s)?;
        }

        Ok(protocol)
    }

    /// LED feedback command
    pub fn led_command(&self, led: u8, value: u8) -> Vec<u8> {
        MidiMessage::ControlChange { channel: 0, cc: led, value }.encode()
    }
}

/// Decode a hex string such as "f0 00 20 29 f7" or "f0002029f7"
pub fn parse_pattern(field: &'static str, text: &str) -> Result<Vec<u8>, ProtocolError> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    let bytes = hex::decode(compact).map_err(|source| ProtocolError::InvalidHex { field, source })?;
    if bytes.is_empty() {
        return Err(ProtocolError::Empty { field });
    }
    Ok(bytes)
}

fn parse_message(field: &'static str, text: &str) -> Result<[u8; 3], ProtocolError> {
    let bytes = parse_pattern(field, text)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| ProtocolError::NotThreeBytes { field, len })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_product_id() {
        let ultranova = DeviceDescriptor::lookup(0x1235, 0x0011).unwrap();
        assert_eq!(ultranova.model, DeviceModel::UltraNova);
        assert_eq!(ultranova.client_name, "ultranova");

        let mininova = DeviceDescriptor::lookup(0x1235, 0x001e).unwrap();
        assert_eq!(mininova.model, DeviceModel::MiniNova);

        assert!(DeviceDescriptor::lookup(0x1235, 0x0020).is_none());
        assert!(DeviceDescriptor::lookup(0x1234, 0x0011).is_none());
    }

    #[test]
    fn test_endpoints() {
        assert_eq!(ULTRANOVA.outbound_endpoint(Channel::Controller), Some(0x05));
        assert_eq!(ULTRANOVA.outbound_endpoint(Channel::Midi), Some(0x03));
        assert_eq!(MININOVA.outbound_endpoint(Channel::Controller), None);
        assert_eq!(MININOVA.outbound_endpoint(Channel::Midi), Some(0x02));
        assert!(ULTRANOVA.has_controller());
        assert!(!MININOVA.has_controller());
        assert_eq!(ULTRANOVA.read_length(Channel::Controller), 0x18);
    }

    #[test]
    fn test_default_patterns_are_distinct() {
        let p = AutomapProtocol::default();
        assert_ne!(p.ack, p.off);
        assert_ne!(p.ack, p.button_pressed);
        assert_ne!(p.off, p.button_pressed);
        assert_eq!(p.greeting.first(), Some(&0xF0));
        assert_eq!(p.greeting.last(), Some(&0xF7));
    }

    #[test]
    fn test_led_command_encoding() {
        let p = AutomapProtocol::default();
        assert_eq!(p.led_command(p.led_octave_plus, 1), vec![0xB0, LED_OCTAVE_PLUS, 1]);
    }

    #[test]
    fn test_parse_pattern_accepts_spacing() {
        assert_eq!(parse_pattern("ack", "F0 00, 20 29 f7").unwrap(), vec![0xF0, 0x00, 0x20, 0x29, 0xF7]);
        assert_eq!(parse_pattern("ack", "f0f7").unwrap(), vec![0xF0, 0xF7]);
    }

    #[test]
    fn test_parse_pattern_rejects_garbage() {
        assert!(matches!(parse_pattern("off", "zz"), Err(ProtocolError::InvalidHex { .. })));
        assert!(matches!(parse_pattern("off", "  "), Err(ProtocolError::Empty { .. })));
    }

    #[test]
    fn test_overrides_applied() {
        let config = ProtocolConfig {
            ack: Some("f0 01 f7".into()),
            led_octave_plus: Some(0x10),
            button_octave_minus: Some("b2 40 7f".into()),
            ..Default::default()
        };

        let p = AutomapProtocol::with_overrides(&config).unwrap();
        assert_eq!(p.ack, vec![0xF0, 0x01, 0xF7]);
        assert_eq!(p.led_octave_plus, 0x10);
        assert_eq!(p.button_octave_minus, [0xB2, 0x40, 0x7F]);
        assert_eq!(p.off, AUTOMAP_OFF.to_vec());
    }

    #[test]
    fn test_octave_button_must_be_three_bytes() {
        let config = ProtocolConfig {
            button_octave_plus: Some("b2 40".into()),
            ..Default::default()
        };

        assert!(matches!(
            AutomapProtocol::with_overrides(&config),
            Err(ProtocolError::NotThreeBytes { len: 2, .. })
        ));
    }
}
