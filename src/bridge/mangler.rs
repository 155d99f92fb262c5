//! Automap message mangler
//!
//! Rewrites complete messages while the surface is in automap mode:
//! - note transposition by the octave offset, paired so a note-off releases
//!   the pitch its note-on actually sounded
//! - controller numbers 0-9 on the encoder status moved out of the modwheel range
//! - relative encoders turned into absolute 0-127 values
//! - button bank values normalized to 0/127, toggles mirrored to the target
//! - octave buttons with LED feedback

use std::sync::Arc;
use tracing::{debug, trace};

use super::outbound::OutboundSink;
use crate::device::{AutomapProtocol, Channel};
use crate::midi::{is_note_off, is_note_on, CONTROL_CHANGE};
use crate::mirror::{MirrorCommand, MirrorTarget, MASTER_BUS_ROUTE};

/// Status of the encoder bank
pub const ENCODER_STATUS: u8 = CONTROL_CHANGE;

/// Status of the button bank
pub const BUTTON_STATUS: u8 = 0xB2;

/// First controller number of the remapped encoder range
pub const ENCODER_BASE: u8 = 0x10;

pub const ENCODER_COUNT: usize = 10;

pub const OCTAVE_LIMIT: i8 = 4;

const BUTTON_TRANSPORT_STOP: u8 = 0x1D;
const BUTTON_TRANSPORT_PLAY: u8 = 0x1E;
const BUTTON_LOOP_TOGGLE: u8 = 0x20;
const BUTTON_REC_ENABLE_TOGGLE: u8 = 0x22;

/// Per-strip record-enable buttons, strip 1 first
const REC_ENABLE_BUTTONS: [u8; 8] = [0x13, 0x15, 0x17, 0x19, 0x1A, 0x1C, 0x1F, 0x21];

pub struct Mangler {
    protocol: AutomapProtocol,
    mirror: Option<Arc<dyn MirrorTarget>>,
    octave: i8,
    /// Original note -> transposed note for sounding notes
    dangling: [Option<u8>; 128],
    encoders: [u8; ENCODER_COUNT],
    mute_states: u8,
    rec_enable_states: u8,
}

impl Mangler {
    pub fn new(protocol: AutomapProtocol, mirror: Option<Arc<dyn MirrorTarget>>) -> Self {
        Self {
            protocol,
            mirror,
            octave: 0,
            dangling: [None; 128],
            encoders: [0; ENCODER_COUNT],
            mute_states: 0,
            rec_enable_states: 0,
        }
    }

    pub fn octave(&self) -> i8 {
        self.octave
    }

    pub fn encoder_value(&self, index: usize) -> Option<u8> {
        self.encoders.get(index).copied()
    }

    /// Transform one complete message in place
    pub fn process(&mut self, channel: Channel, bytes: &mut [u8], sink: &impl OutboundSink) {
        if bytes.len() < 3 {
            return;
        }

        if is_note_on(bytes) {
            self.note_on(bytes);
            return;
        }
        if is_note_off(bytes) {
            self.note_off(bytes);
            return;
        }

        if channel != Channel::Controller {
            return;
        }

        if bytes[0] == ENCODER_STATUS && bytes[1] <= 9 {
            bytes[1] += ENCODER_BASE;
        }

        if bytes[0] == ENCODER_STATUS
            && (ENCODER_BASE..ENCODER_BASE + ENCODER_COUNT as u8).contains(&bytes[1])
        {
            self.encoder(bytes);
        }

        if bytes[0] == BUTTON_STATUS {
            self.button(bytes);
        }

        if bytes[..3] == self.protocol.button_octave_minus {
            self.shift_octave(-1, sink);
        } else if bytes[..3] == self.protocol.button_octave_plus {
            self.shift_octave(1, sink);
        }
    }

    /// Pair a note-off with its transposed note-on, leaving anything else untouched.
    ///
    /// Used outside automap mode so notes started while listening still end.
    pub fn release(&mut self, bytes: &mut [u8]) {
        if is_note_off(bytes) {
            self.note_off(bytes);
        }
    }

    fn note_on(&mut self, bytes: &mut [u8]) {
        let original = bytes[1] & 0x7F;
        let transposed = (original as i16 + self.octave as i16 * 12).clamp(0, 127) as u8;
        self.dangling[original as usize] = Some(transposed);
        bytes[1] = transposed;
    }

    fn note_off(&mut self, bytes: &mut [u8]) {
        let original = bytes[1] & 0x7F;
        if let Some(transposed) = self.dangling[original as usize].take() {
            bytes[1] = transposed;
        }
    }

    fn encoder(&mut self, bytes: &mut [u8]) {
        let index = (bytes[1] - ENCODER_BASE) as usize;
        let raw = bytes[2] as i16;
        let delta = if raw >= 64 { raw - 128 } else { raw };
        let value = (self.encoders[index] as i16 + delta).clamp(0, 127) as u8;

        trace!("Encoder {} {:+} -> {}", index, delta, value);
        self.encoders[index] = value;
        bytes[2] = value;

        if index <= 8 {
            let route = if index == 8 { MASTER_BUS_ROUTE } else { index as i32 + 1 };
            self.mirror(MirrorCommand::Gain {
                route,
                gain: 2.0 * value as f32 / 127.0,
            });
        }
    }

    fn button(&mut self, bytes: &mut [u8]) {
        bytes[2] = if bytes[2] != 0 { 127 } else { 0 };
        let button = bytes[1];
        let pressed = bytes[2] != 0;

        if self.mirror.is_none() {
            return;
        }

        if button <= 7 && pressed {
            self.mute_states ^= 1 << button;
            let on = self.mute_states & (1 << button) != 0;
            self.mirror(MirrorCommand::Mute { route: button as i32 + 1, on });
        }

        // Transport buttons report both edges
        match button {
            BUTTON_TRANSPORT_STOP => self.mirror(MirrorCommand::TransportStop),
            BUTTON_TRANSPORT_PLAY => self.mirror(MirrorCommand::TransportPlay),
            _ => {}
        }

        if !pressed {
            return;
        }

        match button {
            BUTTON_LOOP_TOGGLE => self.mirror(MirrorCommand::LoopToggle),
            BUTTON_REC_ENABLE_TOGGLE => self.mirror(MirrorCommand::RecEnableToggle),
            _ => {}
        }

        if let Some(strip) = REC_ENABLE_BUTTONS.iter().position(|&b| b == button) {
            self.rec_enable_states ^= 1 << strip;
            let on = self.rec_enable_states & (1 << strip) != 0;
            self.mirror(MirrorCommand::RecEnable { route: strip as i32 + 1, on });
        }
    }

    fn shift_octave(&mut self, step: i8, sink: &impl OutboundSink) {
        self.octave = (self.octave + step).clamp(-OCTAVE_LIMIT, OCTAVE_LIMIT);
        debug!("Octave offset {}", self.octave);

        let p = &self.protocol;
        if self.octave > 0 {
            sink.submit(Channel::Controller, p.led_command(p.led_octave_plus, 1));
        } else if self.octave == 0 {
            sink.submit(Channel::Controller, p.led_command(p.led_octave_plus, 0));
            sink.submit(Channel::Controller, p.led_command(p.led_octave_minus, 0));
        } else {
            sink.submit(Channel::Controller, p.led_command(p.led_octave_minus, 1));
        }
    }

    fn mirror(&self, command: MirrorCommand) {
        if let Some(mirror) = &self.mirror {
            mirror.send(command);
        }
    }
}
