//! Automap handshake state machine
//!
//! Tracks whether the controller endpoint is in automap mode. Only whole
//! transfers that exactly equal a protocol pattern count as handshake
//! events; everything else received while listening is surface traffic.

use std::fmt;
use tracing::{debug, info, warn};

use super::outbound::OutboundSink;
use crate::device::{AutomapProtocol, Channel};
use crate::midi::format_hex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Startup,
    WaitForAutomap,
    ButtonAck,
    Listen,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::Startup => "STARTUP",
            HandshakeState::WaitForAutomap => "WAIT_FOR_AUTOMAP",
            HandshakeState::ButtonAck => "BUTTON_ACK",
            HandshakeState::Listen => "LISTEN",
        };
        f.write_str(name)
    }
}

/// What to do with a controller transfer after the handshake has seen it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handshake traffic, not forwarded
    Consumed,
    /// Surface traffic for the reassembler
    Forward,
}

pub struct Handshake {
    state: HandshakeState,
    protocol: AutomapProtocol,
}

impl Handshake {
    pub fn new(protocol: AutomapProtocol) -> Self {
        Self {
            state: HandshakeState::Startup,
            protocol,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_listening(&self) -> bool {
        self.state == HandshakeState::Listen
    }

    /// Ask the device to enter automap mode
    pub fn request(&self, sink: &impl OutboundSink) {
        debug!("Requesting automap mode");
        sink.submit(Channel::Controller, self.protocol.ack.clone());
    }

    /// Feed one complete controller transfer
    pub fn on_transfer(&mut self, data: &[u8], sink: &impl OutboundSink) -> Disposition {
        if data == self.protocol.button_pressed.as_slice() {
            info!("Automap button pressed");
            self.transition(HandshakeState::ButtonAck);
            return Disposition::Consumed;
        }

        match self.state {
            HandshakeState::Startup => {
                if data == self.protocol.ack.as_slice() {
                    self.transition(HandshakeState::Listen);
                } else if data == self.protocol.off.as_slice() {
                    self.transition(HandshakeState::WaitForAutomap);
                } else {
                    warn!("State {}, got unexpected reply [{}]", self.state, format_hex(data));
                }
                Disposition::Consumed
            }
            HandshakeState::WaitForAutomap => {
                if data == self.protocol.ack.as_slice() {
                    self.transition(HandshakeState::Listen);
                    sink.submit(Channel::Controller, self.protocol.ack.clone());
                    sink.submit(Channel::Controller, self.protocol.greeting.clone());
                } else {
                    debug!("Waiting for automap, ignoring [{}]", format_hex(data));
                }
                Disposition::Consumed
            }
            HandshakeState::ButtonAck => {
                self.transition(HandshakeState::Listen);
                Disposition::Consumed
            }
            HandshakeState::Listen => {
                if data == self.protocol.off.as_slice() {
                    self.transition(HandshakeState::WaitForAutomap);
                    Disposition::Consumed
                } else {
                    Disposition::Forward
                }
            }
        }
    }

    fn transition(&mut self, next: HandshakeState) {
        if self.state != next {
            info!("Automap state {} -> {}", self.state, next);
        }
        self.state = next;
    }
}
