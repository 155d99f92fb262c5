//! Bridge session - per-device protocol state between USB and JACK
//!
//! The session owns everything the USB dispatcher mutates:
//! - one reassembler and queue per channel
//! - the automap handshake (devices with a controller endpoint only)
//! - the mangler state (octave, sounding notes, encoders, toggles)
//!
//! The audio side only ever sees the queues.

mod handshake;
mod mangler;
mod outbound;
mod queue;
mod reassembler;
mod scheduler;

#[cfg(test)]
mod tests;

pub use handshake::{Disposition, Handshake, HandshakeState};
pub use mangler::Mangler;
pub use outbound::{forward_events, OutboundSink, OutboundTransfer};
#[cfg(test)]
pub use outbound::RecordingSink;
pub use queue::{ChannelQueue, Message};
pub use reassembler::Reassembler;
pub use scheduler::{
    frame_offset, CycleClock, CycleWindow, EventWriter, QueueScheduler, ScheduleReport, WriteError,
};

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::device::{AutomapProtocol, Channel, DeviceDescriptor};
use crate::midi::{format_hex, MidiMessage};
use crate::mirror::MirrorTarget;

/// Reassembler and queue of one channel
struct Lane {
    channel: Channel,
    reassembler: Reassembler,
    queue: ChannelQueue,
}

impl Lane {
    fn new(channel: Channel) -> Self {
        Self {
            channel,
            reassembler: Reassembler::new(channel),
            queue: ChannelQueue::new(),
        }
    }

    fn ingest(&mut self, data: &[u8], timestamp: Instant, mut transform: impl FnMut(&mut Vec<u8>)) {
        let channel = self.channel;
        let queue = &self.queue;

        self.reassembler.feed(data, timestamp, |mut message| {
            transform(&mut message.bytes);
            match MidiMessage::parse(&message.bytes) {
                Some(m) => debug!("{} -> {}", channel.name(), m),
                None => debug!("{} -> [{}]", channel.name(), format_hex(&message.bytes)),
            }
            queue.push(message);
        });
    }
}

/// Consumer handles for the audio side
#[derive(Debug, Clone)]
pub struct BridgeQueues {
    pub controller: Option<ChannelQueue>,
    pub midi: ChannelQueue,
}

/// Diagnostic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub completed: u64,
    pub framing_errors: u64,
    pub controller_queued: usize,
    pub midi_queued: usize,
}

/// Session for one connected device
pub struct Bridge<S: OutboundSink> {
    device: &'static DeviceDescriptor,
    handshake: Option<Handshake>,
    mangler: Mangler,
    controller: Lane,
    midi: Lane,
    sink: S,
}

impl<S: OutboundSink> Bridge<S> {
    pub fn new(
        device: &'static DeviceDescriptor,
        protocol: AutomapProtocol,
        mirror: Option<Arc<dyn MirrorTarget>>,
        sink: S,
    ) -> Self {
        let handshake = device
            .has_controller()
            .then(|| Handshake::new(protocol.clone()));

        Self {
            device,
            handshake,
            mangler: Mangler::new(protocol, mirror),
            controller: Lane::new(Channel::Controller),
            midi: Lane::new(Channel::Midi),
            sink,
        }
    }

    pub fn device(&self) -> &'static DeviceDescriptor {
        self.device
    }

    /// Probe the device for automap mode
    pub fn start(&self) {
        if let Some(handshake) = &self.handshake {
            handshake.request(&self.sink);
        }
    }

    pub fn handshake_state(&self) -> Option<HandshakeState> {
        self.handshake.as_ref().map(Handshake::state)
    }

    pub fn is_listening(&self) -> bool {
        self.handshake.as_ref().is_some_and(Handshake::is_listening)
    }

    pub fn octave(&self) -> i8 {
        self.mangler.octave()
    }

    pub fn queues(&self) -> BridgeQueues {
        BridgeQueues {
            controller: self.handshake.is_some().then(|| self.controller.queue.clone()),
            midi: self.midi.queue.clone(),
        }
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            completed: self.controller.reassembler.completed() + self.midi.reassembler.completed(),
            framing_errors: self.controller.reassembler.framing_errors()
                + self.midi.reassembler.framing_errors(),
            controller_queued: self.controller.queue.len(),
            midi_queued: self.midi.queue.len(),
        }
    }

    /// Handle one completed inbound transfer
    pub fn deliver(&mut self, channel: Channel, data: &[u8], timestamp: Instant) {
        match channel {
            Channel::Controller => {
                let Some(handshake) = self.handshake.as_mut() else {
                    warn!("{} has no controller endpoint, ignoring transfer", self.device.name);
                    return;
                };
                if handshake.on_transfer(data, &self.sink) == Disposition::Consumed {
                    // Handshake traffic never continues a surface message
                    self.controller.reassembler.reset();
                    return;
                }

                let mangler = &mut self.mangler;
                let sink = &self.sink;
                self.controller.ingest(data, timestamp, |bytes| {
                    mangler.process(Channel::Controller, bytes, sink)
                });
            }
            Channel::Midi => {
                let listening = self.is_listening();
                let mangler = &mut self.mangler;
                let sink = &self.sink;
                self.midi.ingest(data, timestamp, |bytes| {
                    if listening {
                        mangler.process(Channel::Midi, bytes, sink);
                    } else {
                        mangler.release(bytes);
                    }
                });
            }
        }
    }
}
