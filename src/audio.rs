//! JACK MIDI ports
//!
//! The process callback is the real-time side of the bridge: it forwards
//! input-port events to the USB writer and schedules queued device messages
//! into the output-port buffers.

use crossbeam::channel::Sender;
use jack::{
    Client, ClientOptions, ClientStatus, Control, MidiIn, MidiOut, MidiWriter, Port, ProcessScope,
    RawMidi,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

use crate::bridge::{
    forward_events, BridgeQueues, CycleClock, EventWriter, OutboundTransfer, QueueScheduler,
    WriteError,
};
use crate::device::{Channel, DeviceDescriptor};

pub const CONTROLLER_OUT: &str = "controller_out";
pub const CONTROLLER_IN: &str = "controller_in";
pub const MIDI_OUT: &str = "midi_out";
pub const MIDI_IN: &str = "midi_in";

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("failed to create JACK client '{name}' (is the JACK server running?): {source}")]
    Client {
        name: String,
        #[source]
        source: jack::Error,
    },

    #[error("failed to register port '{name}': {source}")]
    Port {
        name: &'static str,
        #[source]
        source: jack::Error,
    },

    #[error("failed to activate JACK client: {0}")]
    Activate(#[source] jack::Error),

    #[error("failed to deactivate JACK client: {0}")]
    Deactivate(#[source] jack::Error),
}

impl EventWriter for MidiWriter<'_> {
    fn write_event(&mut self, frame: u32, bytes: &[u8]) -> Result<(), WriteError> {
        self.write(&RawMidi { time: frame, bytes })
            .map_err(|e| WriteError::Rejected(e.to_string()))
    }
}

/// JACK notification handler
struct Notifications {
    alive: Arc<AtomicBool>,
}

impl jack::NotificationHandler for Notifications {
    fn shutdown(&mut self, status: ClientStatus, reason: &str) {
        warn!("JACK server shut down the client: {:?} - {}", status, reason);
        self.alive.store(false, Ordering::Relaxed);
    }

    fn xrun(&mut self, _client: &Client) -> Control {
        warn!("JACK xrun detected");
        Control::Continue
    }
}

/// Real-time side of the bridge
struct Processor {
    controller_ports: Option<(Port<MidiOut>, Port<MidiIn>)>,
    midi_out: Port<MidiOut>,
    midi_in: Port<MidiIn>,
    queues: BridgeQueues,
    outbound: Sender<OutboundTransfer>,
    clock: CycleClock,
    scheduler: QueueScheduler,
}

impl jack::ProcessHandler for Processor {
    fn process(&mut self, _client: &Client, ps: &ProcessScope) -> Control {
        let now = Instant::now();
        let frames = ps.n_frames();

        // Creating the writers clears this cycle's output buffers
        let mut midi_writer = self.midi_out.writer(ps);
        let mut controller = self
            .controller_ports
            .as_mut()
            .map(|(out, input)| (out.writer(ps), &*input));

        if let Some((_, input)) = &controller {
            forward_events(Channel::Controller, input.iter(ps).map(|e| e.bytes), &self.outbound);
        }
        forward_events(Channel::Midi, self.midi_in.iter(ps).map(|e| e.bytes), &self.outbound);

        let Some(window) = self.clock.begin_cycle(now) else {
            return Control::Continue;
        };

        if let (Some(queue), Some((writer, _))) = (&self.queues.controller, controller.as_mut()) {
            self.scheduler.run(queue, &window, frames, writer);
        }
        self.scheduler.run(&self.queues.midi, &window, frames, &mut midi_writer);

        Control::Continue
    }
}

/// Active JACK client
pub struct AudioClient {
    client: jack::AsyncClient<Notifications, Processor>,
    alive: Arc<AtomicBool>,
}

impl AudioClient {
    /// Register the device's ports and activate the client
    pub fn start(
        client_name: &str,
        device: &DeviceDescriptor,
        queues: BridgeQueues,
        outbound: Sender<OutboundTransfer>,
    ) -> Result<Self, AudioError> {
        let (client, _status) = Client::new(client_name, ClientOptions::NO_START_SERVER)
            .map_err(|source| AudioError::Client {
                name: client_name.to_string(),
                source,
            })?;

        info!(
            "JACK client '{}' created (sample rate: {}Hz, buffer: {} frames)",
            client.name(),
            client.sample_rate(),
            client.buffer_size()
        );

        let register_out = |name: &'static str| {
            client
                .register_port(name, MidiOut::default())
                .map_err(|source| AudioError::Port { name, source })
        };
        let register_in = |name: &'static str| {
            client
                .register_port(name, MidiIn::default())
                .map_err(|source| AudioError::Port { name, source })
        };

        let controller_ports = if device.has_controller() {
            Some((register_out(CONTROLLER_OUT)?, register_in(CONTROLLER_IN)?))
        } else {
            None
        };
        let midi_out = register_out(MIDI_OUT)?;
        let midi_in = register_in(MIDI_IN)?;

        let processor = Processor {
            controller_ports,
            midi_out,
            midi_in,
            queues,
            outbound,
            clock: CycleClock::new(),
            scheduler: QueueScheduler::new(),
        };

        let alive = Arc::new(AtomicBool::new(true));
        let notifications = Notifications { alive: alive.clone() };
        let client = client
            .activate_async(notifications, processor)
            .map_err(AudioError::Activate)?;

        info!("JACK client activated");
        Ok(Self { client, alive })
    }

    /// False after the server dropped the client
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Deactivate and close the client, dropping its outbound sender
    pub fn stop(self) -> Result<(), AudioError> {
        self.client.deactivate().map_err(AudioError::Deactivate)?;
        info!("JACK client closed");
        Ok(())
    }
}
