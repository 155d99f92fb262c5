//! USB transport
//!
//! Opens the synthesizer with rusb, claims its interfaces and runs the
//! transfer threads:
//! - one reader per inbound interrupt endpoint, timestamping each transfer
//! - one dispatcher owning the bridge session, handling transfers in order
//! - one writer draining outbound transfers

use crossbeam::channel::{unbounded, Receiver, Sender};
use rusb::{Context, DeviceHandle, UsbContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::bridge::{Bridge, OutboundSink, OutboundTransfer};
use crate::config::DeviceSelection;
use crate::device::{Channel, DeviceDescriptor, DEVICE_TABLE};
use crate::midi::format_transfer;

/// Write timeout for outbound interrupt transfers
const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Back-off after a failed read so a misbehaving device does not spin a core
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum UsbError {
    #[error("no supported Novation device found")]
    DeviceNotFound,

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("failed to claim interface {interface}: {source}")]
    ClaimInterface {
        interface: u8,
        #[source]
        source: rusb::Error,
    },

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// A completed inbound transfer
#[derive(Debug, Clone)]
pub struct InboundTransfer {
    pub channel: Channel,
    pub data: Vec<u8>,
    pub timestamp: Instant,
}

/// Supported device present on the bus
#[derive(Debug, Clone)]
pub struct FoundDevice {
    pub bus: u8,
    pub address: u8,
    pub descriptor: &'static DeviceDescriptor,
}

/// List supported devices currently connected
pub fn list_devices() -> Result<Vec<FoundDevice>, UsbError> {
    let context = Context::new()?;
    let mut found = Vec::new();

    for device in context.devices()?.iter() {
        let Ok(desc) = device.device_descriptor() else {
            continue;
        };
        if let Some(descriptor) = DeviceDescriptor::lookup(desc.vendor_id(), desc.product_id()) {
            found.push(FoundDevice {
                bus: device.bus_number(),
                address: device.address(),
                descriptor,
            });
        }
    }

    Ok(found)
}

/// Transfer thread settings
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    pub read_timeout: Duration,
    /// Log every transfer at debug level
    pub dump_transfers: bool,
}

/// Opened device with claimed interfaces
pub struct UsbDevice {
    handle: Arc<DeviceHandle<Context>>,
    descriptor: &'static DeviceDescriptor,
    claimed: Vec<u8>,
}

impl UsbDevice {
    /// Open the first device in table order accepted by `selection`
    pub fn open(selection: DeviceSelection, detach_kernel_driver: bool) -> Result<Self, UsbError> {
        let context = Context::new()?;

        for descriptor in DEVICE_TABLE.into_iter().filter(|d| selection.accepts(d)) {
            let Some(mut handle) =
                context.open_device_with_vid_pid(descriptor.vendor_id, descriptor.product_id)
            else {
                debug!("{} not present", descriptor.name);
                continue;
            };

            info!("Found {}", descriptor.name);

            if detach_kernel_driver {
                if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
                    debug!("Kernel driver auto-detach unavailable: {}", e);
                }
            }

            let mut claimed = Vec::with_capacity(descriptor.interfaces.len());
            for &interface in descriptor.interfaces {
                if let Err(source) = handle.claim_interface(interface) {
                    for &iface in &claimed {
                        let _ = handle.release_interface(iface);
                    }
                    return Err(UsbError::ClaimInterface { interface, source });
                }
                claimed.push(interface);
            }
            info!("Claimed interfaces {:?}", claimed);

            return Ok(Self {
                handle: Arc::new(handle),
                descriptor,
                claimed,
            });
        }

        Err(UsbError::DeviceNotFound)
    }

    pub fn descriptor(&self) -> &'static DeviceDescriptor {
        self.descriptor
    }

    /// Start the transfer threads.
    ///
    /// `bridge` moves to the dispatcher thread and is probed for automap mode
    /// once the readers are running. Outbound transfers from every sink end up
    /// on `outbound`.
    pub fn start<S>(
        &self,
        bridge: Bridge<S>,
        outbound: Receiver<OutboundTransfer>,
        options: TransportOptions,
    ) -> Result<UsbTransport, UsbError>
    where
        S: OutboundSink + Send + 'static,
    {
        let transport = UsbTransport::launch(|running, threads| {
            let (inbound_tx, inbound_rx) = unbounded::<InboundTransfer>();

            let mut inbound = Vec::new();
            if let Some(controller) = self.descriptor.controller {
                inbound.push((Channel::Controller, controller.inbound));
            }
            inbound.push((Channel::Midi, self.descriptor.midi.inbound));

            for (channel, endpoint) in inbound {
                let reader = Reader {
                    handle: self.handle.clone(),
                    channel,
                    endpoint,
                    length: self.descriptor.read_length(channel),
                    options,
                    running: running.clone(),
                    tx: inbound_tx.clone(),
                };
                threads.push(spawn(&format!("usb-{}-in", channel.name()), move || reader.run())?);
            }
            drop(inbound_tx);

            let dispatch_running = running.clone();
            threads.push(spawn("usb-dispatch", move || {
                dispatch(bridge, inbound_rx, dispatch_running)
            })?);

            // Spawned last: it only exits once every outbound sender is gone
            let writer = Writer {
                handle: self.handle.clone(),
                descriptor: self.descriptor,
                options,
            };
            threads.push(spawn("usb-out", move || writer.run(outbound))?);

            Ok(())
        })?;

        info!("USB transfer threads started");
        Ok(transport)
    }
}

impl Drop for UsbDevice {
    fn drop(&mut self) {
        match Arc::get_mut(&mut self.handle) {
            Some(handle) => {
                for &interface in &self.claimed {
                    if let Err(e) = handle.release_interface(interface) {
                        warn!("Failed to release interface {}: {}", interface, e);
                    }
                }
                info!("Released interfaces {:?}", self.claimed);
            }
            None => warn!("USB handle still shared, interfaces released on close"),
        }
    }
}

fn spawn<F>(name: &str, f: F) -> Result<JoinHandle<()>, UsbError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|source| UsbError::Spawn {
            name: name.to_string(),
            source,
        })
}

/// Running transfer threads
pub struct UsbTransport {
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl UsbTransport {
    /// Run `spawn_all`, stopping whatever it already started if it fails
    fn launch<F>(spawn_all: F) -> Result<Self, UsbError>
    where
        F: FnOnce(&Arc<AtomicBool>, &mut Vec<JoinHandle<()>>) -> Result<(), UsbError>,
    {
        let running = Arc::new(AtomicBool::new(true));
        let mut threads = Vec::new();
        let result = spawn_all(&running, &mut threads);
        let transport = Self { running, threads };

        match result {
            Ok(()) => Ok(transport),
            Err(e) => {
                error!("USB transport failed to start: {}", e);
                transport.stop();
                Err(e)
            }
        }
    }

    /// False once shutdown was requested or the device went away
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop the readers and wait for every thread.
    ///
    /// The writer only exits after all outbound senders are dropped, so the
    /// JACK client has to be closed first.
    pub fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        for handle in self.threads {
            let name = handle.thread().name().unwrap_or("usb").to_string();
            if handle.join().is_err() {
                error!("{} thread panicked", name);
            }
        }
        info!("USB transfer threads stopped");
    }
}

struct Reader {
    handle: Arc<DeviceHandle<Context>>,
    channel: Channel,
    endpoint: u8,
    length: usize,
    options: TransportOptions,
    running: Arc<AtomicBool>,
    tx: Sender<InboundTransfer>,
}

impl Reader {
    fn run(self) {
        let mut buf = vec![0u8; self.length];
        debug!("Reading {} from ep 0x{:02X}", self.channel.name(), self.endpoint);

        while self.running.load(Ordering::Relaxed) {
            match self.handle.read_interrupt(self.endpoint, &mut buf, self.options.read_timeout) {
                Ok(0) => {}
                Ok(n) => {
                    let timestamp = Instant::now();
                    if self.options.dump_transfers {
                        debug!("{}", format_transfer("IN ", self.endpoint, &buf[..n]));
                    }
                    let transfer = InboundTransfer {
                        channel: self.channel,
                        data: buf[..n].to_vec(),
                        timestamp,
                    };
                    if self.tx.send(transfer).is_err() {
                        break;
                    }
                }
                Err(rusb::Error::Timeout) | Err(rusb::Error::Interrupted) => {}
                Err(rusb::Error::NoDevice) => {
                    error!("Device disconnected");
                    self.running.store(false, Ordering::Relaxed);
                    break;
                }
                Err(e) => {
                    warn!("{} read failed: {}", self.channel.name(), e);
                    thread::sleep(READ_ERROR_BACKOFF);
                }
            }
        }
    }
}

struct Writer {
    handle: Arc<DeviceHandle<Context>>,
    descriptor: &'static DeviceDescriptor,
    options: TransportOptions,
}

impl Writer {
    fn run(self, rx: Receiver<OutboundTransfer>) {
        for transfer in rx.iter() {
            let Some(endpoint) = self.descriptor.outbound_endpoint(transfer.channel) else {
                warn!("{} has no {} endpoint", self.descriptor.name, transfer.channel.name());
                continue;
            };

            if self.options.dump_transfers {
                debug!("{}", format_transfer("OUT", endpoint, &transfer.bytes));
            }

            match self.handle.write_interrupt(endpoint, &transfer.bytes, WRITE_TIMEOUT) {
                Ok(n) if n < transfer.bytes.len() => {
                    warn!("Short write on ep 0x{:02X}: {} of {} bytes", endpoint, n, transfer.bytes.len())
                }
                Ok(_) => {}
                Err(e) => warn!("Write to ep 0x{:02X} failed: {}", endpoint, e),
            }
        }
    }
}

/// The I/O context: every inbound transfer is handled here, one at a time
fn dispatch<S: OutboundSink>(
    mut bridge: Bridge<S>,
    rx: Receiver<InboundTransfer>,
    running: Arc<AtomicBool>,
) {
    bridge.start();

    for transfer in rx.iter() {
        bridge.deliver(transfer.channel, &transfer.data, transfer.timestamp);
    }

    let stats = bridge.stats();
    info!(
        "{} dispatcher done: {} messages, {} framing errors",
        bridge.device().name,
        stats.completed,
        stats.framing_errors
    );
    running.store(false, Ordering::Relaxed);
}
