//! Mirror targets
//!
//! The surface sends stateless toggle presses; a mirror target receives the
//! resulting absolute mute/record/transport/gain state. The OSC target speaks
//! Ardour's OSC control-surface dialect over UDP.

use rosc::{OscMessage, OscPacket, OscType};
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Ardour's route id for the master bus
pub const MASTER_BUS_ROUTE: i32 = 318;

/// State change mirrored to the external target
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorCommand {
    Mute { route: i32, on: bool },
    RecEnable { route: i32, on: bool },
    /// Absolute gain, 0.0 to 2.0
    Gain { route: i32, gain: f32 },
    TransportStop,
    TransportPlay,
    LoopToggle,
    RecEnableToggle,
}

impl MirrorCommand {
    /// OSC address for the command
    pub fn address(&self) -> &'static str {
        match self {
            MirrorCommand::Mute { .. } => "/ardour/routes/mute",
            MirrorCommand::RecEnable { .. } => "/ardour/routes/recenable",
            MirrorCommand::Gain { .. } => "/ardour/routes/gainabs",
            MirrorCommand::TransportStop => "/ardour/transport_stop",
            MirrorCommand::TransportPlay => "/ardour/transport_play",
            MirrorCommand::LoopToggle => "/ardour/loop_toggle",
            MirrorCommand::RecEnableToggle => "/ardour/rec_enable_toggle",
        }
    }

    /// OSC arguments for the command
    pub fn args(&self) -> Vec<OscType> {
        match *self {
            MirrorCommand::Mute { route, on } | MirrorCommand::RecEnable { route, on } => {
                vec![OscType::Int(route), OscType::Int(on as i32)]
            }
            MirrorCommand::Gain { route, gain } => vec![OscType::Int(route), OscType::Float(gain)],
            _ => Vec::new(),
        }
    }

    pub fn to_packet(&self) -> OscPacket {
        OscPacket::Message(OscMessage {
            addr: self.address().to_string(),
            args: self.args(),
        })
    }
}

/// Receiver of mirrored state; best effort, never blocks the caller for long
pub trait MirrorTarget: Send + Sync {
    fn send(&self, command: MirrorCommand);
}

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("failed to resolve OSC target '{0}'")]
    Resolve(String),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OSC encoding failed: {0:?}")]
    Encode(rosc::OscError),
}

/// OSC over UDP
pub struct OscMirror {
    socket: UdpSocket,
    target: std::net::SocketAddr,
}

impl OscMirror {
    /// Bind an ephemeral local socket and resolve `address` ("host:port")
    pub fn connect(address: &str) -> Result<Self, MirrorError> {
        let target = address
            .to_socket_addrs()
            .map_err(|_| MirrorError::Resolve(address.to_string()))?
            .next()
            .ok_or_else(|| MirrorError::Resolve(address.to_string()))?;

        let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind)?;
        socket.set_nonblocking(true)?;

        info!("OSC mirror target: osc.udp://{}", target);
        Ok(Self { socket, target })
    }

    pub fn try_send(&self, command: &MirrorCommand) -> Result<(), MirrorError> {
        let buf = rosc::encoder::encode(&command.to_packet()).map_err(MirrorError::Encode)?;
        self.socket.send_to(&buf, self.target)?;
        Ok(())
    }
}

impl MirrorTarget for OscMirror {
    fn send(&self, command: MirrorCommand) {
        debug!("OSC {} {:?}", command.address(), command.args());
        if let Err(e) = self.try_send(&command) {
            warn!("Failed to send {} to mirror target: {}", command.address(), e);
        }
    }
}

impl<T: MirrorTarget + ?Sized> MirrorTarget for Arc<T> {
    fn send(&self, command: MirrorCommand) {
        (**self).send(command)
    }
}

/// Records commands instead of sending them
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingMirror {
    commands: parking_lot::Mutex<Vec<MirrorCommand>>,
}

#[cfg(test)]
impl RecordingMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<MirrorCommand> {
        std::mem::take(&mut *self.commands.lock())
    }
}

#[cfg(test)]
impl MirrorTarget for RecordingMirror {
    fn send(&self, command: MirrorCommand) {
        self.commands.lock().push(command);
    }
}
