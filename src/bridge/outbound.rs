//! Outbound path: JACK input events and protocol replies to USB transfers

use crossbeam::channel::{Sender, TrySendError};
use tracing::warn;

use crate::device::Channel;

/// One outbound interrupt transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundTransfer {
    /// Channel whose outbound endpoint receives the bytes
    pub channel: Channel,
    pub bytes: Vec<u8>,
}

/// Fire-and-forget submission of outbound transfers.
///
/// The buffer is owned by the transfer from here on and released once the
/// write completes, successfully or not.
pub trait OutboundSink {
    fn submit(&self, channel: Channel, bytes: Vec<u8>);
}

impl OutboundSink for Sender<OutboundTransfer> {
    fn submit(&self, channel: Channel, bytes: Vec<u8>) {
        match self.try_send(OutboundTransfer { channel, bytes }) {
            Ok(()) => {}
            Err(TrySendError::Full(t)) => {
                warn!("Outbound queue full, dropping {} bytes for {}", t.bytes.len(), channel.name())
            }
            Err(TrySendError::Disconnected(t)) => {
                warn!("USB writer gone, dropping {} bytes for {}", t.bytes.len(), channel.name())
            }
        }
    }
}

/// Forward every event observed on a JACK input port this cycle.
///
/// One transfer per event, in port order. Returns the number submitted.
pub fn forward_events<'a>(
    channel: Channel,
    events: impl IntoIterator<Item = &'a [u8]>,
    sink: &impl OutboundSink,
) -> usize {
    let mut submitted = 0;
    for bytes in events {
        if bytes.is_empty() {
            continue;
        }
        sink.submit(channel, bytes.to_vec());
        submitted += 1;
    }
    submitted
}

/// Sink that records submissions
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    transfers: parking_lot::Mutex<Vec<OutboundTransfer>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything submitted so far
    pub fn take(&self) -> Vec<OutboundTransfer> {
        std::mem::take(&mut *self.transfers.lock())
    }
}

#[cfg(test)]
impl OutboundSink for RecordingSink {
    fn submit(&self, channel: Channel, bytes: Vec<u8>) {
        self.transfers.lock().push(OutboundTransfer { channel, bytes });
    }
}
