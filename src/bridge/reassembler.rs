//! Byte-stream reassembler
//!
//! USB interrupt transfers cut the MIDI stream at arbitrary points. The
//! reassembler keeps the in-progress message of one channel across transfers
//! and hands out complete messages stamped with the arrival time of the
//! transfer that completed them.

use std::time::Instant;
use tracing::{debug, trace, warn};

use super::queue::Message;
use crate::device::Channel;
use crate::midi::{format_hex, message_length, MessageLength, SYSEX_END};

/// Partial-message accumulator for one channel
#[derive(Debug)]
pub struct Reassembler {
    channel: Channel,
    partial: Vec<u8>,
    completed: u64,
    framing_errors: u64,
}

impl Reassembler {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            partial: Vec::with_capacity(16),
            completed: 0,
            framing_errors: 0,
        }
    }

    /// Consume one transfer, calling `complete` for every message it finishes
    pub fn feed(&mut self, data: &[u8], timestamp: Instant, mut complete: impl FnMut(Message)) {
        let mut cursor = 0;

        while cursor < data.len() {
            // The status byte of a message in progress is never overwritten
            let status = self.partial.first().copied().unwrap_or(data[cursor]);

            match message_length(status) {
                MessageLength::Fixed(expected) => {
                    let have = self.partial.len();

                    if have > expected {
                        warn!(
                            "{} framing error: {} bytes accumulated for a {}-byte message [{}]",
                            self.channel.name(),
                            have,
                            expected,
                            format_hex(&self.partial)
                        );
                        self.framing_errors += 1;
                        self.partial.clear();
                        continue;
                    }

                    let remaining = expected - have;
                    if remaining == 0 {
                        // Complete but never submitted: submit it and start over at the same cursor
                        self.submit(timestamp, &mut complete);
                        continue;
                    }

                    let take = remaining.min(data.len() - cursor);
                    self.partial.extend_from_slice(&data[cursor..cursor + take]);
                    cursor += take;

                    if self.partial.len() == expected {
                        self.submit(timestamp, &mut complete);
                    }
                }
                MessageLength::SysEx => {
                    let rest = &data[cursor..];
                    match rest.iter().position(|&b| b == SYSEX_END) {
                        Some(end) => {
                            self.partial.extend_from_slice(&rest[..=end]);
                            cursor += end + 1;
                            self.submit(timestamp, &mut complete);
                        }
                        None => {
                            self.partial.extend_from_slice(rest);
                            cursor = data.len();
                        }
                    }
                }
            }
        }

        if !self.partial.is_empty() {
            trace!("{} pending message: {} bytes", self.channel.name(), self.partial.len());
        }
    }

    fn submit(&mut self, timestamp: Instant, complete: &mut impl FnMut(Message)) {
        let bytes = std::mem::take(&mut self.partial);
        self.completed += 1;
        complete(Message::new(bytes, timestamp));
    }

    /// Discard the message in progress
    pub fn reset(&mut self) {
        if !self.partial.is_empty() {
            debug!(
                "{} discarding partial message [{}]",
                self.channel.name(),
                format_hex(&self.partial)
            );
            self.partial.clear();
        }
    }

    /// Bytes of the message currently in progress
    pub fn pending(&self) -> &[u8] {
        &self.partial
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn framing_errors(&self) -> u64 {
        self.framing_errors
    }
}
