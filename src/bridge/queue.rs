//! Timestamped message queue shared between the USB dispatcher and the JACK cycle

use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// A complete message stamped with the completion time of its USB transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub bytes: Vec<u8>,
    pub timestamp: Instant,
}

impl Message {
    pub fn new(bytes: Vec<u8>, timestamp: Instant) -> Self {
        Self { bytes, timestamp }
    }
}

/// FIFO of messages for one channel
///
/// The producer pushes with a blocking lock held only for the push. The
/// real-time consumer swaps the contents out with [`ChannelQueue::try_swap`]
/// and skips the drain when the lock is contended.
#[derive(Debug, Clone, Default)]
pub struct ChannelQueue {
    inner: Arc<Mutex<VecDeque<Message>>>,
}

impl ChannelQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: Message) {
        self.inner.lock().push_back(message);
    }

    /// Non-blocking acquisition for the audio thread
    pub fn try_lock(&self) -> Option<MutexGuard<'_, VecDeque<Message>>> {
        self.inner.try_lock()
    }

    /// Exchange the queued messages with `buffer` without blocking.
    ///
    /// The lock is held for the swap only. False when contended.
    pub fn try_swap(&self, buffer: &mut VecDeque<Message>) -> bool {
        match self.try_lock() {
            Some(mut queued) => {
                std::mem::swap(&mut *queued, buffer);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return everything currently queued
    #[cfg(test)]
    pub fn drain(&self) -> Vec<Message> {
        self.inner.lock().drain(..).collect()
    }
}
