//! Cycle scheduler
//!
//! Maps the arrival time of each queued message to a frame offset inside the
//! current JACK cycle. Messages that arrived during the previous cycle land
//! at the proportional position, offsets strictly increase within a cycle and
//! never pass the last frame.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

use super::queue::{ChannelQueue, Message};
use crate::midi::format_hex;

/// Initial capacity of the cycle-local buffer
const SCRATCH_CAPACITY: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WriteError {
    #[error("no space for {len} bytes at frame {frame}")]
    NoSpace { frame: u32, len: usize },

    #[error("event writer rejected event: {0}")]
    Rejected(String),
}

/// Destination buffer of one cycle
pub trait EventWriter {
    fn write_event(&mut self, frame: u32, bytes: &[u8]) -> Result<(), WriteError>;
}

/// Collecting writer, handy for tests and tooling
impl EventWriter for Vec<(u32, Vec<u8>)> {
    fn write_event(&mut self, frame: u32, bytes: &[u8]) -> Result<(), WriteError> {
        self.push((frame, bytes.to_vec()));
        Ok(())
    }
}

/// Timing of the cycle preceding the one being filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleWindow {
    pub start: Instant,
    pub duration: Duration,
}

/// Tracks cycle start times across process callbacks
#[derive(Debug, Default)]
pub struct CycleClock {
    last_start: Option<Instant>,
}

impl CycleClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a new cycle and return the window of the previous one.
    ///
    /// `None` on the first cycle and whenever the clock did not advance.
    pub fn begin_cycle(&mut self, now: Instant) -> Option<CycleWindow> {
        let previous = self.last_start.replace(now)?;
        let duration = now.checked_duration_since(previous)?;
        if duration.is_zero() {
            return None;
        }
        Some(CycleWindow { start: previous, duration })
    }
}

/// Outcome of draining one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub delivered: usize,
    pub dropped: usize,
    /// Queue was locked by the producer; nothing drained this cycle
    pub deferred: bool,
}

/// Frame offset for a message that arrived `elapsed` after the previous cycle start
pub fn frame_offset(elapsed: Duration, window: Duration, frames: u32) -> u64 {
    let window_ns = window.as_nanos();
    if window_ns == 0 {
        return 0;
    }
    let frame = elapsed.as_nanos() * frames as u128 / window_ns;
    u64::try_from(frame).unwrap_or(u64::MAX)
}

/// Drains channel queues into a cycle's event buffer.
///
/// Queued messages are swapped into a local buffer under the queue lock and
/// written after the lock is released. The local buffer keeps its capacity
/// across cycles.
#[derive(Debug)]
pub struct QueueScheduler {
    pending: VecDeque<Message>,
}

impl Default for QueueScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueScheduler {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::with_capacity(SCRATCH_CAPACITY),
        }
    }

    /// Drain `queue` into `writer` for a cycle of `frames` frames
    pub fn run(
        &mut self,
        queue: &ChannelQueue,
        window: &CycleWindow,
        frames: u32,
        writer: &mut impl EventWriter,
    ) -> ScheduleReport {
        let mut report = ScheduleReport::default();
        if frames == 0 {
            return report;
        }

        if !queue.try_swap(&mut self.pending) {
            report.deferred = true;
            return report;
        }

        let last_frame = (frames - 1) as u64;
        let mut last_emitted: Option<u64> = None;

        while let Some(message) = self.pending.pop_front() {
            let elapsed = message.timestamp.saturating_duration_since(window.start);
            let mut frame = frame_offset(elapsed, window.duration, frames);

            if let Some(last) = last_emitted {
                if frame <= last {
                    frame = last + 1;
                }
            }
            let frame = frame.min(last_frame);

            match writer.write_event(frame as u32, &message.bytes) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Dropping [{}] at frame {}: {}", format_hex(&message.bytes), frame, e);
                    report.dropped += 1;
                }
            }
            last_emitted = Some(frame);
        }

        report
    }
}
