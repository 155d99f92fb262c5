//! Scenario tests for the bridge session

use super::*;
use crate::device::{MININOVA, ULTRANOVA};
use crate::mirror::{MirrorCommand, RecordingMirror};
use std::time::Duration;

fn ultranova() -> (Bridge<RecordingSink>, AutomapProtocol, Arc<RecordingMirror>) {
    let protocol = AutomapProtocol::default();
    let mirror = Arc::new(RecordingMirror::new());
    let target: Arc<dyn MirrorTarget> = mirror.clone();
    let bridge = Bridge::new(&ULTRANOVA, protocol.clone(), Some(target), RecordingSink::new());
    (bridge, protocol, mirror)
}

fn listening() -> (Bridge<RecordingSink>, AutomapProtocol, Arc<RecordingMirror>) {
    let (mut bridge, protocol, mirror) = ultranova();
    bridge.deliver(Channel::Controller, &protocol.ack, Instant::now());
    assert!(bridge.is_listening());
    bridge.sink.take();
    (bridge, protocol, mirror)
}

fn drained(queue: &ChannelQueue) -> Vec<Vec<u8>> {
    queue.drain().into_iter().map(|m| m.bytes).collect()
}

#[test]
fn test_start_requests_automap() {
    let (bridge, protocol, _) = ultranova();
    bridge.start();

    let sent = bridge.sink.take();
    assert_eq!(sent, vec![OutboundTransfer { channel: Channel::Controller, bytes: protocol.ack }]);
    assert_eq!(bridge.handshake_state(), Some(HandshakeState::Startup));
}

#[test]
fn test_full_handshake_via_off() {
    let (mut bridge, protocol, _) = ultranova();
    let now = Instant::now();

    bridge.deliver(Channel::Controller, &protocol.off, now);
    assert_eq!(bridge.handshake_state(), Some(HandshakeState::WaitForAutomap));

    bridge.deliver(Channel::Controller, &protocol.ack, now);
    assert_eq!(bridge.handshake_state(), Some(HandshakeState::Listen));

    let sent: Vec<_> = bridge.sink.take().into_iter().map(|t| t.bytes).collect();
    assert_eq!(sent, vec![protocol.ack.clone(), protocol.greeting.clone()]);

    // Handshake traffic never reaches the queue
    assert!(bridge.queues().controller.unwrap().is_empty());
}

#[test]
fn test_controller_traffic_ignored_until_listening() {
    let (mut bridge, _, _) = ultranova();

    bridge.deliver(Channel::Controller, &[0xB0, 0x10, 0x01], Instant::now());

    assert!(bridge.queues().controller.unwrap().is_empty());
    assert_eq!(bridge.handshake_state(), Some(HandshakeState::Startup));
}

#[test]
fn test_encoder_stream_across_transfers() {
    let (mut bridge, _, mirror) = listening();
    let now = Instant::now();

    bridge.deliver(Channel::Controller, &[0xB0, 0x00], now);
    bridge.deliver(Channel::Controller, &[0x05, 0xB0, 0x00, 0x05, 0xB0], now);
    bridge.deliver(Channel::Controller, &[0x00, 0x7D], now);

    let queue = bridge.queues().controller.unwrap();
    assert_eq!(
        drained(&queue),
        vec![vec![0xB0, 0x10, 5], vec![0xB0, 0x10, 10], vec![0xB0, 0x10, 7]]
    );
    assert_eq!(mirror.take().len(), 3);
}

#[test]
fn test_keyboard_transposed_only_while_listening() {
    let (mut bridge, protocol, _) = ultranova();
    let now = Instant::now();

    bridge.deliver(Channel::Midi, &[0x90, 60, 100], now);

    bridge.deliver(Channel::Controller, &protocol.ack, now);
    bridge.deliver(Channel::Controller, &protocol.button_octave_plus, now);
    assert_eq!(bridge.octave(), 1);
    bridge.deliver(Channel::Midi, &[0x90, 62, 100], now);

    let queues = bridge.queues();
    assert_eq!(drained(&queues.midi), vec![vec![0x90, 60, 100], vec![0x90, 74, 100]]);
}

#[test]
fn test_note_off_follows_note_on_after_octave_change() {
    let (mut bridge, protocol, _) = listening();
    let now = Instant::now();

    bridge.deliver(Channel::Controller, &protocol.button_octave_plus, now);
    bridge.deliver(Channel::Midi, &[0x90, 60, 100], now);
    bridge.deliver(Channel::Controller, &protocol.button_octave_minus, now);
    bridge.deliver(Channel::Controller, &protocol.button_octave_minus, now);
    bridge.deliver(Channel::Midi, &[0x80, 60, 0], now);

    assert_eq!(bridge.octave(), -1);
    assert_eq!(
        drained(&bridge.queues().midi),
        vec![vec![0x90, 72, 100], vec![0x80, 72, 0]]
    );
}

#[test]
fn test_octave_buttons_drive_leds() {
    let (mut bridge, protocol, _) = listening();

    bridge.deliver(Channel::Controller, &protocol.button_octave_minus, Instant::now());

    let sent = bridge.sink.take();
    assert_eq!(
        sent,
        vec![OutboundTransfer {
            channel: Channel::Controller,
            bytes: vec![0xB0, protocol.led_octave_minus, 1],
        }]
    );
}

#[test]
fn test_mute_button_mirrored() {
    let (mut bridge, _, mirror) = listening();
    let now = Instant::now();

    bridge.deliver(Channel::Controller, &[0xB2, 0x00, 0x01], now);
    bridge.deliver(Channel::Controller, &[0xB2, 0x00, 0x00], now);
    bridge.deliver(Channel::Controller, &[0xB2, 0x00, 0x01], now);

    assert_eq!(
        mirror.take(),
        vec![
            MirrorCommand::Mute { route: 1, on: true },
            MirrorCommand::Mute { route: 1, on: false },
        ]
    );
    assert_eq!(
        drained(&bridge.queues().controller.unwrap()),
        vec![vec![0xB2, 0, 127], vec![0xB2, 0, 0], vec![0xB2, 0, 127]]
    );
}

#[test]
fn test_automap_off_returns_to_waiting() {
    let (mut bridge, protocol, _) = listening();

    bridge.deliver(Channel::Controller, &protocol.off, Instant::now());

    assert_eq!(bridge.handshake_state(), Some(HandshakeState::WaitForAutomap));
    assert!(bridge.queues().controller.unwrap().is_empty());
}

#[test]
fn test_partial_surface_message_dropped_by_handshake_traffic() {
    let (mut bridge, protocol, mirror) = listening();
    let now = Instant::now();

    bridge.deliver(Channel::Controller, &[0xB2, 0x05], now);
    bridge.deliver(Channel::Controller, &protocol.off, now);
    bridge.deliver(Channel::Controller, &protocol.ack, now);
    assert!(bridge.is_listening());

    bridge.deliver(Channel::Controller, &[0xB0, 0x12, 0x05], now);

    assert_eq!(
        drained(&bridge.queues().controller.unwrap()),
        vec![vec![0xB0, 0x12, 5]]
    );
    assert_eq!(bridge.controller.reassembler.pending(), &[] as &[u8]);
    assert_eq!(mirror.take(), vec![MirrorCommand::Gain { route: 3, gain: 10.0 / 127.0 }]);
}

#[test]
fn test_note_released_after_leaving_automap() {
    let (mut bridge, protocol, _) = listening();
    let now = Instant::now();

    bridge.deliver(Channel::Controller, &protocol.button_octave_plus, now);
    bridge.deliver(Channel::Midi, &[0x90, 60, 100], now);
    bridge.deliver(Channel::Controller, &protocol.off, now);
    assert_eq!(bridge.handshake_state(), Some(HandshakeState::WaitForAutomap));

    bridge.deliver(Channel::Midi, &[0x80, 60, 0, 0x90, 64, 90], now);

    assert_eq!(
        drained(&bridge.queues().midi),
        vec![vec![0x90, 72, 100], vec![0x80, 72, 0], vec![0x90, 64, 90]]
    );
}

#[test]
fn test_mininova_has_no_controller_channel() {
    let mut bridge = Bridge::new(&MININOVA, AutomapProtocol::default(), None, RecordingSink::new());
    let now = Instant::now();

    bridge.start();
    assert!(bridge.sink.take().is_empty());
    assert_eq!(bridge.handshake_state(), None);

    bridge.deliver(Channel::Controller, &[0xB0, 0x10, 0x01], now);
    bridge.deliver(Channel::Midi, &[0x90, 60, 100, 0xF0, 0x01], now);
    bridge.deliver(Channel::Midi, &[0xF7], now);

    let queues = bridge.queues();
    assert!(queues.controller.is_none());
    assert_eq!(drained(&queues.midi), vec![vec![0x90, 60, 100], vec![0xF0, 0x01, 0xF7]]);
}

#[test]
fn test_stats() {
    let (mut bridge, _, _) = listening();
    let now = Instant::now();

    bridge.deliver(Channel::Midi, &[0x90, 60, 100, 0x80], now);
    bridge.deliver(Channel::Controller, &[0xB2, 0x30, 0x01], now);

    let stats = bridge.stats();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.framing_errors, 0);
    assert_eq!(stats.midi_queued, 1);
    assert_eq!(stats.controller_queued, 1);
}

#[test]
fn test_end_to_end_scheduling() {
    let (mut bridge, _, _) = listening();
    let cycle_start = Instant::now();

    bridge.deliver(Channel::Midi, &[0x90, 60], cycle_start + Duration::from_micros(10));
    bridge.deliver(Channel::Midi, &[100, 0x80, 60, 0], cycle_start + Duration::from_micros(20));
    bridge.deliver(Channel::Midi, &[0xF8], cycle_start + Duration::from_micros(20));

    let window = CycleWindow { start: cycle_start, duration: Duration::from_micros(64) };
    let mut events = Vec::new();
    let report = QueueScheduler::new().run(&bridge.queues().midi, &window, 64, &mut events);

    assert_eq!(report.delivered, 3);
    assert_eq!(
        events,
        vec![(20, vec![0x90, 60, 100]), (21, vec![0x80, 60, 0]), (22, vec![0xF8])]
    );
}
