//! nova-bridge - Novation UltraNova/MiniNova to JACK MIDI bridge
//!
//! Reads the synthesizer's USB interrupt endpoints, reframes the byte streams
//! into MIDI messages and delivers them sample-accurately on JACK MIDI ports.
//! Events arriving on the JACK input ports go back out as USB transfers.

pub mod audio;
pub mod bridge;
pub mod config;
pub mod device;
pub mod midi;
pub mod mirror;
pub mod usb;
