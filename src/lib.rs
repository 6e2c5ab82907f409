//! `dcp-bus` library: a bit-banged, multi-drop, single-wire bus driver for
//! `no_std` targets. The crate exposes the infrastructure modules (pulse
//! codec, timing profiles), the protocol logic (frame format, transport,
//! arbitration) and a diagnostic engine that characterizes a physical bus.
#![no_std]
//==================================================================================
/// Byte buffer shared by the ISR, the frame codec and the queues.
pub mod core;
/// Configuration, frame, capture and probe errors.
pub mod error;
/// Pulse-width bit codec and timing profiles.
pub mod infra;
/// Frame format, transport paths, bus arbitration and diagnostics.
pub mod protocol;
//==================================================================================
