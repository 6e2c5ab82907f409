//! Transport layer: platform traits, the interrupt-driven reception path and
//! the pulse-width transmission path.
//!
//! ## Reception thresholds
//!
//! All thresholds are expressed in windows of the active timing profile
//! (see [`CycleWindow`](crate::infra::timing::CycleWindow)).

pub mod receiver;
pub mod sender;
pub mod traits;

use traits::{bus_line::BusLine, cycle_clock::CycleClock};

/// Ceiling on the SYNC low phase before the listener gives up (noise abort).
pub const SYNC_LOW_CEILING_WINDOWS: u32 = 100;

/// Bit-sync high phase longer than this many `window.max` is not a frame.
pub const BIT_SYNC_HIGH_CEILING_WINDOWS: u32 = 10;

/// Bit-sync high phase at or below this many `window.min` is chatter.
pub const BIT_SYNC_HIGH_FLOOR_WINDOWS: u32 = 6;

/// Conformance floor of either bit-sync phase, in half `window.min` (7.5 ×).
pub const BIT_SYNC_RANGE_FLOOR_HALF_WINDOWS: u32 = 15;

/// Conformance ceiling of either bit-sync phase, in half `window.max` (8.5 ×).
///
/// A 7.5 × max ceiling would reject every nominal 8-unit pulse, so the
/// ceiling sits half a unit above nominal instead.
pub const BIT_SYNC_RANGE_CEILING_HALF_WINDOWS: u32 = 17;

/// Ceiling on any low phase between bits, in `window.max`.
pub const BIT_LOW_CEILING_WINDOWS: u32 = 10;

/// High phase of a bit times out after this many `window.max`.
pub const BIT_HIGH_CEILING_WINDOWS: u32 = 2;

/// Pin and cycle counter of one device, borrowed together by whoever drives
/// or samples the line.
pub struct BusIo<L, C> {
    pub line: L,
    pub clock: C,
}

impl<L: BusLine, C: CycleClock> BusIo<L, C> {
    pub fn new(line: L, clock: C) -> Self {
        Self { line, clock }
    }

    /// Split back into pin and clock.
    pub fn into_inner(self) -> (L, C) {
        (self.line, self.clock)
    }
}
