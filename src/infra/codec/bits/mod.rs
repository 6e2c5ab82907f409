//! Pulse-width bit codec. A bit is a release of the line lasting one unit for
//! a 0 and two units for a 1, followed by a guard phase during which the
//! sender drives the line low.
//!
//! Every routine here busy-waits on the cycle counter; none of them allocates
//! and every wait has a ceiling.
use crate::error::BitFault;
use crate::infra::timing::{CycleWindow, TxDelays};
use crate::protocol::transport::{
    traits::{bus_line::BusLine, cycle_clock::CycleClock},
    BusIo, BIT_HIGH_CEILING_WINDOWS, BIT_LOW_CEILING_WINDOWS,
};

/// Line level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Level {
    Low,
    High,
}

/// Run `f` with interrupts masked.
#[inline]
pub fn exclusive<R>(f: impl FnOnce() -> R) -> R {
    critical_section::with(|_| f())
}

/// Measure how long the line stays at `level`.
///
/// Returns `Ok(elapsed)` as soon as the level changes, `Err(elapsed)` once
/// `limit` cycles have passed without a change.
pub fn hold_time<L: BusLine, C: CycleClock>(
    io: &mut BusIo<L, C>,
    level: Level,
    limit: u32,
) -> Result<u32, u32> {
    let start = io.clock.cycles();
    loop {
        let elapsed = io.clock.cycles().wrapping_sub(start);
        let current = if io.line.is_high() {
            Level::High
        } else {
            Level::Low
        };
        if current != level {
            return Ok(elapsed);
        }
        if elapsed > limit {
            return Err(elapsed);
        }
    }
}

//==================================================================================BIT_CODEC
/// Encoder/decoder for single pulses, parameterized by the active profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BitCodec {
    window: CycleWindow,
    delays: TxDelays,
}

impl BitCodec {
    pub fn new(window: CycleWindow, delays: TxDelays) -> Self {
        Self { window, delays }
    }

    #[inline]
    pub fn window(&self) -> CycleWindow {
        self.window
    }

    #[inline]
    pub fn delays(&self) -> TxDelays {
        self.delays
    }

    /// Same codec with different transmit delays.
    pub fn with_delays(&self, delays: TxDelays) -> Self {
        Self {
            window: self.window,
            delays,
        }
    }

    /// Classify a measured high phase. A pulse of exactly `window.max` is a 0.
    #[inline]
    pub fn classify(&self, high_cycles: u32) -> bool {
        high_cycles > self.window.max
    }

    /// Wait for the current low phase (guard or bit-sync low) to end.
    pub fn wait_low_end<L: BusLine, C: CycleClock>(
        &self,
        io: &mut BusIo<L, C>,
    ) -> Result<u32, BitFault> {
        hold_time(
            io,
            Level::Low,
            self.window.max_times(BIT_LOW_CEILING_WINDOWS),
        )
        .map_err(|elapsed| BitFault::StuckLow { elapsed })
    }

    /// Measure the high phase that carries the bit value.
    pub fn measure_high<L: BusLine, C: CycleClock>(
        &self,
        io: &mut BusIo<L, C>,
    ) -> Result<u32, BitFault> {
        hold_time(
            io,
            Level::High,
            self.window.max_times(BIT_HIGH_CEILING_WINDOWS),
        )
        .map_err(|elapsed| BitFault::StuckHigh { elapsed })
    }

    /// Decode one bit: wait for the low phase to end, then time the high phase.
    pub fn sample_bit<L: BusLine, C: CycleClock>(
        &self,
        io: &mut BusIo<L, C>,
    ) -> Result<bool, BitFault> {
        self.wait_low_end(io)?;
        let high = self.measure_high(io)?;
        Ok(self.classify(high))
    }

    /// Decode eight bits, most significant first.
    pub fn sample_byte<L: BusLine, C: CycleClock>(
        &self,
        io: &mut BusIo<L, C>,
    ) -> Result<u8, BitFault> {
        let mut byte = 0u8;
        for _ in 0..8 {
            byte = (byte << 1) | self.sample_bit(io)? as u8;
        }
        Ok(byte)
    }

    /// Drive one bit. Returns `true` when another transmitter was detected.
    ///
    /// The line is released for the bit's duration; a low level at the end
    /// means someone sent a shorter (dominant) pulse. After the guard the
    /// line is released again and must rise, otherwise another sender is
    /// still holding it.
    pub fn drive_bit<L: BusLine, C: CycleClock>(&self, io: &mut BusIo<L, C>, bit: bool) -> bool {
        let high = if bit {
            self.delays.bit1
        } else {
            self.delays.bit0
        };

        io.line.release();
        io.clock.delay_cycles(high);
        if io.line.is_low() {
            return true;
        }

        io.line.drive_low();
        io.clock.delay_cycles(self.delays.bit_low());
        io.line.release();
        io.line.is_low()
    }
}
