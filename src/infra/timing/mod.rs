//! Timing profiles: speed grades, the cycle window used to tell short pulses
//! from long ones, and the transmit delays derived from them.
//!
//! Every duration is computed in integer nanoseconds, then converted to CPU
//! cycles with `ns * cpu_mhz / 1000`. Integer math keeps the windows identical
//! on every target regardless of floating-point support.
use crate::error::TimingError;

/// Tolerance applied on each side of the unit duration, in percent.
pub const TOLERANCE_PERCENT: u32 = 2;
/// Guard cycles appended to every bit's low phase.
pub const GUARD_CYCLES: u32 = 150;
/// SYNC length in units for a controller.
pub const SYNC_UNITS_CONTROLLER: u32 = 25;
/// SYNC length in units for any other node.
pub const SYNC_UNITS_NODE: u32 = 50;
/// Length of each bit-sync phase in units.
pub const BIT_SYNC_UNITS: u32 = 8;

//==================================================================================SPEED_GRADE
/// Bus speed grades. Exactly one is active on a bus at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpeedGrade {
    /// 20 µs unit.
    Slow,
    /// 4 µs unit.
    Fast1,
    /// 2.5 µs unit.
    Fast2,
    /// 1.25 µs unit.
    Ultra,
}

impl SpeedGrade {
    pub const ALL: [SpeedGrade; 4] = [
        SpeedGrade::Slow,
        SpeedGrade::Fast1,
        SpeedGrade::Fast2,
        SpeedGrade::Ultra,
    ];

    /// Unit duration in nanoseconds.
    pub const fn delta_ns(self) -> u32 {
        match self {
            SpeedGrade::Slow => 20_000,
            SpeedGrade::Fast1 => 4_000,
            SpeedGrade::Fast2 => 2_500,
            SpeedGrade::Ultra => 1_250,
        }
    }

    /// Row of this grade inside a [`SkewTable`].
    pub const fn index(self) -> usize {
        match self {
            SpeedGrade::Slow => 0,
            SpeedGrade::Fast1 => 1,
            SpeedGrade::Fast2 => 2,
            SpeedGrade::Ultra => 3,
        }
    }

    /// Infer the grade a device actually transmits at from its mean bit-0 width.
    ///
    /// Widths at or above 23 µs match no grade and yield `None`.
    pub fn from_bit0_us(width_us: f32) -> Option<Self> {
        if width_us < 2.0 {
            Some(SpeedGrade::Ultra)
        } else if width_us < 3.0 {
            Some(SpeedGrade::Fast2)
        } else if width_us < 6.0 {
            Some(SpeedGrade::Fast1)
        } else if width_us < 23.0 {
            Some(SpeedGrade::Slow)
        } else {
            None
        }
    }
}

//==================================================================================SKEW_TABLE
/// Fixed latency compensation per grade, in microseconds.
///
/// The bit-sync phases have no column of their own: they are eight
/// compensated bit-0 pulses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Skew {
    pub listening: u16,
    pub sync: u16,
    pub bit0: u16,
    pub bit1: u16,
}

impl Skew {
    pub const ZERO: Skew = Skew::new(0, 0, 0, 0);

    pub const fn new(listening: u16, sync: u16, bit0: u16, bit1: u16) -> Self {
        Self {
            listening,
            sync,
            bit0,
            bit1,
        }
    }
}

/// One [`Skew`] row per [`SpeedGrade`], indexed by [`SpeedGrade::index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SkewTable(pub [Skew; 4]);

impl SkewTable {
    /// No compensation.
    pub const NONE: SkewTable = SkewTable([Skew::ZERO; 4]);

    /// Latencies measured on an ESP32-C3 running the driver from flash.
    pub const ESP32C3: SkewTable = SkewTable([
        Skew::new(0, 20, 4, 4),
        Skew::new(0, 25, 2, 1),
        Skew::new(0, 20, 2, 2),
        Skew::new(0, 20, 1, 0),
    ]);

    pub fn for_grade(&self, speed: SpeedGrade) -> Skew {
        self.0[speed.index()]
    }
}

impl Default for SkewTable {
    fn default() -> Self {
        Self::NONE
    }
}

//==================================================================================WINDOW
/// Cycle bounds of one unit: `(delta ∓ tolerance) × cpu_MHz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CycleWindow {
    pub min: u32,
    pub max: u32,
}

impl CycleWindow {
    /// `units` whole windows, measured against `max`.
    #[inline]
    pub fn max_times(&self, units: u32) -> u32 {
        self.max.saturating_mul(units)
    }

    /// `units` whole windows, measured against `min`.
    #[inline]
    pub fn min_times(&self, units: u32) -> u32 {
        self.min.saturating_mul(units)
    }
}

/// Cycle counts used by the transmit path. Fields are public so
/// diagnostics can craft out-of-range waveforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxDelays {
    /// Address-weighted wait before claiming the line.
    pub backoff: u32,
    /// SYNC low phase.
    pub sync: u32,
    /// Each of the two bit-sync phases: eight compensated bit-0 pulses.
    pub bit_sync: u32,
    /// High phase of a 0.
    pub bit0: u32,
    /// High phase of a 1.
    pub bit1: u32,
    /// Extra low cycles after every bit.
    pub guard: u32,
}

impl TxDelays {
    /// Low phase that follows every bit.
    #[inline]
    pub fn bit_low(&self) -> u32 {
        self.bit1.saturating_add(self.guard)
    }

    /// Same delays with both bit pulses shortened by `lead` cycles.
    pub fn shortened(&self, lead: u32) -> Self {
        Self {
            bit0: self.bit0.saturating_sub(lead),
            bit1: self.bit1.saturating_sub(lead),
            ..*self
        }
    }
}

//==================================================================================PROFILE
/// Immutable timing context selected once at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimingProfile {
    speed: SpeedGrade,
    cpu_mhz: u32,
    window: CycleWindow,
}

impl TimingProfile {
    /// Derive the window for `speed` on a CPU clocked at `cpu_mhz`.
    ///
    /// Fails when the clock cannot separate the bounds (`min == 0` or `min >= max`).
    pub fn new(speed: SpeedGrade, cpu_mhz: u32) -> Result<Self, TimingError> {
        let delta = speed.delta_ns();
        let margin = delta * TOLERANCE_PERCENT / 100;
        let window = CycleWindow {
            min: ns_to_cycles(delta - margin, cpu_mhz),
            max: ns_to_cycles(delta + margin, cpu_mhz),
        };

        if window.min == 0 || window.min >= window.max {
            return Err(TimingError::ClockTooSlow { cpu_mhz });
        }

        Ok(Self {
            speed,
            cpu_mhz,
            window,
        })
    }

    #[inline]
    pub fn speed(&self) -> SpeedGrade {
        self.speed
    }

    #[inline]
    pub fn cpu_mhz(&self) -> u32 {
        self.cpu_mhz
    }

    #[inline]
    pub fn window(&self) -> CycleWindow {
        self.window
    }

    /// Convert a cycle count into microseconds.
    #[inline]
    pub fn cycles_to_us(&self, cycles: u32) -> f32 {
        cycles as f32 / self.cpu_mhz as f32
    }

    /// Convert microseconds into cycles.
    #[inline]
    pub fn us_to_cycles(&self, micros: u32) -> u32 {
        self.ns_to_cycles(micros.saturating_mul(1000))
    }

    /// Convert nanoseconds into cycles.
    #[inline]
    pub fn ns_to_cycles(&self, nanos: u32) -> u32 {
        ns_to_cycles(nanos, self.cpu_mhz)
    }

    /// Transmit delays for a node at `address`.
    pub fn tx_delays(&self, address: u8, controller: bool, skew: &SkewTable) -> TxDelays {
        let delta = self.speed.delta_ns();
        let skew = skew.for_grade(self.speed);
        let sync_units = if controller {
            SYNC_UNITS_CONTROLLER
        } else {
            SYNC_UNITS_NODE
        };

        let backoff = (address as u32 + 6) * delta / 4;
        let cycles = |ns: u32, skew_us: u16| {
            ns_to_cycles(ns.saturating_sub(skew_us as u32 * 1000), self.cpu_mhz)
        };

        let bit0 = cycles(delta, skew.bit0);

        TxDelays {
            backoff: cycles(backoff, skew.listening),
            sync: cycles(sync_units * delta, skew.sync),
            bit_sync: bit0.saturating_mul(BIT_SYNC_UNITS),
            bit0,
            bit1: cycles(2 * delta, skew.bit1),
            guard: GUARD_CYCLES,
        }
    }
}

#[inline]
fn ns_to_cycles(ns: u32, cpu_mhz: u32) -> u32 {
    let cycles = ns as u64 * cpu_mhz as u64 / 1000;
    cycles.min(u32::MAX as u64) as u32
}
