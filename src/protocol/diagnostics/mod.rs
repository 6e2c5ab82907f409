//! Non-destructive bus characterization built on the pulse codec.
//!
//! The diagnostic listeners replace the production
//! [`FrameListener`](crate::protocol::transport::receiver::FrameListener)
//! while a probe runs; the two never share the edge interrupt. Three probes
//! are available, each bounded by its own ceiling:
//!
//! * [`electrical`]: rise and fall times of the line;
//! * [`conformance`]: raw pulse widths of one frame from the device under
//!   test, classified against its expected profile;
//! * [`forced_yield`]: injection of a highest-priority frame into a running
//!   transmission to check that the device backs off.
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::Duration;
use enumset::{EnumSet, EnumSetType};
use futures_util::{future::select, future::Either, pin_mut};

use crate::core::FrameBytes;
use crate::error::ProbeError;
use crate::infra::timing::{CycleWindow, SpeedGrade, SYNC_UNITS_CONTROLLER, SYNC_UNITS_NODE};
use crate::protocol::arbitration::duration_ms;
use crate::protocol::frame::FrameViolation;
use crate::protocol::transport::{
    traits::bus_timer::BusTimer, BIT_SYNC_RANGE_CEILING_HALF_WINDOWS,
    BIT_SYNC_RANGE_FLOOR_HALF_WINDOWS,
};

pub mod conformance;
pub mod electrical;
pub mod forced_yield;

use electrical::ElectricalReport;
use forced_yield::YieldOutcome;

/// Default ceiling of the conformance and yield probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(10_000);
/// Default ceiling of each electrical edge, in microseconds.
pub const ELECTRICAL_CEILING_US: u32 = 1_000;

//==================================================================================VIOLATIONS
/// Conformance findings. Never fatal; several can be reported at once.
#[derive(EnumSetType, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Violation {
    /// SYNC low phase longer than 100 windows.
    SyncInfinite,
    SyncTooLong,
    SyncTooShort,
    /// Bit-sync high phase longer than 10 windows.
    BitSyncInfinite,
    BitSyncTooLong,
    BitSyncTooShort,
    /// Bit-sync low phase longer than 10 windows.
    BitSyncInvalidLow,
    BitSyncLowOutOfRange,
    /// A data pulse could not be decoded.
    InvalidBit,
    /// Pulses kept coming after the length announced by the tag.
    InvalidSize,
    /// Nothing was transmitted before the probe ceiling.
    NoTransmission,
    /// The probe could not run.
    Internal,
    /// Generic frame without NUL terminator or too short to carry an address.
    InvalidGeneric,
    StructuredHeader,
    StructuredSourceId,
    StructuredDestinationId,
    StructuredPadding,
    StructuredChecksum,
}

impl From<FrameViolation> for Violation {
    fn from(violation: FrameViolation) -> Self {
        match violation {
            FrameViolation::Header => Violation::StructuredHeader,
            FrameViolation::SourceId => Violation::StructuredSourceId,
            FrameViolation::DestinationId => Violation::StructuredDestinationId,
            FrameViolation::Padding => Violation::StructuredPadding,
            FrameViolation::Checksum => Violation::StructuredChecksum,
            FrameViolation::UnterminatedPayload => Violation::InvalidGeneric,
        }
    }
}

/// Map frame-level findings onto conformance violations.
pub fn frame_violations(found: EnumSet<FrameViolation>) -> EnumSet<Violation> {
    found.iter().map(Violation::from).collect()
}

//==================================================================================TIMING
/// Expected mode of the device under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DutProfile {
    pub speed: SpeedGrade,
    pub controller: bool,
}

impl DutProfile {
    /// SYNC length in units for this device.
    pub fn sync_units(&self) -> u32 {
        if self.controller {
            SYNC_UNITS_CONTROLLER
        } else {
            SYNC_UNITS_NODE
        }
    }
}

/// Raw widths of one frame, in cycles. Bit widths are means over the frame,
/// zero when no such bit was seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawTiming {
    pub sync: u32,
    pub bit_sync_high: u32,
    pub bit_sync_low: u32,
    pub bit0: u32,
    pub bit1: u32,
}

/// [`RawTiming`] in microseconds, plus the grade inferred from bit 0.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimingReport {
    pub sync_us: f32,
    pub bit_sync_high_us: f32,
    pub bit_sync_low_us: f32,
    pub bit_sync_us: f32,
    pub bit0_us: f32,
    pub bit1_us: f32,
    pub speed: Option<SpeedGrade>,
}

impl RawTiming {
    pub fn to_report(&self, cpu_mhz: u32) -> TimingReport {
        let us = |cycles: u32| {
            if cpu_mhz == 0 {
                0.0
            } else {
                cycles as f32 / cpu_mhz as f32
            }
        };
        let bit0_us = us(self.bit0);
        TimingReport {
            sync_us: us(self.sync),
            bit_sync_high_us: us(self.bit_sync_high),
            bit_sync_low_us: us(self.bit_sync_low),
            bit_sync_us: us(self.bit_sync_high.saturating_add(self.bit_sync_low)),
            bit0_us,
            bit1_us: us(self.bit1),
            speed: if self.bit0 == 0 {
                None
            } else {
                SpeedGrade::from_bit0_us(bit0_us)
            },
        }
    }
}

/// Range checks of the SYNC and bit-sync phases against the DUT profile.
///
/// SYNC must lie in `[k × min, k × max]` with `k` the DUT's SYNC units; both
/// bit-sync phases must lie in `[7.5 × min, 8.5 × max]`. A zero width means
/// the phase was not measured and is skipped.
pub fn check_preamble(
    raw: &RawTiming,
    window: CycleWindow,
    dut: &DutProfile,
) -> EnumSet<Violation> {
    let mut violations = EnumSet::empty();
    let units = dut.sync_units();

    if raw.sync > window.max_times(units) {
        violations.insert(Violation::SyncTooLong);
    } else if raw.sync < window.min_times(units) {
        violations.insert(Violation::SyncTooShort);
    }

    let (floor, ceiling) = bit_sync_range(window);
    if raw.bit_sync_high > ceiling {
        violations.insert(Violation::BitSyncTooLong);
    } else if raw.bit_sync_high < floor {
        violations.insert(Violation::BitSyncTooShort);
    }

    if raw.bit_sync_low != 0 && !(floor..=ceiling).contains(&raw.bit_sync_low) {
        violations.insert(Violation::BitSyncLowOutOfRange);
    }

    violations
}

/// Accepted bit-sync phase width: `[7.5 × min, 8.5 × max]`.
pub fn bit_sync_range(window: CycleWindow) -> (u32, u32) {
    (
        window.min_times(BIT_SYNC_RANGE_FLOOR_HALF_WINDOWS) / 2,
        window.max_times(BIT_SYNC_RANGE_CEILING_HALF_WINDOWS) / 2,
    )
}

//==================================================================================RESULTS
/// Outcome of one conformance pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConformanceResult {
    pub raw: RawTiming,
    pub timing: TimingReport,
    pub violations: EnumSet<Violation>,
    /// Bytes decoded before the pass ended.
    pub frame: FrameBytes,
}

impl Default for ConformanceResult {
    fn default() -> Self {
        Self {
            raw: RawTiming::default(),
            timing: TimingReport::default(),
            violations: EnumSet::empty(),
            frame: FrameBytes::new(),
        }
    }
}

impl ConformanceResult {
    /// Result reported when the ceiling elapsed without a single edge.
    pub fn no_transmission() -> Self {
        Self {
            violations: EnumSet::only(Violation::NoTransmission),
            ..Self::default()
        }
    }

    pub fn is_conformant(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Wait for the conformance listener to report, at most `timeout`.
pub async fn test_connection<T: BusTimer>(
    results: &Signal<CriticalSectionRawMutex, ConformanceResult>,
    timer: &mut T,
    timeout: Duration,
) -> ConformanceResult {
    let wait = results.wait();
    let delay = timer.delay_ms(duration_ms(timeout));
    pin_mut!(wait);
    pin_mut!(delay);

    match select(wait, delay).await {
        Either::Left((result, _)) => result,
        Either::Right(_) => {
            #[cfg(feature = "defmt")]
            defmt::warn!("No transmission observed before the probe ceiling");
            ConformanceResult::no_transmission()
        }
    }
}

/// Everything the diagnostic engine learned about the bus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiagnosticReport {
    pub timing: TimingReport,
    pub electrical: Result<ElectricalReport, ProbeError>,
    pub violations: EnumSet<Violation>,
    pub yield_outcome: YieldOutcome,
}

impl DiagnosticReport {
    pub fn new(
        conformance: &ConformanceResult,
        electrical: Result<ElectricalReport, ProbeError>,
        yield_outcome: YieldOutcome,
    ) -> Self {
        Self {
            timing: conformance.timing,
            electrical,
            violations: conformance.violations,
            yield_outcome,
        }
    }

    /// No violation and the device yielded to a higher-priority frame.
    pub fn passed(&self) -> bool {
        self.violations.is_empty() && self.yield_outcome == YieldOutcome::Yielded
    }
}
