//! Conformance listener: captures the raw pulse widths of one frame from the
//! device under test and classifies every phase against its expected profile.
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};

use crate::core::FrameBytes;
use crate::error::{BitFault, TimingError};
use crate::infra::codec::bits::{hold_time, BitCodec, Level};
use crate::infra::timing::{SkewTable, TimingProfile};
use crate::protocol::diagnostics::{
    check_preamble, frame_violations, ConformanceResult, DutProfile, Violation,
};
use crate::protocol::frame::{decode_header, Frame};
use crate::protocol::transport::{
    traits::{bus_line::BusLine, cycle_clock::CycleClock, edge_listener::EdgeListener},
    BusIo, BIT_LOW_CEILING_WINDOWS, BIT_SYNC_HIGH_CEILING_WINDOWS, SYNC_LOW_CEILING_WINDOWS,
};

/// Running sums of the high-phase widths, per decoded value.
#[derive(Default)]
struct PulseStats {
    zeros: u64,
    zero_count: u32,
    ones: u64,
    one_count: u32,
}

impl PulseStats {
    fn record(&mut self, width: u32, bit: bool) {
        if bit {
            self.ones += width as u64;
            self.one_count += 1;
        } else {
            self.zeros += width as u64;
            self.zero_count += 1;
        }
    }

    fn count(&self) -> u32 {
        self.zero_count + self.one_count
    }

    fn mean(&self, bit: bool) -> u32 {
        let (sum, count) = if bit {
            (self.ones, self.one_count)
        } else {
            (self.zeros, self.zero_count)
        };
        if count == 0 {
            0
        } else {
            (sum / count as u64) as u32
        }
    }
}

/// Edge listener installed while the conformance probe runs.
pub struct ConformanceListener<'a, L, C> {
    io: BusIo<L, C>,
    codec: BitCodec,
    profile: TimingProfile,
    dut: DutProfile,
    results: &'a Signal<CriticalSectionRawMutex, ConformanceResult>,
}

impl<'a, L: BusLine, C: CycleClock> ConformanceListener<'a, L, C> {
    /// Build a listener expecting frames shaped like `dut`.
    pub fn new(
        io: BusIo<L, C>,
        dut: DutProfile,
        results: &'a Signal<CriticalSectionRawMutex, ConformanceResult>,
    ) -> Result<Self, TimingError> {
        let profile = TimingProfile::new(dut.speed, io.clock.cpu_mhz())?;
        let codec = BitCodec::new(
            profile.window(),
            profile.tx_delays(1, dut.controller, &SkewTable::NONE),
        );
        Ok(Self {
            io,
            codec,
            profile,
            dut,
            results,
        })
    }

    pub fn into_io(self) -> BusIo<L, C> {
        self.io
    }

    /// Measure one frame starting at its SYNC falling edge.
    pub fn measure(&mut self) -> ConformanceResult {
        let mut result = ConformanceResult::default();
        self.measure_into(&mut result);
        result.timing = result.raw.to_report(self.profile.cpu_mhz());
        result
    }

    fn measure_into(&mut self, result: &mut ConformanceResult) {
        let codec = self.codec;
        let window = codec.window();
        let io = &mut self.io;

        io.line.release();

        match hold_time(io, Level::Low, window.max_times(SYNC_LOW_CEILING_WINDOWS)) {
            Ok(width) => result.raw.sync = width,
            Err(_) => {
                result.violations.insert(Violation::SyncInfinite);
                return;
            }
        }
        match hold_time(
            io,
            Level::High,
            window.max_times(BIT_SYNC_HIGH_CEILING_WINDOWS),
        ) {
            Ok(width) => result.raw.bit_sync_high = width,
            Err(_) => {
                result.violations.insert(Violation::BitSyncInfinite);
                return;
            }
        }
        match hold_time(io, Level::Low, window.max_times(BIT_LOW_CEILING_WINDOWS)) {
            Ok(width) => result.raw.bit_sync_low = width,
            Err(_) => {
                result.violations.insert(Violation::BitSyncInvalidLow);
                return;
            }
        }

        result
            .violations
            .insert_all(check_preamble(&result.raw, window, &self.dut));

        let mut stats = PulseStats::default();
        let decoded = decode_frame(io, &codec, &mut stats, &mut result.frame);
        result.raw.bit0 = stats.mean(false);
        result.raw.bit1 = stats.mean(true);

        if decoded.is_err() {
            result.violations.insert(Violation::InvalidBit);
            return;
        }

        if codec.sample_bit(io).is_ok() {
            result.violations.insert(Violation::InvalidSize);
        }

        match Frame::from_bytes(result.frame.as_slice()) {
            Ok(frame) => result.violations.insert_all(frame_violations(frame.validate())),
            Err(_) => {
                result.violations.insert(Violation::InvalidGeneric);
            }
        }
    }
}

impl<L: BusLine, C: CycleClock> EdgeListener for ConformanceListener<'_, L, C> {
    fn on_falling_edge(&mut self) {
        let result = self.measure();

        #[cfg(feature = "defmt")]
        defmt::info!(
            "Conformance pass: {} bytes, {} violations",
            result.frame.len(),
            result.violations.len()
        );

        self.results.signal(result);
        self.io.line.release();
    }
}

fn decode_frame<L: BusLine, C: CycleClock>(
    io: &mut BusIo<L, C>,
    codec: &BitCodec,
    stats: &mut PulseStats,
    frame: &mut FrameBytes,
) -> Result<(), BitFault> {
    let tag = sample_byte(io, codec, stats)?;
    frame.push(tag);
    for _ in 1..decode_header(tag) {
        let byte = sample_byte(io, codec, stats)?;
        frame.push(byte);
    }
    Ok(())
}

/// Like [`BitCodec::sample_byte`], recording every width. The very first
/// bit follows the bit-sync low phase, which the caller already consumed.
fn sample_byte<L: BusLine, C: CycleClock>(
    io: &mut BusIo<L, C>,
    codec: &BitCodec,
    stats: &mut PulseStats,
) -> Result<u8, BitFault> {
    let mut byte = 0u8;
    for _ in 0..8 {
        if stats.count() > 0 {
            codec.wait_low_end(io)?;
        }
        let width = codec.measure_high(io)?;
        let bit = codec.classify(width);
        stats.record(width, bit);
        byte = (byte << 1) | bit as u8;
    }
    Ok(byte)
}
