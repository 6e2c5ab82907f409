//! Electrical characterization: how fast the line falls when driven and how
//! fast the pull-up brings it back.
//!
//! Threshold voltages are not measured; that needs an ADC on the bus pin.
use crate::error::ProbeError;
use crate::infra::codec::bits::{exclusive, hold_time, Level};
use crate::protocol::transport::{
    traits::{bus_line::BusLine, cycle_clock::CycleClock},
    BusIo,
};

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ElectricalReport {
    pub fall_us: f32,
    pub rise_us: f32,
    /// One full low/high cycle (`fall + rise`).
    pub cycle_us: f32,
    /// Fastest toggling rate the line supports.
    pub max_toggle_hz: u32,
}

/// Drive the line low, then release it, timing each edge. Each edge is
/// bounded by `ceiling_us`. The line is released on every exit path.
pub fn measure_electrical<L: BusLine, C: CycleClock>(
    io: &mut BusIo<L, C>,
    ceiling_us: u32,
) -> Result<ElectricalReport, ProbeError> {
    let cpu_mhz = io.clock.cpu_mhz();
    let ceiling = ceiling_us.saturating_mul(cpu_mhz);

    let edges = exclusive(|| {
        io.line.release();
        if hold_time(io, Level::Low, ceiling).is_err() {
            return Err(ProbeError::LineBusy);
        }

        io.line.drive_low();
        let fall = hold_time(io, Level::High, ceiling);
        io.line.release();
        let fall = fall.map_err(|_| ProbeError::NoFall { ceiling })?;

        let rise = hold_time(io, Level::Low, ceiling).map_err(|_| ProbeError::NoRise { ceiling })?;
        Ok((fall, rise))
    });

    let (fall, rise) = edges?;
    let to_us = |cycles: u32| cycles as f32 / cpu_mhz.max(1) as f32;
    let cycle = (fall as u64 + rise as u64).max(1);

    let report = ElectricalReport {
        fall_us: to_us(fall),
        rise_us: to_us(rise),
        cycle_us: to_us(fall.saturating_add(rise)),
        max_toggle_hz: (cpu_mhz as u64 * 1_000_000 / cycle).min(u32::MAX as u64) as u32,
    };

    #[cfg(feature = "defmt")]
    defmt::info!(
        "Electrical: fall {} us, rise {} us",
        report.fall_us,
        report.rise_us
    );

    Ok(report)
}
