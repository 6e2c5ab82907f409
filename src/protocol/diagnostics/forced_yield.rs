//! Forced-yield probe: wait for a device to start a frame, then inject a
//! highest-priority frame with slightly shorter pulses right after its tag.
//! A conforming device sees the dominant pulse, detects a collision and
//! backs off.
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::Duration;
use futures_util::{future::select, future::Either, pin_mut};

use crate::error::TimingError;
use crate::infra::codec::bits::{hold_time, BitCodec, Level};
use crate::infra::timing::{SkewTable, TimingProfile};
use crate::protocol::arbitration::duration_ms;
use crate::protocol::diagnostics::DutProfile;
use crate::protocol::transport::{
    sender::{send_frame, SendOutcome},
    traits::{
        bus_line::BusLine, bus_timer::BusTimer, cycle_clock::CycleClock,
        edge_listener::EdgeListener,
    },
    BusIo, BIT_SYNC_HIGH_CEILING_WINDOWS, BIT_SYNC_HIGH_FLOOR_WINDOWS, SYNC_LOW_CEILING_WINDOWS,
};

/// Generic frame to address 0 carrying `"test"`.
pub const INJECTED_FRAME: [u8; 7] = [7, 0x00, b't', b'e', b's', b't', 0x00];

/// Injected pulses are this much shorter than nominal, capped at half a unit.
pub const INJECTION_LEAD_NS: u32 = 3_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum YieldOutcome {
    /// No transmission started before the ceiling.
    NoneObserved,
    /// The device kept transmitting over the injected frame.
    DidNotYield,
    /// The device backed off and the injected frame went through.
    Yielded,
}

/// Edge listener installed while the yield probe runs.
pub struct YieldListener<'a, L, C> {
    io: BusIo<L, C>,
    codec: BitCodec,
    results: &'a Signal<CriticalSectionRawMutex, YieldOutcome>,
}

impl<'a, L: BusLine, C: CycleClock> YieldListener<'a, L, C> {
    pub fn new(
        io: BusIo<L, C>,
        dut: DutProfile,
        results: &'a Signal<CriticalSectionRawMutex, YieldOutcome>,
    ) -> Result<Self, TimingError> {
        let profile = TimingProfile::new(dut.speed, io.clock.cpu_mhz())?;
        let lead = profile.ns_to_cycles(INJECTION_LEAD_NS.min(dut.speed.delta_ns() / 2));
        let delays = profile
            .tx_delays(0, dut.controller, &SkewTable::NONE)
            .shortened(lead);
        Ok(Self {
            io,
            codec: BitCodec::new(profile.window(), delays),
            results,
        })
    }

    pub fn into_io(self) -> BusIo<L, C> {
        self.io
    }

    /// Follow the device's preamble and tag, then inject. `None` when the
    /// edge was not the start of a frame.
    pub fn inject(&mut self) -> Option<YieldOutcome> {
        let window = self.codec.window();
        let io = &mut self.io;

        io.line.release();
        hold_time(io, Level::Low, window.max_times(SYNC_LOW_CEILING_WINDOWS)).ok()?;
        let bit_sync = hold_time(
            io,
            Level::High,
            window.max_times(BIT_SYNC_HIGH_CEILING_WINDOWS),
        )
        .ok()?;
        if bit_sync <= window.min_times(BIT_SYNC_HIGH_FLOOR_WINDOWS) {
            return None;
        }

        self.codec.sample_byte(io).ok()?;
        self.codec.wait_low_end(io).ok()?;

        let outcome = match send_frame(io, &self.codec, &INJECTED_FRAME) {
            SendOutcome::Sent => YieldOutcome::Yielded,
            SendOutcome::Collision { .. } => YieldOutcome::DidNotYield,
        };
        io.line.release();
        Some(outcome)
    }
}

impl<L: BusLine, C: CycleClock> EdgeListener for YieldListener<'_, L, C> {
    fn on_falling_edge(&mut self) {
        if let Some(outcome) = self.inject() {
            #[cfg(feature = "defmt")]
            defmt::info!("Yield probe: {}", outcome);
            self.results.signal(outcome);
        }
        self.io.line.release();
    }
}

/// Wait for the yield listener to report, at most `timeout`.
pub async fn run_yield_test<T: BusTimer>(
    results: &Signal<CriticalSectionRawMutex, YieldOutcome>,
    timer: &mut T,
    timeout: Duration,
) -> YieldOutcome {
    let wait = results.wait();
    let delay = timer.delay_ms(duration_ms(timeout));
    pin_mut!(wait);
    pin_mut!(delay);

    match select(wait, delay).await {
        Either::Left((outcome, _)) => outcome,
        Either::Right(_) => YieldOutcome::NoneObserved,
    }
}
