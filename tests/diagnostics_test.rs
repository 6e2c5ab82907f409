//! Diagnostic checks against simulated devices: conformance of recorded
//! frames, electrical edge timing and the forced-yield injection.

mod helpers;

use dcp_bus::error::ProbeError;
use dcp_bus::infra::timing::{SpeedGrade, TxDelays};
use dcp_bus::protocol::diagnostics::{
    conformance::ConformanceListener,
    electrical::measure_electrical,
    forced_yield::{run_yield_test, YieldListener, YieldOutcome, INJECTED_FRAME},
    test_connection, ConformanceResult, DiagnosticReport, DutProfile, Violation,
    ELECTRICAL_CEILING_US,
};
use dcp_bus::protocol::frame::{GenericFrame, StructuredFrame};
use dcp_bus::protocol::transport::{
    sender::{transmit, SendOutcome},
    traits::edge_listener::EdgeListener,
};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::Duration;
use enumset::EnumSet;
use helpers::{codec, MockTimer, SimBus, SimPort};

const NODE: DutProfile = DutProfile {
    speed: SpeedGrade::Slow,
    controller: false,
};

/// Record `bytes` sent by a node at 0x20 with the given delays override.
fn dut_sends(bus: &SimBus, bytes: &[u8], delays: Option<TxDelays>) -> SimPort {
    let dut = bus.attach();
    let nominal = codec(SpeedGrade::Slow, 0x20, false);
    let codec = delays.map_or(nominal, |delays| nominal.with_delays(delays));
    transmit(&mut dut.io(), &codec, bytes);
    dut
}

/// Run the conformance listener from the DUT's first falling edge.
fn conformance(bus: &SimBus, dut: &SimPort) -> ConformanceResult {
    let results = Signal::<CriticalSectionRawMutex, ConformanceResult>::new();
    let probe = bus.attach();
    probe.set_time(bus.falling_edges(dut.device())[0]);
    let mut listener =
        ConformanceListener::new(probe.io(), NODE, &results).expect("profile must resolve");
    listener.measure()
}

#[tokio::test]
/// A nominal frame is clean and its widths match the profile.
async fn test_conformant_frame() {
    let bus = SimBus::new();
    let frame = GenericFrame::new(0x20, b"hello").expect("payload fits");
    let dut = dut_sends(&bus, frame.as_bytes(), None);

    let results = Signal::<CriticalSectionRawMutex, ConformanceResult>::new();
    let probe = bus.attach();
    probe.set_time(bus.falling_edges(dut.device())[0]);
    let mut listener =
        ConformanceListener::new(probe.io(), NODE, &results).expect("profile must resolve");
    listener.on_falling_edge();

    let result = test_connection(&results, &mut MockTimer, Duration::from_millis(50)).await;

    assert!(result.is_conformant(), "{:?}", result.violations);
    assert_eq!(result.frame.as_slice(), frame.as_bytes());
    assert_eq!(result.raw.bit0, 3_200);
    assert_eq!(result.raw.bit1, 6_400);
    assert_eq!(result.raw.bit_sync_high, 25_600);
    assert!((result.timing.sync_us - 1_000.0).abs() < 0.1);
    assert!((result.timing.bit0_us - 20.0).abs() < 0.01);
    assert_eq!(result.timing.speed, Some(SpeedGrade::Slow));
}

#[test]
/// A node holding SYNC for 5 units is flagged, the rest stays clean.
fn test_short_sync_flagged() {
    let bus = SimBus::new();
    let nominal = codec(SpeedGrade::Slow, 0x20, false).delays();
    let delays = TxDelays {
        sync: 16_000,
        ..nominal
    };
    let frame = GenericFrame::new(0x20, b"hi").expect("payload fits");
    let dut = dut_sends(&bus, frame.as_bytes(), Some(delays));

    let result = conformance(&bus, &dut);

    assert_eq!(result.violations, EnumSet::only(Violation::SyncTooShort));
    assert_eq!(result.frame.as_slice(), frame.as_bytes());
}

#[test]
/// Pulses beyond the length announced by the tag.
fn test_trailing_data_flagged() {
    let bus = SimBus::new();
    let dut = dut_sends(&bus, &[3, 0x10, 0x00, 0xAA], None);

    let result = conformance(&bus, &dut);

    assert_eq!(result.violations, EnumSet::only(Violation::InvalidSize));
    assert_eq!(result.frame.as_slice(), &[3, 0x10, 0x00]);
}

#[test]
/// Structured content checks are reported as conformance violations.
fn test_structured_checksum_flagged() {
    let bus = SimBus::new();
    let mut bytes = StructuredFrame::new(0x20, 0xF0, 0x01, [1, 2, 3, 4, 5, 6]).to_bytes();
    bytes[12] ^= 0xFF;
    let dut = dut_sends(&bus, &bytes, None);

    let result = conformance(&bus, &dut);

    assert_eq!(result.violations, EnumSet::only(Violation::StructuredChecksum));
}

#[test]
/// A generic frame without NUL terminator.
fn test_unterminated_generic_flagged() {
    let bus = SimBus::new();
    let dut = dut_sends(&bus, &[4, 0x10, 0x41, 0x42], None);

    let result = conformance(&bus, &dut);

    assert_eq!(result.violations, EnumSet::only(Violation::InvalidGeneric));
}

#[test]
/// SYNC that never ends stops the pass right away.
fn test_infinite_sync() {
    let bus = SimBus::new();
    let stuck = bus.attach();
    bus.script(stuck.device(), 0, &[1_000_000]);

    let result = conformance(&bus, &stuck);

    assert_eq!(result.violations, EnumSet::only(Violation::SyncInfinite));
    assert!(result.frame.is_empty());
}

#[tokio::test]
/// Nothing on the line before the ceiling.
async fn test_no_transmission() {
    let results = Signal::<CriticalSectionRawMutex, ConformanceResult>::new();

    let result = test_connection(&results, &mut MockTimer, Duration::from_millis(20)).await;

    assert_eq!(result.violations, EnumSet::only(Violation::NoTransmission));
}

#[test]
/// Fall and rise times of an RC-loaded line.
fn test_electrical_edges() {
    // 1 µs to fall, 2 µs to rise at 160 MHz.
    let bus = SimBus::with_edges(160, 320);
    let probe = bus.attach();

    let report = measure_electrical(&mut probe.io(), ELECTRICAL_CEILING_US)
        .expect("line must toggle");

    assert!((report.fall_us - 1.0).abs() < 0.05, "{:?}", report);
    assert!((report.rise_us - 2.0).abs() < 0.05, "{:?}", report);
    assert!((report.cycle_us - 3.0).abs() < 0.1, "{:?}", report);
    assert!((300_000..350_000).contains(&report.max_toggle_hz));
    assert!(!bus.is_low_at(probe.now()));
}

#[test]
/// The probe refuses to run while someone else holds the line, and reports
/// a line that never falls.
fn test_electrical_failures() {
    let bus = SimBus::new();
    let holder = bus.attach();
    let probe = bus.attach();
    bus.script(holder.device(), 0, &[10_000_000]);
    assert_eq!(
        measure_electrical(&mut probe.io(), ELECTRICAL_CEILING_US),
        Err(ProbeError::LineBusy)
    );

    let bus = SimBus::with_edges(1_000_000, 0);
    let probe = bus.attach();
    assert_eq!(
        measure_electrical(&mut probe.io(), ELECTRICAL_CEILING_US),
        Err(ProbeError::NoFall { ceiling: 160_000 })
    );
}

/// Run the yield listener from the DUT's first falling edge.
fn inject(bus: &SimBus, dut: &SimPort) -> (SimPort, Option<YieldOutcome>) {
    let results = Signal::<CriticalSectionRawMutex, YieldOutcome>::new();
    let probe = bus.attach();
    probe.set_time(bus.falling_edges(dut.device())[0]);
    let mut listener = YieldListener::new(probe.io(), NODE, &results).expect("profile must resolve");
    let outcome = listener.inject();
    (probe, outcome)
}

#[test]
/// A device that stops after its tag lets the injected frame through.
fn test_device_yields() {
    let bus = SimBus::new();
    let dut = dut_sends(&bus, &[0x08], None);

    let (probe, outcome) = inject(&bus, &dut);

    assert_eq!(outcome, Some(YieldOutcome::Yielded));
    // One falling edge per injected bit.
    assert_eq!(
        bus.falling_edges(probe.device()).len(),
        INJECTED_FRAME.len() * 8
    );
}

#[test]
/// A device that keeps driving its frame overrides the injection.
fn test_device_does_not_yield() {
    let bus = SimBus::new();
    let frame = GenericFrame::new(0x20, b"hello").expect("payload fits");
    let dut = dut_sends(&bus, frame.as_bytes(), None);

    let (_, outcome) = inject(&bus, &dut);

    assert_eq!(outcome, Some(YieldOutcome::DidNotYield));
}

#[test]
/// The local sender, faced with the injected frame right after its tag,
/// loses the line on the first bit that follows.
fn test_own_transmit_yields_to_injection() {
    let bus = SimBus::new();
    let frame = GenericFrame::new(0x20, b"hello").expect("payload fits");
    let tag = frame.as_bytes()[0];
    let dut = dut_sends(&bus, &[tag], None);

    let (injector, outcome) = inject(&bus, &dut);
    assert_eq!(outcome, Some(YieldOutcome::Yielded));
    let injected_at = bus.falling_edges(injector.device())[0];

    // Same start, whole frame this time, against the recorded injection.
    bus.clear(dut.device());
    dut.set_time(0);
    let sent = transmit(
        &mut dut.io(),
        &codec(SpeedGrade::Slow, 0x20, false),
        frame.as_bytes(),
    );

    assert_eq!(sent, SendOutcome::Collision { bit: 8 });
    assert!(dut.now() > injected_at);
}

#[tokio::test]
/// No frame started before the ceiling.
async fn test_yield_probe_times_out() {
    let results = Signal::<CriticalSectionRawMutex, YieldOutcome>::new();

    let outcome = run_yield_test(&results, &mut MockTimer, Duration::from_millis(20)).await;

    assert_eq!(outcome, YieldOutcome::NoneObserved);
}

#[test]
/// Report verdict combines conformance and yield.
fn test_report_from_probes() {
    let bus = SimBus::new();
    let frame = GenericFrame::new(0x20, b"ok").expect("payload fits");
    let dut = dut_sends(&bus, frame.as_bytes(), None);
    let result = conformance(&bus, &dut);

    // Probed on a quiet line of its own.
    let quiet = SimBus::new();
    let electrical = measure_electrical(&mut quiet.attach().io(), ELECTRICAL_CEILING_US);
    let report = DiagnosticReport::new(&result, electrical, YieldOutcome::Yielded);

    assert!(report.passed());
    assert_eq!(report.timing.speed, Some(SpeedGrade::Slow));
    assert!(report.electrical.is_ok());
}

#[test]
/// The local transmit path is conformant with its own probe.
fn test_own_transmit_is_conformant() {
    for controller in [false, true] {
        let bus = SimBus::new();
        let dut = bus.attach();
        let frame = StructuredFrame::new(0x0A, 0xF0, 0x01, [0x0C, 0xA0, 0x0F, 0xE0, 0, 0]);
        let sent = transmit(
            &mut dut.io(),
            &codec(SpeedGrade::Slow, 0x0A, controller),
            &frame.to_bytes(),
        );
        assert_eq!(sent, SendOutcome::Sent);

        let results = Signal::<CriticalSectionRawMutex, ConformanceResult>::new();
        let probe = bus.attach();
        probe.set_time(bus.falling_edges(dut.device())[0]);
        let profile = DutProfile {
            speed: SpeedGrade::Slow,
            controller,
        };
        let mut listener =
            ConformanceListener::new(probe.io(), profile, &results).expect("profile must resolve");

        assert!(listener.measure().is_conformant());
    }
}
