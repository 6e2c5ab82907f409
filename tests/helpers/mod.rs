/// Test doubles simulating a wired-AND bus in virtual cycle time, plus an
/// async timer for the task side.
///
/// Every device records the intervals during which it drives the line low.
/// The line reads low at time `t` when any interval satisfies
/// `start + fall <= t < end + rise`. Ports keep their own cursor: a device's
/// run can be replayed against waveforms recorded earlier by other devices.
use dcp_bus::infra::codec::bits::BitCodec;
use dcp_bus::infra::timing::{SkewTable, SpeedGrade, TimingProfile};
use dcp_bus::protocol::transport::{
    traits::{bus_line::BusLine, bus_timer::BusTimer, cycle_clock::CycleClock},
    BusIo,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};

pub const CPU_MHZ: u32 = 160;

type EdgeHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Copy)]
struct Interval {
    start: u64,
    end: Option<u64>,
}

#[derive(Default)]
struct Device {
    intervals: Vec<Interval>,
    hook: Option<EdgeHook>,
}

struct SimState {
    fall: u64,
    rise: u64,
    devices: Vec<Device>,
    reject_configure: bool,
    cpu_mhz: u32,
}

impl SimState {
    fn covers(&self, interval: &Interval, t: u64) -> bool {
        t >= interval.start + self.fall && interval.end.map_or(true, |end| t < end + self.rise)
    }

    fn is_low(&self, t: u64) -> bool {
        self.devices
            .iter()
            .flat_map(|device| device.intervals.iter())
            .any(|interval| self.covers(interval, t))
    }

    fn foreign_edge(&self, device: usize, from: u64, to: u64) -> bool {
        self.devices
            .iter()
            .enumerate()
            .filter(|(id, _)| *id != device)
            .flat_map(|(_, other)| other.intervals.iter())
            .any(|interval| {
                let edge = interval.start + self.fall;
                from < edge && edge <= to
            })
    }
}

#[derive(Clone)]
#[allow(dead_code)]
/// Shared line. Cloning shares the same simulation.
pub struct SimBus {
    state: Arc<Mutex<SimState>>,
}

#[allow(dead_code)]
impl SimBus {
    /// Line falling one cycle after being driven and rising instantly.
    pub fn new() -> Self {
        Self::with_edges(1, 0)
    }

    /// Line with explicit fall/rise latencies, in cycles.
    pub fn with_edges(fall: u64, rise: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                fall,
                rise,
                devices: Vec::new(),
                reject_configure: false,
                cpu_mhz: CPU_MHZ,
            })),
        }
    }

    /// Connect a new device.
    pub fn attach(&self) -> SimPort {
        let mut state = self.state.lock().unwrap();
        state.devices.push(Device::default());
        SimPort {
            bus: self.clone(),
            device: state.devices.len() - 1,
            cursor: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Times at which each of `device`'s drives first reads low.
    pub fn falling_edges(&self, device: usize) -> Vec<u64> {
        let state = self.state.lock().unwrap();
        state.devices[device]
            .intervals
            .iter()
            .map(|interval| interval.start + state.fall)
            .collect()
    }

    /// Forget everything `device` drove.
    pub fn clear(&self, device: usize) {
        self.state.lock().unwrap().devices[device].intervals.clear();
    }

    /// Record a waveform for `device`: alternating low/high durations
    /// starting with low at `start`. Returns the end time.
    pub fn script(&self, device: usize, start: u64, segments: &[u64]) -> u64 {
        let mut state = self.state.lock().unwrap();
        let mut t = start;
        for (i, &len) in segments.iter().enumerate() {
            if i % 2 == 0 {
                state.devices[device].intervals.push(Interval {
                    start: t,
                    end: Some(t + len),
                });
            }
            t += len;
        }
        t
    }

    /// Called whenever `device` busy-waits across another device's falling
    /// edge, standing in for the edge interrupt.
    pub fn on_foreign_edge(&self, device: usize, hook: impl Fn() + Send + Sync + 'static) {
        self.state.lock().unwrap().devices[device].hook = Some(Arc::new(hook));
    }

    /// Make `BusLine::configure` fail.
    pub fn reject_configure(&self, reject: bool) {
        self.state.lock().unwrap().reject_configure = reject;
    }

    /// Core frequency reported by every clock on this bus.
    pub fn set_cpu_mhz(&self, cpu_mhz: u32) {
        self.state.lock().unwrap().cpu_mhz = cpu_mhz;
    }

    pub fn is_low_at(&self, t: u64) -> bool {
        self.state.lock().unwrap().is_low(t)
    }
}

#[derive(Clone)]
#[allow(dead_code)]
/// One device's view of the bus with its own time cursor.
pub struct SimPort {
    bus: SimBus,
    device: usize,
    cursor: Arc<AtomicU64>,
}

#[allow(dead_code)]
impl SimPort {
    pub fn device(&self) -> usize {
        self.device
    }

    pub fn now(&self) -> u64 {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn set_time(&self, t: u64) {
        self.cursor.store(t, Ordering::SeqCst);
    }

    /// Same device, independent cursor (e.g. the interrupt's view).
    pub fn fork(&self) -> SimPort {
        SimPort {
            bus: self.bus.clone(),
            device: self.device,
            cursor: Arc::new(AtomicU64::new(self.now())),
        }
    }

    /// Pin and clock sharing this port's cursor.
    pub fn io(&self) -> BusIo<SimLine, SimClock> {
        BusIo::new(
            SimLine {
                bus: self.bus.clone(),
                device: self.device,
                cursor: self.cursor.clone(),
            },
            SimClock {
                bus: self.bus.clone(),
                device: self.device,
                cursor: self.cursor.clone(),
            },
        )
    }
}

#[derive(Debug, PartialEq)]
#[allow(dead_code)]
pub enum SimError {
    Rejected,
}

pub struct SimLine {
    bus: SimBus,
    device: usize,
    cursor: Arc<AtomicU64>,
}

impl BusLine for SimLine {
    type Error = SimError;

    fn configure(&mut self) -> Result<(), SimError> {
        if self.bus.state.lock().unwrap().reject_configure {
            Err(SimError::Rejected)
        } else {
            Ok(())
        }
    }

    fn is_high(&mut self) -> bool {
        let now = self.cursor.load(Ordering::SeqCst);
        !self.bus.state.lock().unwrap().is_low(now)
    }

    fn release(&mut self) {
        let now = self.cursor.load(Ordering::SeqCst);
        let mut state = self.bus.state.lock().unwrap();
        if let Some(open) = state.devices[self.device]
            .intervals
            .iter_mut()
            .find(|interval| interval.end.is_none())
        {
            open.end = Some(now);
        }
    }

    fn drive_low(&mut self) {
        let now = self.cursor.load(Ordering::SeqCst);
        let mut state = self.bus.state.lock().unwrap();
        let intervals = &mut state.devices[self.device].intervals;
        if intervals.iter().all(|interval| interval.end.is_some()) {
            intervals.push(Interval {
                start: now,
                end: None,
            });
        }
    }
}

pub struct SimClock {
    bus: SimBus,
    device: usize,
    cursor: Arc<AtomicU64>,
}

impl CycleClock for SimClock {
    fn cycles(&mut self) -> u32 {
        self.cursor.fetch_add(1, Ordering::SeqCst) as u32
    }

    fn cpu_mhz(&self) -> u32 {
        self.bus.state.lock().unwrap().cpu_mhz
    }

    fn delay_cycles(&mut self, cycles: u32) {
        let from = self.cursor.fetch_add(cycles as u64, Ordering::SeqCst);
        let to = from + cycles as u64;
        let hook = {
            let state = self.bus.state.lock().unwrap();
            if state.foreign_edge(self.device, from, to) {
                state.devices[self.device].hook.clone()
            } else {
                None
            }
        };
        if let Some(hook) = hook {
            hook();
        }
    }
}

#[allow(dead_code)]
/// Timer based on `tokio::time::sleep` to drive delays in tests.
pub struct MockTimer;

impl BusTimer for MockTimer {
    async fn delay_ms(&mut self, millis: u32) {
        sleep(Duration::from_millis(millis as u64)).await;
    }
}

#[allow(dead_code)]
/// Codec a device at `address` uses on a 160 MHz core without skew.
pub fn codec(speed: SpeedGrade, address: u8, controller: bool) -> BitCodec {
    let profile = TimingProfile::new(speed, CPU_MHZ).unwrap();
    BitCodec::new(
        profile.window(),
        profile.tx_delays(address, controller, &SkewTable::NONE),
    )
}
