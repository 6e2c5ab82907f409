//! Free-running CPU cycle counter used for every sub-microsecond measurement.

/// Cycle counter abstraction. `cycles` wraps at `u32::MAX`; callers always
/// compute elapsed time with `wrapping_sub`.
pub trait CycleClock {
    /// Current counter value.
    fn cycles(&mut self) -> u32;
    /// Core frequency in MHz (cycles per microsecond).
    fn cpu_mhz(&self) -> u32;
    /// Busy-wait for `cycles`. Callers needing atomicity wrap the call in a
    /// critical section.
    fn delay_cycles(&mut self, cycles: u32) {
        let start = self.cycles();
        while self.cycles().wrapping_sub(start) < cycles {}
    }
}
