//! Minimal abstraction for the shared open-drain line. The pin is pulled high
//! externally; a device can only pull it low or let it go.

/// Contract for the single bus pin owned by one device.
pub trait BusLine {
    type Error: core::fmt::Debug;
    /// Configure the pin as open-drain input/output with pull-up and arm the
    /// falling-edge interrupt.
    fn configure(&mut self) -> Result<(), Self::Error>;
    /// Sample the line level.
    fn is_high(&mut self) -> bool;
    fn is_low(&mut self) -> bool {
        !self.is_high()
    }
    /// Stop driving; the pull-up takes the line high unless another device holds it.
    fn release(&mut self);
    /// Actively pull the line low.
    fn drive_low(&mut self);
}
