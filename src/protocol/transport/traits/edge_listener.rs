//! Entry point called by the platform's falling-edge interrupt handler.
//!
//! Exactly one listener is installed at a time: the production
//! [`FrameListener`](crate::protocol::transport::receiver::FrameListener) or
//! one of the diagnostic listeners while a probe runs.

pub trait EdgeListener {
    /// Runs in interrupt context: no allocation, bounded busy-waits only, and
    /// the line is left released on return.
    fn on_falling_edge(&mut self);
}
