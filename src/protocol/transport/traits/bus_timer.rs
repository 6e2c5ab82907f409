//! Asynchronous timer abstraction providing the bounded waits of the
//! arbitration task, the submission path and the diagnostic probes.

/// Timer trait abstraction; must remain thread-safe when applicable.
pub trait BusTimer {
    /// Asynchronously wait for `millis` milliseconds.
    fn delay_ms<'a>(&'a mut self, millis: u32) -> impl core::future::Future<Output = ()> + 'a;
}
