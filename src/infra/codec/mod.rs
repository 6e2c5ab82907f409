//! Pulse-level codec shared by the reception, transmission and diagnostic paths.
pub mod bits;
