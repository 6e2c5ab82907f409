//! Low-level building blocks: the pulse-width codec and timing profiles.
pub mod codec;
pub mod timing;
