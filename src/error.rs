//! Error definitions shared across library modules.
//! Each type models a specific failure scenario (bus initialization, frame
//! parsing, pulse sampling, submission and diagnostics).
use thiserror_no_std::Error;

//==================================================================================INIT_ERROR
#[derive(Error, Debug)]
/// Errors returned while bringing the bus up. Nothing stays acquired on failure.
pub enum InitError<E: core::fmt::Debug> {
    /// Address 0 is reserved and cannot be used as a local address.
    #[error("Invalid local address: 0 is reserved")]
    InvalidAddress,
    /// The CPU clock is too slow to discriminate pulses at the requested grade.
    #[error("Clock too slow: {cpu_mhz} MHz cannot resolve the timing window")]
    ClockTooSlow { cpu_mhz: u32 },
    /// The platform refused to configure the bus pin.
    #[error("Bus line configuration failed: {0:?}")]
    Line(E),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Failure deriving a timing profile.
pub enum TimingError {
    /// Derived window is empty or degenerate (`min == 0` or `min >= max`).
    #[error("Clock too slow: {cpu_mhz} MHz")]
    ClockTooSlow { cpu_mhz: u32 },
}

//==================================================================================FRAME_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Errors raised while turning raw bytes into a frame.
pub enum FrameError {
    /// No byte at all, not even a tag.
    #[error("Empty frame")]
    Empty,
    /// Byte count differs from the length announced by the tag.
    #[error("Length mismatch -> declared: {declared}, actual: {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    /// Generic frames carry at least a tag and an address, so tag 1 is
    /// never a frame.
    #[error("Frame too short: {len} bytes")]
    TooShort { len: usize },
    /// Payload does not fit in a single length-prefixed frame.
    #[error("Payload too long: {len} bytes")]
    PayloadTooLong { len: usize },
}

//==================================================================================BIT_FAULT
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Protocol faults detected while sampling one pulse.
pub enum BitFault {
    /// The low phase did not end within its ceiling.
    #[error("Line stuck low after {elapsed} cycles")]
    StuckLow { elapsed: u32 },
    /// The high phase did not end within twice the window maximum.
    #[error("Line stuck high after {elapsed} cycles")]
    StuckHigh { elapsed: u32 },
}

//==================================================================================CAPTURE_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Reasons why an edge did not turn into a capture.
pub enum CaptureError {
    /// The SYNC low phase never ended (noise or a stuck line).
    #[error("SYNC low phase exceeded its ceiling")]
    SyncTimeout,
    /// Bit-sync high phase longer than ten windows.
    #[error("Bit-sync high too long: {elapsed} cycles")]
    BitSyncTooLong { elapsed: u32 },
    /// Bit-sync high phase too short to be anything but chatter.
    #[error("Bit-sync high too short: {elapsed} cycles")]
    BitSyncTooShort { elapsed: u32 },
    /// A byte could not be decoded.
    #[error("Byte {index} failed: {fault}")]
    Byte { index: usize, fault: BitFault },
}

//==================================================================================SUBMIT_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Errors returned to callers submitting outbound frames.
pub enum SubmitError {
    /// Outbound queue stayed full for the whole submit timeout.
    #[error("Outbound queue timeout")]
    QueueTimeout,
    /// Outbound queue is full (non-waiting submission).
    #[error("Outbound queue full")]
    QueueFull,
}

//==================================================================================PROBE_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Electrical probe failures.
pub enum ProbeError {
    /// Someone else holds the line low; the probe cannot start.
    #[error("Line held low by another device")]
    LineBusy,
    /// Driving low did not pull the line down before the ceiling.
    #[error("Line never fell within {ceiling} cycles")]
    NoFall { ceiling: u32 },
    /// Releasing did not let the line rise before the ceiling.
    #[error("Line never rose within {ceiling} cycles")]
    NoRise { ceiling: u32 },
}
