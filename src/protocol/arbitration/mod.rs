//! Bus ownership: one task owns the physical line and decides each cycle
//! whether to wait, listen, start a frame, send it or hand a capture over.
//!
//! ```text
//!            capture                 decoded / dropped
//!  Waiting ───────────► Reading ──────────────────────► Waiting
//!     │ outbound pending
//!     ▼          line busy / activity during backoff
//!  Listening ─────────────────────────────────────────► Waiting
//!     │ backoff elapsed quietly
//!     ▼          (one exclusive section)        sent
//!  Starting ──► Sending ──────────────────────────────► Waiting
//!                  │ collision
//!                  └──────────────────────────────────► Listening
//! ```
//!
//! Contention is resolved by the address-weighted backoff: lower addresses
//! wait less and claim the line first. Once two transmitters overlap, the
//! dominant 0 wins bit by bit.
use embassy_time::Duration;

use crate::infra::timing::{SkewTable, SpeedGrade};

pub mod bus_supervisor;

/// Depth of the inbound and outbound frame queues.
pub const QUEUE_DEPTH: usize = 8;

/// Bounded wait when pushing a decoded frame into a full inbound queue.
pub const INBOUND_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(15);

/// How long a retained frame lets pending captures through before retrying.
pub const RETRY_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// State of the arbitration machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusState {
    Waiting,
    Listening,
    Starting,
    /// Frame transmission. It runs inside the exclusive section opened by
    /// `Starting`, so [`step`](bus_supervisor::BusRunner::step) never returns
    /// it and [`state`](bus_supervisor::BusRunner::state) never reports it.
    Sending,
    Reading,
}

/// Behavior of [`BusHandle::read`](bus_supervisor::BusHandle::read).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadPolicy {
    /// Return immediately, `None` when nothing was received.
    Instant,
    /// Wait until a frame is available.
    Asynchronous,
}

/// Identity of the local node. Set once at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusMode {
    /// Local address; 0 is reserved.
    pub address: u8,
    /// Controllers use a shorter SYNC.
    pub controller: bool,
    pub read_policy: ReadPolicy,
    pub speed: SpeedGrade,
}

/// Tunables with sensible defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusConfig {
    /// Latency compensation applied to transmit delays.
    pub skew: SkewTable,
    /// Maximum wait in [`submit`](bus_supervisor::BusHandle::submit); `None` waits forever.
    pub submit_timeout: Option<Duration>,
    pub inbound_timeout: Duration,
    pub retry_poll: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            skew: SkewTable::NONE,
            submit_timeout: None,
            inbound_timeout: INBOUND_ENQUEUE_TIMEOUT,
            retry_poll: RETRY_POLL_INTERVAL,
        }
    }
}

/// Clamp a duration to the `u32` milliseconds used by [`BusTimer`](crate::protocol::transport::traits::bus_timer::BusTimer).
#[inline]
pub(crate) fn duration_ms(duration: Duration) -> u32 {
    duration.as_millis().min(u32::MAX as u64) as u32
}
