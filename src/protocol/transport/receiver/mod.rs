//! Reception path, run from the falling-edge interrupt.
//!
//! Sequence for every edge:
//!
//! 1. Notify the arbitration task that the line moved (always first).
//! 2. Release the line.
//! 3. Wait for the SYNC low phase to end.
//! 4. Time the bit-sync high phase and reject chatter or stuck lines.
//! 5. Decode the tag, then as many bytes as the tag announces.
//! 6. Hand the bytes to the arbitration task without blocking.
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel, signal::Signal};

use crate::core::FrameBytes;
use crate::error::CaptureError;
use crate::infra::codec::bits::{hold_time, BitCodec, Level};
use crate::protocol::frame::decode_header;
use crate::protocol::transport::{
    traits::{bus_line::BusLine, cycle_clock::CycleClock, edge_listener::EdgeListener},
    BusIo, BIT_SYNC_HIGH_CEILING_WINDOWS, BIT_SYNC_HIGH_FLOOR_WINDOWS, SYNC_LOW_CEILING_WINDOWS,
};

/// Depth of the ISR-to-task capture channel.
pub const CAPTURE_DEPTH: usize = 16;

/// Production edge listener.
pub struct FrameListener<'a, L, C> {
    io: BusIo<L, C>,
    codec: BitCodec,
    captures: &'a Channel<CriticalSectionRawMutex, FrameBytes, CAPTURE_DEPTH>,
    activity: &'a Signal<CriticalSectionRawMutex, ()>,
}

impl<'a, L: BusLine, C: CycleClock> FrameListener<'a, L, C> {
    pub fn new(
        io: BusIo<L, C>,
        codec: BitCodec,
        captures: &'a Channel<CriticalSectionRawMutex, FrameBytes, CAPTURE_DEPTH>,
        activity: &'a Signal<CriticalSectionRawMutex, ()>,
    ) -> Self {
        Self {
            io,
            codec,
            captures,
            activity,
        }
    }

    /// Give the pin and clock back, e.g. to install a diagnostic listener.
    pub fn into_io(self) -> BusIo<L, C> {
        self.io
    }

    /// Decode one frame starting at the SYNC falling edge.
    pub fn capture(&mut self) -> Result<FrameBytes, CaptureError> {
        let window = self.codec.window();
        let io = &mut self.io;

        io.line.release();

        hold_time(io, Level::Low, window.max_times(SYNC_LOW_CEILING_WINDOWS))
            .map_err(|_| CaptureError::SyncTimeout)?;

        let bit_sync = hold_time(
            io,
            Level::High,
            window.max_times(BIT_SYNC_HIGH_CEILING_WINDOWS),
        )
        .map_err(|elapsed| CaptureError::BitSyncTooLong { elapsed })?;
        if bit_sync <= window.min_times(BIT_SYNC_HIGH_FLOOR_WINDOWS) {
            return Err(CaptureError::BitSyncTooShort { elapsed: bit_sync });
        }

        let mut bytes = FrameBytes::new();
        let tag = self.sample_byte_at(0)?;
        bytes.push(tag);

        let len = decode_header(tag);
        for index in 1..len {
            let byte = self.sample_byte_at(index)?;
            bytes.push(byte);
        }

        Ok(bytes)
    }

    fn sample_byte_at(&mut self, index: usize) -> Result<u8, CaptureError> {
        self.codec
            .sample_byte(&mut self.io)
            .map_err(|fault| CaptureError::Byte { index, fault })
    }
}

impl<L: BusLine, C: CycleClock> EdgeListener for FrameListener<'_, L, C> {
    fn on_falling_edge(&mut self) {
        self.activity.signal(());

        match self.capture() {
            Ok(bytes) => {
                if self.captures.try_send(bytes).is_err() {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("Capture channel full, dropping {} bytes", bytes.len());
                }
            }
            Err(_err) => {
                #[cfg(feature = "defmt")]
                defmt::debug!("Edge ignored: {}", _err);
            }
        }

        self.io.line.release();
    }
}
