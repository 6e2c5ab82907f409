//! Transmission path: the SYNC/bit-sync preamble and the pulse-width frame
//! encoder with inline collision detection.
//!
//! These routines only drive the line. Deciding *when* to transmit belongs to
//! the arbitration state machine, which calls them inside one exclusive
//! section.
use crate::infra::codec::bits::BitCodec;
use crate::infra::timing::TxDelays;
use crate::protocol::transport::{
    traits::{bus_line::BusLine, cycle_clock::CycleClock},
    BusIo,
};

/// Result of a frame transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendOutcome {
    /// Every bit went out unimpeded.
    Sent,
    /// Another transmitter won at `bit` (0-based, counted across the frame).
    Collision { bit: usize },
}

/// Drive SYNC low, release for the bit-sync high phase, then drive the
/// bit-sync low phase. The line is left low; the first data bit releases it.
pub fn send_preamble<L: BusLine, C: CycleClock>(io: &mut BusIo<L, C>, delays: &TxDelays) {
    io.line.drive_low();
    io.clock.delay_cycles(delays.sync);
    io.line.release();
    io.clock.delay_cycles(delays.bit_sync);
    io.line.drive_low();
    io.clock.delay_cycles(delays.bit_sync);
}

/// Send every byte most significant bit first. Stops at the first collision.
pub fn send_frame<L: BusLine, C: CycleClock>(
    io: &mut BusIo<L, C>,
    codec: &BitCodec,
    bytes: &[u8],
) -> SendOutcome {
    for (index, byte) in bytes.iter().enumerate() {
        for shift in 0..8 {
            let bit = (byte >> (7 - shift)) & 1 == 1;
            if codec.drive_bit(io, bit) {
                io.line.release();
                return SendOutcome::Collision {
                    bit: index * 8 + shift,
                };
            }
        }
    }
    SendOutcome::Sent
}

/// Preamble followed by the frame.
pub fn transmit<L: BusLine, C: CycleClock>(
    io: &mut BusIo<L, C>,
    codec: &BitCodec,
    bytes: &[u8],
) -> SendOutcome {
    send_preamble(io, &codec.delays());
    send_frame(io, codec, bytes)
}
