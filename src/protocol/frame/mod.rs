//! Frame format shared by every device on the bus.
//!
//! The first byte on the wire is a tag that always determines the total
//! length:
//!
//! ```text
//! tag = 0   structured frame, 13 bytes:
//!           [0x00][SOH][src][dst][op][d0..d5][pad][crc]
//! tag = N   generic frame, N bytes:
//!           [N][addr][payload ...][0x00]
//! ```
//!
//! There is no in-band escaping. Validation is advisory: callers decide what
//! to do with the reported violations.
use crc::{Crc, CRC_8_SMBUS};
use enumset::{EnumSet, EnumSetType};

use crate::core::{FrameBytes, MAX_FRAME_LEN};
use crate::error::FrameError;

/// Tag announcing a structured frame.
pub const STRUCTURED_TAG: u8 = 0x00;
/// Wire length of a structured frame, tag included.
pub const STRUCTURED_FRAME_LEN: usize = 13;
/// Start-of-header marker of structured frames.
pub const SOH: u8 = 0x01;
/// Data bytes carried by a structured frame.
pub const STRUCTURED_DATA_LEN: usize = 6;
/// Largest payload a generic frame can carry (tag, address and NUL excluded).
pub const MAX_GENERIC_PAYLOAD: usize = MAX_FRAME_LEN - 3;

const CHECKSUM: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// Total frame length announced by the first byte on the wire.
#[inline]
pub fn decode_header(first_byte: u8) -> usize {
    match first_byte {
        STRUCTURED_TAG => STRUCTURED_FRAME_LEN,
        len => len as usize,
    }
}

/// Advisory findings reported by `validate`.
#[derive(EnumSetType, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameViolation {
    /// Structured frame without the SOH marker.
    Header,
    /// Structured frame with a zero source id.
    SourceId,
    /// Structured frame with a zero destination id.
    DestinationId,
    /// Structured frame with a non-zero pad byte.
    Padding,
    /// Structured frame whose checksum does not match its content.
    Checksum,
    /// Generic frame without a NUL terminator inside its declared length.
    UnterminatedPayload,
}

//==================================================================================STRUCTURED
/// Fixed-length addressed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StructuredFrame {
    pub soh: u8,
    pub source: u8,
    pub destination: u8,
    pub opcode: u8,
    pub data: [u8; STRUCTURED_DATA_LEN],
    pub pad: u8,
    pub checksum: u8,
}

impl StructuredFrame {
    /// Build a well-formed frame; the checksum is computed here.
    pub fn new(source: u8, destination: u8, opcode: u8, data: [u8; STRUCTURED_DATA_LEN]) -> Self {
        let mut frame = Self {
            soh: SOH,
            source,
            destination,
            opcode,
            data,
            pad: 0,
            checksum: 0,
        };
        frame.checksum = frame.compute_checksum();
        frame
    }

    /// CRC-8/SMBUS over every wire byte before the checksum.
    pub fn compute_checksum(&self) -> u8 {
        let bytes = self.to_bytes();
        CHECKSUM.checksum(&bytes[..STRUCTURED_FRAME_LEN - 1])
    }

    pub fn to_bytes(&self) -> [u8; STRUCTURED_FRAME_LEN] {
        let mut bytes = [0u8; STRUCTURED_FRAME_LEN];
        bytes[0] = STRUCTURED_TAG;
        bytes[1] = self.soh;
        bytes[2] = self.source;
        bytes[3] = self.destination;
        bytes[4] = self.opcode;
        bytes[5..11].copy_from_slice(&self.data);
        bytes[11] = self.pad;
        bytes[12] = self.checksum;
        bytes
    }

    /// Parse a complete structured frame, tag included. Content is not validated.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.is_empty() {
            return Err(FrameError::Empty);
        }
        if bytes.len() != STRUCTURED_FRAME_LEN {
            return Err(FrameError::LengthMismatch {
                declared: STRUCTURED_FRAME_LEN,
                actual: bytes.len(),
            });
        }

        let mut data = [0u8; STRUCTURED_DATA_LEN];
        data.copy_from_slice(&bytes[5..11]);

        Ok(Self {
            soh: bytes[1],
            source: bytes[2],
            destination: bytes[3],
            opcode: bytes[4],
            data,
            pad: bytes[11],
            checksum: bytes[12],
        })
    }

    pub fn validate(&self) -> EnumSet<FrameViolation> {
        let mut violations = EnumSet::empty();
        if self.soh != SOH {
            violations.insert(FrameViolation::Header);
        }
        if self.source == 0 {
            violations.insert(FrameViolation::SourceId);
        }
        if self.destination == 0 {
            violations.insert(FrameViolation::DestinationId);
        }
        if self.pad != 0 {
            violations.insert(FrameViolation::Padding);
        }
        if self.checksum != self.compute_checksum() {
            violations.insert(FrameViolation::Checksum);
        }
        violations
    }
}

//==================================================================================GENERIC
/// Variable-length frame. Keeps its exact wire image so that a received frame
/// is re-emitted byte for byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GenericFrame {
    bytes: FrameBytes,
}

impl GenericFrame {
    /// Build `[tag][address][payload][0x00]` with `tag = payload.len() + 3`.
    pub fn new(address: u8, payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() > MAX_GENERIC_PAYLOAD {
            return Err(FrameError::PayloadTooLong { len: payload.len() });
        }

        let mut bytes = FrameBytes::new();
        bytes.push((payload.len() + 3) as u8);
        bytes.push(address);
        for &byte in payload {
            bytes.push(byte);
        }
        bytes.push(0x00);
        Ok(Self { bytes })
    }

    /// Wrap a complete generic frame, tag included.
    ///
    /// Tag 1 announces a lone tag byte with no address; it is well formed on
    /// the wire but refused here with [`FrameError::TooShort`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let Some(&tag) = bytes.first() else {
            return Err(FrameError::Empty);
        };
        let declared = decode_header(tag);
        if tag == STRUCTURED_TAG || declared != bytes.len() {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: bytes.len(),
            });
        }
        if bytes.len() < 2 {
            return Err(FrameError::TooShort { len: bytes.len() });
        }
        Ok(Self {
            bytes: FrameBytes::from_slice(bytes),
        })
    }

    #[inline]
    pub fn tag(&self) -> u8 {
        self.bytes.data[0]
    }

    /// Destination/priority address; 0 is the highest priority.
    #[inline]
    pub fn address(&self) -> u8 {
        self.bytes.data[1]
    }

    /// Payload bytes up to (not including) the first NUL.
    pub fn payload(&self) -> &[u8] {
        let body = &self.bytes.as_slice()[2..];
        let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
        &body[..end]
    }

    /// Full wire image.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    pub fn validate(&self) -> EnumSet<FrameViolation> {
        if self.bytes.as_slice()[2..].contains(&0) {
            EnumSet::empty()
        } else {
            EnumSet::only(FrameViolation::UnterminatedPayload)
        }
    }
}

//==================================================================================FRAME
/// Tagged union of the two frame layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Frame {
    Structured(StructuredFrame),
    Generic(GenericFrame),
}

impl Frame {
    #[inline]
    pub fn tag(&self) -> u8 {
        match self {
            Frame::Structured(_) => STRUCTURED_TAG,
            Frame::Generic(frame) => frame.tag(),
        }
    }

    /// Serialize into an owned buffer, tag first.
    pub fn to_bytes(&self) -> FrameBytes {
        match self {
            Frame::Structured(frame) => FrameBytes::from_slice(&frame.to_bytes()),
            Frame::Generic(frame) => frame.bytes,
        }
    }

    /// Parse raw bytes; the tag selects the layout and must match the length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        match bytes.first() {
            None => Err(FrameError::Empty),
            Some(&STRUCTURED_TAG) => StructuredFrame::from_bytes(bytes).map(Frame::Structured),
            Some(_) => GenericFrame::from_bytes(bytes).map(Frame::Generic),
        }
    }

    pub fn validate(&self) -> EnumSet<FrameViolation> {
        match self {
            Frame::Structured(frame) => frame.validate(),
            Frame::Generic(frame) => frame.validate(),
        }
    }
}

impl From<StructuredFrame> for Frame {
    fn from(frame: StructuredFrame) -> Self {
        Frame::Structured(frame)
    }
}

impl From<GenericFrame> for Frame {
    fn from(frame: GenericFrame) -> Self {
        Frame::Generic(frame)
    }
}
