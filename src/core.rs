//! Owned frame buffer moved by value between interrupt context, the
//! arbitration task and the application queues.

/// Largest frame a length-prefixed tag can announce.
pub const MAX_FRAME_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBytes {
    pub len: usize,
    pub data: [u8; MAX_FRAME_LEN],
}

impl Default for FrameBytes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for FrameBytes {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "FrameBytes({=[u8]:02x})", self.as_slice())
    }
}

impl FrameBytes {
    /// Create an empty buffer.
    pub const fn new() -> Self {
        Self {
            len: 0,
            data: [0; MAX_FRAME_LEN],
        }
    }

    /// Build a buffer holding a copy of `slice` (clamped to [`MAX_FRAME_LEN`]).
    pub fn from_slice(slice: &[u8]) -> Self {
        let mut bytes = Self::new();
        bytes.copy_from_slice(slice);
        bytes
    }

    /// Number of valid bytes stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == MAX_FRAME_LEN
    }

    /// Reset the buffer.
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Append one byte. Returns `false` once the buffer is full.
    #[inline]
    pub fn push(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }
        self.data[self.len] = byte;
        self.len += 1;
        true
    }

    /// Copy bytes into the buffer and update `len`.
    #[inline]
    pub fn copy_from_slice(&mut self, slice: &[u8]) {
        let clamped = slice.len().min(MAX_FRAME_LEN);
        self.data[..clamped].copy_from_slice(&slice[..clamped]);
        self.len = clamped;
    }

    /// Immutable view over the populated bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }
}
