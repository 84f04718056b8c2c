//! Fixed-capacity staging buffer for outgoing packets.
//!
//! Packets are serialized in place, then written to the socket with a single
//! [`OutboundBuffer::flush_with`] call.

use std::io;

use crate::error::SessionError;

/// Capacity of the staging buffer. Holds a login packet, or every reply one
/// handler stages for a single packet (e.g. the extension list).
pub const OUTBOUND_CAPACITY: usize = 512;

/// Bounded buffer of serialized outgoing packets.
pub struct OutboundBuffer {
    buf: [u8; OUTBOUND_CAPACITY],
    len: usize,
}

impl Default for OutboundBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            buf: [0u8; OUTBOUND_CAPACITY],
            len: 0,
        }
    }

    /// Reserve `size` bytes at the write cursor and return them zeroed for the caller to fill.
    pub fn stage(&mut self, size: usize) -> Result<&mut [u8], SessionError> {
        let available = OUTBOUND_CAPACITY - self.len;
        if size > available {
            return Err(SessionError::OutboundOverflow {
                needed: size,
                available,
            });
        }

        let start = self.len;
        self.len += size;
        let slot = &mut self.buf[start..self.len];
        slot.fill(0);
        Ok(slot)
    }

    /// Bytes staged so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Number of bytes staged.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Discard staged bytes.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Write all staged bytes with `write`, looping over partial writes.
    ///
    /// The buffer is empty afterwards whether or not the write succeeded.
    /// A write that makes no progress is reported as [`io::ErrorKind::WriteZero`].
    pub fn flush_with<F>(&mut self, mut write: F) -> io::Result<usize>
    where
        F: FnMut(&[u8]) -> io::Result<usize>,
    {
        let total = self.len;
        self.len = 0;

        let mut offset = 0;
        while offset < total {
            let wrote = write(&self.buf[offset..total])?;
            if wrote == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            offset += wrote;
        }
        Ok(total)
    }
}
