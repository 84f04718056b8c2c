//! TCP stream reassembly into fixed-size, opcode-tagged packets.
//!
//! Bytes are appended to a bounded [`ReadWindow`]. Complete packets are
//! dispatched in order; a trailing partial packet is moved to the front of the
//! window so the next read chunk lands directly after it.

use std::io;
use std::time::Instant;

use tracing::{debug, trace};

use crate::error::SessionError;
use crate::host::GameHost;
use crate::outbound::OutboundBuffer;
use crate::packet_table::{PacketContext, PacketTable};

/// Size of a single socket read.
pub const READ_CHUNK: usize = 4096 * 4;

/// Total window size. The slack beyond one chunk holds a carried-over partial packet.
pub const READ_WINDOW_CAPACITY: usize = 4096 * 5;

/// Largest payload a registered opcode may declare.
pub const MAX_PAYLOAD_LEN: usize = READ_WINDOW_CAPACITY - READ_CHUNK - 1;

/// Opcode after which some old D3 servers emit one stray byte.
pub const OPCODE_HACK_CONTROL: u8 = 0x20;

/// Bounded inbound byte window.
///
/// Invariant: `cursor <= end <= capacity`.
pub struct ReadWindow {
    buf: Box<[u8]>,
    cursor: usize,
    end: usize,
}

impl Default for ReadWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadWindow {
    /// Create an empty window of [`READ_WINDOW_CAPACITY`] bytes.
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; READ_WINDOW_CAPACITY].into_boxed_slice(),
            cursor: 0,
            end: 0,
        }
    }

    /// Append up to one read chunk using `read`, returning the bytes read.
    pub fn fill<F>(&mut self, read: F) -> io::Result<usize>
    where
        F: FnOnce(&mut [u8]) -> io::Result<usize>,
    {
        let limit = (self.end + READ_CHUNK).min(self.buf.len());
        let count = read(&mut self.buf[self.end..limit])?;
        self.end += count.min(limit - self.end);
        Ok(count)
    }

    /// Bytes received but not yet consumed.
    pub fn unconsumed(&self) -> &[u8] {
        &self.buf[self.cursor..self.end]
    }

    /// Number of bytes received but not yet consumed.
    pub fn pending(&self) -> usize {
        self.end - self.cursor
    }

    fn consume(&mut self, count: usize) {
        self.cursor = (self.cursor + count).min(self.end);
    }

    /// Move unconsumed bytes to the start of the window.
    pub fn compact(&mut self) {
        let remaining = self.pending();
        if self.cursor > 0 {
            self.buf.copy_within(self.cursor..self.end, 0);
        }
        self.cursor = 0;
        self.end = remaining;
    }

    /// Drop everything in the window.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.end = 0;
    }
}

/// Inbound half of a remote session: window plus dispatch bookkeeping.
#[derive(Default)]
pub struct StreamReassembler {
    window: ReadWindow,
    last_opcode: Option<u8>,
    last_packet_at: Option<Instant>,
}

impl StreamReassembler {
    /// Create an empty reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read one chunk into the window.
    pub fn receive<F>(&mut self, read: F) -> io::Result<usize>
    where
        F: FnOnce(&mut [u8]) -> io::Result<usize>,
    {
        let count = self.window.fill(read)?;
        trace!(bytes = count, pending = self.window.pending(), "received");
        Ok(count)
    }

    /// Opcode of the most recently dispatched packet.
    pub fn last_opcode(&self) -> Option<u8> {
        self.last_opcode
    }

    /// When the most recent packet was dispatched (or the session was established).
    pub fn last_packet_at(&self) -> Option<Instant> {
        self.last_packet_at
    }

    /// Stamp the last-packet clock without dispatching anything.
    pub fn touch(&mut self, now: Instant) {
        self.last_packet_at = Some(now);
    }

    /// Bytes waiting for the rest of their packet.
    pub fn pending(&self) -> usize {
        self.window.pending()
    }

    /// Forget all buffered bytes and dispatch history.
    pub fn reset(&mut self) {
        self.window.reset();
        self.last_opcode = None;
        self.last_packet_at = None;
    }

    /// Dispatch every complete packet in the window, then carry the remainder forward.
    ///
    /// Returns the number of packets dispatched. Stops at the first packet whose
    /// bytes are not all present yet. Fails without calling any further handler
    /// on an out-of-range or unregistered opcode, or when a handler requests a
    /// disconnect. Whenever a handler leaves replies in `ctx.outbound`, `flush`
    /// is called before the next packet.
    pub fn dispatch<H: GameHost>(
        &mut self,
        table: &PacketTable<H>,
        ctx: &mut PacketContext<'_, H>,
        now: Instant,
        mut flush: impl FnMut(&mut OutboundBuffer),
    ) -> Result<usize, SessionError> {
        let result = self.dispatch_complete(table, ctx, now, &mut flush);
        self.window.compact();
        result
    }

    fn dispatch_complete<H: GameHost>(
        &mut self,
        table: &PacketTable<H>,
        ctx: &mut PacketContext<'_, H>,
        now: Instant,
        flush: &mut impl FnMut(&mut OutboundBuffer),
    ) -> Result<usize, SessionError> {
        let mut dispatched = 0;

        while let Some(&opcode) = self.window.unconsumed().first() {
            // Vendor workaround: old D3 servers write one byte too many after
            // HackControl. Only applies to that server family and those two values.
            if ctx.capabilities.needs_d3_fix
                && self.last_opcode == Some(OPCODE_HACK_CONTROL)
                && (opcode == 0x00 || opcode == 0xFF)
            {
                debug!("skipping invalid HackControl byte from D3 server");
                self.window.consume(1);
                ctx.host.on_hack_control_resync();
                continue;
            }

            if !table.is_valid_opcode(opcode) {
                return Err(SessionError::InvalidPacket { opcode });
            }
            let Some((length, handler)) = table.lookup(opcode) else {
                return Err(SessionError::InvalidPacket { opcode });
            };
            if self.window.pending() < 1 + length {
                break;
            }

            self.last_opcode = Some(opcode);
            self.last_packet_at = Some(now);

            let frame = &self.window.unconsumed()[1..=length];
            handler(ctx, frame);
            self.window.consume(1 + length);
            dispatched += 1;

            if !ctx.outbound.is_empty() {
                flush(&mut *ctx.outbound);
            }

            if let Some(err) = ctx.take_disconnect() {
                return Err(err);
            }
        }

        Ok(dispatched)
    }
}
