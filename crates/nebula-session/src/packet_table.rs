//! Opcode registry: fixed payload length and handler per opcode.
//!
//! The wire carries no length prefix. A packet is one opcode byte followed by
//! exactly as many payload bytes as were registered for that opcode here.

use crate::error::SessionError;
use crate::outbound::OutboundBuffer;
use crate::ping::PingTracker;
use crate::reassembly::MAX_PAYLOAD_LEN;
use crate::session::{Capabilities, ServerInfo};

/// Number of distinct opcodes a single byte can carry.
pub const OPCODE_COUNT: usize = 256;

/// Inbound packet handler. Receives the payload with the opcode byte stripped.
pub type PacketHandler<H> = fn(&mut PacketContext<'_, H>, &[u8]);

/// Everything a packet handler may touch while a packet is dispatched.
pub struct PacketContext<'a, H> {
    /// The embedding game.
    pub host: &'a mut H,
    /// Latency probes, for ping replies.
    pub ping: &'a mut PingTracker,
    /// Negotiated protocol extensions.
    pub capabilities: &'a mut Capabilities,
    /// Server name/MOTD as announced by the peer.
    pub server: &'a mut ServerInfo,
    /// Staging buffer for replies; flushed by the session.
    pub outbound: &'a mut OutboundBuffer,
    disconnect: Option<SessionError>,
}

impl<'a, H> PacketContext<'a, H> {
    /// Borrow the pieces of session state a handler works on.
    pub fn new(
        host: &'a mut H,
        ping: &'a mut PingTracker,
        capabilities: &'a mut Capabilities,
        server: &'a mut ServerInfo,
        outbound: &'a mut OutboundBuffer,
    ) -> Self {
        Self {
            host,
            ping,
            capabilities,
            server,
            outbound,
            disconnect: None,
        }
    }

    /// End the session after the current packet, e.g. on a kick packet.
    pub fn disconnect(&mut self, title: impl Into<String>, reason: impl Into<String>) {
        self.disconnect = Some(SessionError::Kicked {
            title: title.into(),
            reason: reason.into(),
        });
    }

    /// End the session with a specific error.
    pub fn fail(&mut self, error: SessionError) {
        self.disconnect = Some(error);
    }

    /// The disconnect requested so far, if any.
    pub fn pending_disconnect(&self) -> Option<&SessionError> {
        self.disconnect.as_ref()
    }

    pub(crate) fn take_disconnect(&mut self) -> Option<SessionError> {
        self.disconnect.take()
    }
}

struct PacketEntry<H> {
    length: usize,
    handler: PacketHandler<H>,
}

impl<H> Clone for PacketEntry<H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H> Copy for PacketEntry<H> {}

/// Mapping from opcode to (payload length, handler).
///
/// An opcode without an entry is "absent": seeing it on the wire is a
/// protocol violation.
pub struct PacketTable<H> {
    entries: Box<[Option<PacketEntry<H>>]>,
}

impl<H> Default for PacketTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> PacketTable<H> {
    /// Create an empty table accepting every byte value as an opcode.
    pub fn new() -> Self {
        Self::with_opcode_count(OPCODE_COUNT)
    }

    /// Create an empty table whose valid opcodes are `0..opcode_count`.
    pub fn with_opcode_count(opcode_count: usize) -> Self {
        let count = opcode_count.min(OPCODE_COUNT);
        Self {
            entries: (0..count).map(|_| None).collect(),
        }
    }

    /// Number of valid opcodes (registered or not).
    pub fn opcode_count(&self) -> usize {
        self.entries.len()
    }

    /// Whether `opcode` falls inside the valid range.
    pub fn is_valid_opcode(&self, opcode: u8) -> bool {
        usize::from(opcode) < self.entries.len()
    }

    /// Register `handler` for `opcode` with a fixed payload length.
    pub fn register(
        &mut self,
        opcode: u8,
        length: usize,
        handler: PacketHandler<H>,
    ) -> Result<(), SessionError> {
        if !self.is_valid_opcode(opcode) {
            return Err(SessionError::InvalidPacket { opcode });
        }
        if length > MAX_PAYLOAD_LEN {
            return Err(SessionError::PacketTooLarge {
                opcode,
                length,
                max: MAX_PAYLOAD_LEN,
            });
        }
        self.entries[usize::from(opcode)] = Some(PacketEntry { length, handler });
        Ok(())
    }

    /// Remove any registration for `opcode`.
    pub fn unregister(&mut self, opcode: u8) {
        if let Some(slot) = self.entries.get_mut(usize::from(opcode)) {
            *slot = None;
        }
    }

    /// Remove every registration at once.
    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|slot| *slot = None);
    }

    /// Payload length and handler for `opcode`, or `None` when absent.
    pub fn lookup(&self, opcode: u8) -> Option<(usize, PacketHandler<H>)> {
        self.entries
            .get(usize::from(opcode))
            .copied()
            .flatten()
            .map(|entry| (entry.length, entry.handler))
    }

    /// Number of registered opcodes.
    pub fn registered(&self) -> usize {
        self.entries.iter().filter(|slot| slot.is_some()).count()
    }
}
