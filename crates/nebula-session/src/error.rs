//! Session error types and the user-visible disconnect messages they map to.

use std::io;

/// Title and reason shown to the player when a session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectMessage {
    /// Short headline, e.g. "Disconnected!".
    pub title: String,
    /// Longer explanation shown under the title.
    pub reason: String,
}

impl DisconnectMessage {
    /// Build a message from any pair of string-likes.
    pub fn new(title: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            reason: reason.into(),
        }
    }
}

/// Errors that can end, or be recorded against, a game session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The socket reported an error while the connection was being established.
    #[error("error connecting to {endpoint}: {source}")]
    ConnectFailed {
        /// `host:port` that was being connected to.
        endpoint: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// The connection was neither established nor refused before the deadline.
    #[error("timed out connecting to {endpoint}")]
    ConnectTimedOut {
        /// `host:port` that was being connected to.
        endpoint: String,
    },

    /// Querying or reading the inbound stream failed.
    #[error("error reading from {endpoint}: {source}")]
    Read {
        /// `host:port` of the peer.
        endpoint: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// The peer sent an opcode that is out of range or has no registered handler.
    #[error("server sent invalid packet (opcode {opcode:#04x})")]
    InvalidPacket {
        /// The offending opcode byte.
        opcode: u8,
    },

    /// Liveness check failed: silent peer, orderly close, or a deferred write failure.
    #[error("lost connection to the server")]
    LostConnection,

    /// A packet handler asked for the session to end.
    #[error("kicked: {reason}")]
    Kicked {
        /// Title to show the player.
        title: String,
        /// Reason supplied by the handler (usually the server's kick text).
        reason: String,
    },

    /// An outgoing packet does not fit in the outbound staging buffer.
    #[error("outbound packet of {needed} bytes does not fit ({available} bytes free)")]
    OutboundOverflow {
        /// Bytes the packet needs.
        needed: usize,
        /// Bytes still free in the buffer.
        available: usize,
    },

    /// A packet length registration that the read window could never hold.
    #[error("opcode {opcode:#04x} payload of {length} bytes exceeds the maximum of {max}")]
    PacketTooLarge {
        /// Opcode being registered.
        opcode: u8,
        /// Requested payload length.
        length: usize,
        /// Largest payload the read window supports.
        max: usize,
    },
}

impl SessionError {
    /// The title/reason pair shown to the player for this error.
    pub fn disconnect_message(&self) -> DisconnectMessage {
        match self {
            Self::ConnectFailed { endpoint, .. } | Self::ConnectTimedOut { endpoint } => {
                DisconnectMessage::new(
                    format!("Failed to connect to {endpoint}"),
                    "You failed to connect to the server. It's probably down!",
                )
            }
            Self::Read { .. } => DisconnectMessage::new(
                "Lost connection to the server",
                "I/O error when reading packets",
            ),
            Self::InvalidPacket { .. } => {
                DisconnectMessage::new("Disconnected", "Server sent invalid packet!")
            }
            Self::LostConnection => DisconnectMessage::new(
                "Disconnected!",
                "You've lost connection to the server",
            ),
            Self::Kicked { title, reason } => DisconnectMessage::new(title.clone(), reason.clone()),
            Self::OutboundOverflow { .. } | Self::PacketTooLarge { .. } => {
                DisconnectMessage::new("Disconnected", self.to_string())
            }
        }
    }

    /// Whether this error came from a failed connect attempt.
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Self::ConnectFailed { .. } | Self::ConnectTimedOut { .. })
    }
}
