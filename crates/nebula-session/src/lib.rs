//! Client-side game session transport.
//!
//! One [`Session`] type covers both singleplayer (a local simulation, no
//! network) and multiplayer (a TCP connection to a classic-protocol server).
//! For multiplayer it handles the non-blocking connect with timeout,
//! reassembly of the byte stream into fixed-length opcode-tagged packets,
//! dispatch through a [`PacketTable`], liveness detection, outbound buffering
//! and latency tracking. Everything runs on the caller's thread from
//! [`Session::tick`], which a [`TickDriver`] calls at a fixed rate.

pub mod connect;
pub mod error;
pub mod host;
pub mod local;
pub mod outbound;
pub mod packet_table;
pub mod ping;
pub mod protocol;
pub mod reassembly;
pub mod remote;
pub mod resources;
pub mod session;
pub mod socket;
pub mod tick_driver;

pub use connect::{ConnectAttempt, ConnectPoll, ConnectState, LivenessCounter};
pub use error::{DisconnectMessage, SessionError};
pub use host::{GameHost, WorldGenRequest};
pub use outbound::OutboundBuffer;
pub use packet_table::{PacketContext, PacketHandler, PacketTable};
pub use ping::PingTracker;
pub use protocol::{BlockId, BlockPos, MouseButton, PickedBlock, PlayerClick, PlayerPose};
pub use reassembly::{ReadWindow, StreamReassembler};
pub use resources::{
    ConditionalGet, FetchResult, HttpRequests, PollOutcome, Resources, TexturePackGate,
    TextureCache,
};
pub use session::{Capabilities, ServerInfo, Session, SessionConfig};
pub use socket::{GameSocket, SocketConfig, TcpSocket};
pub use tick_driver::TickDriver;
