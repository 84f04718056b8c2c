//! Multiplayer backend: one TCP connection to a classic server.

use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::connect::{ConnectAttempt, ConnectPoll, ConnectState, LivenessCounter, peer_is_gone};
use crate::error::SessionError;
use crate::host::GameHost;
use crate::outbound::OutboundBuffer;
use crate::packet_table::{PacketContext, PacketTable};
use crate::ping::PingTracker;
use crate::protocol::{self, BLOCK_AIR, BlockId, BlockPos, PlayerClick, PlayerPose};
use crate::reassembly::StreamReassembler;
use crate::session::{Capabilities, ServerInfo, SessionConfig};
use crate::socket::{GameSocket, is_connect_in_progress};

/// State of a remote session. Driven by [`Session`](crate::Session).
pub struct RemoteBackend<H> {
    socket: Box<dyn GameSocket>,
    config: SessionConfig,
    endpoint: String,
    state: ConnectState,
    table: PacketTable<H>,
    reassembler: StreamReassembler,
    outbound: OutboundBuffer,
    ping: PingTracker,
    liveness: LivenessCounter,
    write_failed: bool,
    closed: bool,
}

impl<H: GameHost> RemoteBackend<H> {
    /// Wrap `socket`; nothing happens until [`begin_connect`](Self::begin_connect).
    pub fn new(socket: Box<dyn GameSocket>, config: SessionConfig) -> Self {
        let endpoint = config.endpoint();
        Self {
            socket,
            config,
            endpoint,
            state: ConnectState::Idle,
            table: PacketTable::new(),
            reassembler: StreamReassembler::new(),
            outbound: OutboundBuffer::new(),
            ping: PingTracker::new(),
            liveness: LivenessCounter::default(),
            write_failed: false,
            closed: false,
        }
    }

    /// `host:port` of the server.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Current lifecycle state.
    pub fn state(&self) -> &ConnectState {
        &self.state
    }

    /// Latency probes.
    pub fn ping(&self) -> &PingTracker {
        &self.ping
    }

    /// Whether a flush has failed since the last reset.
    pub fn write_failed(&self) -> bool {
        self.write_failed
    }

    /// When the last packet arrived (or the connection was established).
    pub fn last_packet_at(&self) -> Option<Instant> {
        self.reassembler.last_packet_at()
    }

    /// Opcode of the last packet dispatched.
    pub fn last_opcode(&self) -> Option<u8> {
        self.reassembler.last_opcode()
    }

    /// Inbound packet table.
    pub fn table(&self) -> &PacketTable<H> {
        &self.table
    }

    /// Start a non-blocking connect.
    pub fn begin_connect(&mut self, now: Instant) -> Result<(), SessionError> {
        let connect_failed = |endpoint: &str, source| SessionError::ConnectFailed {
            endpoint: endpoint.to_string(),
            source,
        };

        info!(endpoint = %self.endpoint, "connecting");
        self.closed = false;
        self.state = ConnectState::Connecting(ConnectAttempt::start(now, self.config.connect_timeout));

        self.socket
            .set_blocking(false)
            .map_err(|e| connect_failed(&self.endpoint, e))?;
        match self.socket.connect(&self.config.host, self.config.port) {
            Ok(()) => Ok(()),
            Err(e) if is_connect_in_progress(&e) => Ok(()),
            Err(e) => Err(connect_failed(&self.endpoint, e)),
        }
    }

    /// Advance an outstanding connect. On success the login is sent.
    pub fn tick_connect(&mut self, host: &mut H, now: Instant) -> Result<(), SessionError> {
        let ConnectState::Connecting(attempt) = &self.state else {
            return Ok(());
        };

        match attempt.poll(self.socket.as_mut(), &self.endpoint, now) {
            ConnectPoll::Pending { progress } => {
                host.on_loading_progress(progress);
                Ok(())
            }
            ConnectPoll::Connected => self.finish_connect(host, now),
            ConnectPoll::Failed(err) => Err(err),
        }
    }

    fn finish_connect(&mut self, host: &mut H, now: Instant) -> Result<(), SessionError> {
        self.state = ConnectState::Connected;
        host.on_loading_progress(0.0);

        self.reassembler.reset();
        self.outbound.clear();
        self.liveness.reset();
        self.table.clear();
        H::register_packets(&mut self.table)?;

        protocol::write_login(
            &mut self.outbound,
            &self.config.username,
            &self.config.mppass,
            !self.config.classic_mode,
        )?;
        self.flush();
        self.reassembler.touch(now);

        info!(
            endpoint = %self.endpoint,
            handlers = self.table.registered(),
            "connected, login sent"
        );
        Ok(())
    }

    /// Probe the connection if it has been quiet for too long.
    pub fn check_liveness(&mut self, now: Instant, interval: Duration) -> Result<(), SessionError> {
        let Some(last) = self.reassembler.last_packet_at() else {
            return Ok(());
        };
        if last + self.config.liveness_threshold >= now {
            return Ok(());
        }
        if !self.liveness.accumulate(interval) {
            return Ok(());
        }

        trace!(endpoint = %self.endpoint, quiet = ?now - last, "probing connection");
        if peer_is_gone(self.socket.as_mut(), self.write_failed) {
            return Err(SessionError::LostConnection);
        }
        Ok(())
    }

    /// Read whatever is available and dispatch every complete packet.
    pub fn receive(
        &mut self,
        host: &mut H,
        capabilities: &mut Capabilities,
        server: &mut ServerInfo,
        now: Instant,
    ) -> Result<usize, SessionError> {
        let read_error = |endpoint: &str, source| SessionError::Read {
            endpoint: endpoint.to_string(),
            source,
        };

        let available = self
            .socket
            .bytes_available()
            .map_err(|e| read_error(&self.endpoint, e))?;
        if available > 0 {
            let socket = &mut self.socket;
            self.reassembler
                .receive(|buf| socket.read(buf))
                .map_err(|e| read_error(&self.endpoint, e))?;
        }

        let Self {
            socket,
            endpoint,
            table,
            reassembler,
            outbound,
            ping,
            write_failed,
            closed,
            ..
        } = self;
        let mut ctx = PacketContext::new(host, ping, capabilities, server, outbound);
        let dispatched = reassembler.dispatch(table, &mut ctx, now, |staged| {
            write_staged(socket.as_mut(), staged, endpoint.as_str(), *closed, write_failed);
        });
        if let Err(SessionError::InvalidPacket { opcode }) = &dispatched {
            warn!(endpoint = %endpoint, opcode, "server sent invalid packet");
        }
        dispatched
    }

    /// Run the host's periodic protocol work and send what it staged.
    pub fn net_tick(&mut self, host: &mut H, capabilities: &mut Capabilities, server: &mut ServerInfo) {
        let mut ctx = PacketContext::new(
            host,
            &mut self.ping,
            capabilities,
            server,
            &mut self.outbound,
        );
        H::net_tick(&mut ctx);
        self.flush();
    }

    /// Write out the staged packets. A failure is only recorded; it ends the
    /// session at the next liveness probe so a pending kick can still be read.
    pub fn flush(&mut self) {
        write_staged(
            self.socket.as_mut(),
            &mut self.outbound,
            &self.endpoint,
            self.closed,
            &mut self.write_failed,
        );
    }

    fn stage(&mut self, what: &str, result: Result<(), SessionError>) {
        match result {
            Ok(()) => self.flush(),
            Err(err) => {
                warn!(error = %err, "dropping outgoing {what}");
                self.outbound.clear();
            }
        }
    }

    /// Send a block change. Removing a block is sent as a delete carrying
    /// the held block.
    pub fn send_block(&mut self, pos: BlockPos, new: BlockId, selected: BlockId) {
        if !self.state.is_connected() {
            return;
        }
        let result = if new == BLOCK_AIR {
            protocol::write_set_block(&mut self.outbound, pos, false, selected)
        } else {
            protocol::write_set_block(&mut self.outbound, pos, true, new)
        };
        self.stage("block change", result);
    }

    /// Send chat, one packet per part. Empty text is ignored.
    pub fn send_chat(&mut self, text: &str, capabilities: &Capabilities) {
        if text.is_empty() || !self.state.is_connected() {
            return;
        }
        let parts = protocol::chat_parts(text);
        let last = parts.len() - 1;
        for (i, part) in parts.into_iter().enumerate() {
            let result = protocol::write_chat(
                &mut self.outbound,
                part,
                i < last,
                capabilities.partial_messages,
            );
            self.stage("chat message", result);
        }
    }

    /// Send the local player's position and orientation.
    pub fn send_position(&mut self, pose: &PlayerPose) {
        if !self.state.is_connected() {
            return;
        }
        let result = protocol::write_position(&mut self.outbound, pose);
        self.stage("position", result);
    }

    /// Send a click event, if the server negotiated them.
    pub fn send_player_click(&mut self, click: &PlayerClick, capabilities: &Capabilities) {
        if !self.state.is_connected() || !capabilities.player_click {
            return;
        }
        let result = protocol::write_player_click(&mut self.outbound, click);
        self.stage("player click", result);
    }

    /// Forget the packet table and the deferred write failure.
    pub fn reset(&mut self) {
        self.table.clear();
        self.write_failed = false;
    }

    /// Close the socket. Safe to call more than once.
    pub fn close(&mut self) {
        self.state = ConnectState::Disconnected;
        if self.closed {
            return;
        }
        self.closed = true;
        self.outbound.clear();
        self.socket.close();
        debug!(endpoint = %self.endpoint, "socket closed");
    }
}

fn write_staged(
    socket: &mut dyn GameSocket,
    outbound: &mut OutboundBuffer,
    endpoint: &str,
    closed: bool,
    write_failed: &mut bool,
) {
    if closed || outbound.is_empty() {
        outbound.clear();
        return;
    }
    match outbound.flush_with(|bytes| socket.write(bytes)) {
        Ok(bytes) => trace!(bytes, "flushed"),
        Err(err) => {
            if !*write_failed {
                warn!(endpoint, error = %err, "write failed, deferring disconnect");
            }
            *write_failed = true;
        }
    }
}
