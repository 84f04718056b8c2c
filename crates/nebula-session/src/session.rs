//! The active game session: one backend, local or remote, plus the state
//! both share.
//!
//! A [`Session`] is owned by the game and driven from a single thread. The
//! host is passed into every call rather than stored, so the session never
//! holds a borrow of the game between ticks.

use std::time::{Duration, Instant};

use nebula_config::NetworkConfig;
use tracing::{debug, info, warn};

use crate::connect::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_LIVENESS_THRESHOLD};
use crate::error::SessionError;
use crate::host::GameHost;
use crate::local::LocalBackend;
use crate::protocol::{BlockId, BlockPos, PlayerClick, PlayerPose};
use crate::remote::RemoteBackend;
use crate::resources::{RequestOutcome, TexturePackGate};
use crate::socket::{GameSocket, TcpSocket};

/// Coarse work (physics, resource polling, protocol tick) runs on every Nth tick.
pub const TICKS_PER_NET_UPDATE: u64 = 3;

/// Protocol extensions negotiated with the server. All off until negotiated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Extended player list packets.
    pub ext_player_list: bool,
    /// Player click packets.
    pub player_click: bool,
    /// Chat messages may be split with a "more follows" flag.
    pub partial_messages: bool,
    /// The full code page 437 character set is allowed in chat.
    pub full_cp437: bool,
    /// The server is a D3 build that needs the HackControl resync.
    pub needs_d3_fix: bool,
}

/// Details announced by the server, and our own application name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Server name from the identification packet.
    pub name: String,
    /// Message of the day.
    pub motd: String,
    /// Name and version this client reports.
    pub app_name: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            motd: String::new(),
            app_name: format!("Nebula {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Connection parameters for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Server host name or address. Empty means singleplayer.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login name, or the path of a dropped map in singleplayer.
    pub username: String,
    /// Login verification key.
    pub mppass: String,
    /// Connect deadline.
    pub connect_timeout: Duration,
    /// Silence before the connection is probed.
    pub liveness_threshold: Duration,
    /// Disable protocol extensions.
    pub classic_mode: bool,
}

impl SessionConfig {
    /// A singleplayer session for `username`.
    pub fn singleplayer(username: impl Into<String>) -> Self {
        Self::remote("", 0, username, "")
    }

    /// A multiplayer session with default timeouts.
    pub fn remote(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        mppass: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            mppass: mppass.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            liveness_threshold: DEFAULT_LIVENESS_THRESHOLD,
            classic_mode: false,
        }
    }

    /// Build from the persisted network settings.
    pub fn from_network(network: &NetworkConfig) -> Self {
        Self {
            host: network.server_address.trim().to_string(),
            port: network.server_port,
            username: network.username.clone(),
            mppass: network.mppass.clone(),
            connect_timeout: Duration::from_secs(u64::from(network.connect_timeout_seconds)),
            liveness_threshold: Duration::from_secs(u64::from(network.liveness_timeout_seconds)),
            classic_mode: network.classic_mode,
        }
    }

    /// Whether this selects the local backend.
    pub fn is_singleplayer(&self) -> bool {
        self.host.is_empty()
    }

    /// `host:port`, as shown in messages.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

enum Backend<H> {
    Local(LocalBackend),
    Remote(RemoteBackend<H>),
}

/// The single active game session.
pub struct Session<H> {
    backend: Backend<H>,
    disconnected: bool,
    capabilities: Capabilities,
    server: ServerInfo,
    textures: TexturePackGate,
    ticks: u64,
}

impl<H: GameHost> Session<H> {
    /// Create a session. An empty host selects singleplayer; otherwise a TCP
    /// socket is created for the server.
    pub fn new(config: SessionConfig) -> Self {
        if config.is_singleplayer() {
            Self::from_backend(Backend::Local(LocalBackend::new(&config)))
        } else {
            Self::with_socket(config, Box::new(TcpSocket::default()))
        }
    }

    /// Create a multiplayer session over a caller-supplied socket.
    pub fn with_socket(config: SessionConfig, socket: Box<dyn GameSocket>) -> Self {
        Self::from_backend(Backend::Remote(RemoteBackend::new(socket, config)))
    }

    fn from_backend(backend: Backend<H>) -> Self {
        let mut session = Self {
            backend,
            disconnected: false,
            capabilities: Capabilities::default(),
            server: ServerInfo::default(),
            textures: TexturePackGate::new(),
            ticks: 0,
        };
        if let Backend::Local(local) = &session.backend {
            local.init_capabilities(&mut session.capabilities);
        }
        session
    }

    /// Whether this is a local session.
    pub fn is_singleplayer(&self) -> bool {
        matches!(self.backend, Backend::Local(_))
    }

    /// Whether the session has ended.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Negotiated protocol extensions.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Server name, MOTD and our application name.
    pub fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    /// Mutable access to the server details.
    pub fn server_info_mut(&mut self) -> &mut ServerInfo {
        &mut self.server
    }

    /// Ticks counted so far. Not advanced while connecting.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// The remote backend, if this is a multiplayer session.
    pub fn remote(&self) -> Option<&RemoteBackend<H>> {
        match &self.backend {
            Backend::Remote(remote) => Some(remote),
            Backend::Local(_) => None,
        }
    }

    /// Average one-way latency in milliseconds (0 in singleplayer).
    pub fn average_ping_ms(&self) -> u32 {
        self.remote()
            .map_or(0, |remote| remote.ping().average_round_trip_ms())
    }

    /// Start the session.
    pub fn begin_connect(&mut self, host: &mut H) {
        self.begin_connect_at(host, Instant::now());
    }

    /// Start the session with an explicit clock.
    pub fn begin_connect_at(&mut self, host: &mut H, now: Instant) {
        self.disconnected = false;
        let result = match &mut self.backend {
            Backend::Local(local) => {
                local.begin_connect(host);
                Ok(())
            }
            Backend::Remote(remote) => remote.begin_connect(now),
        };
        if let Err(err) = result {
            self.disconnect(host, err);
        }
    }

    /// Advance the session by one driver tick of length `interval`.
    pub fn tick(&mut self, host: &mut H, interval: Duration) {
        self.tick_at(host, Instant::now(), interval);
    }

    /// Advance the session with an explicit clock.
    pub fn tick_at(&mut self, host: &mut H, now: Instant, interval: Duration) {
        if self.disconnected {
            return;
        }
        let coarse = self.ticks % TICKS_PER_NET_UPDATE == 0;

        let result = match &mut self.backend {
            Backend::Local(local) => {
                if coarse {
                    poll_textures(&mut self.textures, host);
                    local.tick(host);
                }
                Ok(true)
            }
            Backend::Remote(remote) if remote.state().is_connecting() => {
                remote.tick_connect(host, now).map(|()| false)
            }
            Backend::Remote(remote) if remote.state().is_connected() => {
                let received = remote
                    .check_liveness(now, interval)
                    .and_then(|()| remote.receive(host, &mut self.capabilities, &mut self.server, now));
                match received {
                    Ok(_) => {
                        if coarse {
                            poll_textures(&mut self.textures, host);
                            remote.net_tick(host, &mut self.capabilities, &mut self.server);
                        }
                        Ok(true)
                    }
                    Err(err) => Err(err),
                }
            }
            Backend::Remote(_) => Ok(false),
        };

        match result {
            Ok(true) => self.ticks += 1,
            Ok(false) => {}
            Err(err) => self.disconnect(host, err),
        }
    }

    /// Report a changed block. Locally this updates the simulation; remotely
    /// it is sent to the server.
    pub fn send_block(&mut self, host: &mut H, pos: BlockPos, old: BlockId, new: BlockId) {
        if self.disconnected {
            return;
        }
        match &mut self.backend {
            Backend::Local(local) => local.send_block(host, pos, old, new),
            Backend::Remote(remote) => remote.send_block(pos, new, host.selected_block()),
        }
    }

    /// Send a chat message, split into parts if long.
    pub fn send_chat(&mut self, host: &mut H, text: &str) {
        if self.disconnected {
            return;
        }
        match &mut self.backend {
            Backend::Local(local) => local.send_chat(host, text),
            Backend::Remote(remote) => remote.send_chat(text, &self.capabilities),
        }
    }

    /// Send the player's position. No-op in singleplayer.
    pub fn send_position(&mut self, pose: &PlayerPose) {
        if let (false, Backend::Remote(remote)) = (self.disconnected, &mut self.backend) {
            remote.send_position(pose);
        }
    }

    /// Send a click event. No-op in singleplayer.
    pub fn send_player_click(&mut self, click: &PlayerClick) {
        if let (false, Backend::Remote(remote)) = (self.disconnected, &mut self.backend) {
            remote.send_player_click(click, &self.capabilities);
        }
    }

    /// End the session with `error`: tell the host, then release the backend.
    pub fn disconnect(&mut self, host: &mut H, error: SessionError) {
        let message = error.disconnect_message();
        if error.is_connect_failure() {
            warn!(error = %error, "connect failed");
        } else {
            warn!(error = %error, title = %message.title, "disconnected");
        }
        host.on_disconnect(&message);
        self.free(host);
    }

    /// Release the backend. Further ticks and sends do nothing.
    pub fn free(&mut self, host: &mut H) {
        match &mut self.backend {
            Backend::Local(local) => local.free(host),
            Backend::Remote(remote) => {
                if self.disconnected {
                    return;
                }
                remote.close();
            }
        }
        self.disconnected = true;
    }

    /// Tear down protocol state before the session is recreated. Multiplayer only.
    pub fn reset(&mut self, host: &mut H) {
        let Backend::Remote(remote) = &mut self.backend else {
            return;
        };
        remote.reset();
        host.reset_protocol();
        self.free(host);
    }

    /// A new map is about to load. Multiplayer sessions drop all entities.
    pub fn on_new_map(&mut self, host: &mut H) {
        if self.is_singleplayer() {
            return;
        }
        debug!("new map, removing entities");
        host.remove_all_entities();
    }

    /// The server announced a texture pack.
    pub fn request_texture_pack(&mut self, host: &mut H, url: &str) {
        let Some(mut resources) = host.resources() else {
            debug!(url, "no resource support, ignoring texture pack");
            return;
        };
        let outcome = self.textures.request(url, &mut resources);
        if outcome == RequestOutcome::NeedsConfirmation {
            host.show_texture_pack_prompt(url);
        }
    }

    /// The player accepted the texture pack at `url`.
    pub fn download_texture_pack(&mut self, host: &mut H, url: &str) {
        if let Some(mut resources) = host.resources() {
            self.textures.download(url, &mut resources);
        }
    }
}

fn poll_textures<H: GameHost>(textures: &mut TexturePackGate, host: &mut H) {
    let outcome = match host.resources() {
        Some(mut resources) => textures.poll(&mut resources),
        None => return,
    };
    if let Some(message) = outcome.chat_message() {
        info!(%message, "texture pack");
        host.add_chat(&message);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::{Path, PathBuf};
    use std::rc::Rc;

    use super::*;
    use crate::error::DisconnectMessage;
    use crate::host::WorldGenRequest;
    use crate::packet_table::{PacketContext, PacketTable};
    use crate::protocol::{BLOCK_AIR, STRING_SIZE, opcode, size};
    use crate::resources::fake::{FakeCache, FakeHttp};
    use crate::resources::{FetchResult, Resources, TEXTURE_PACK_REQUEST_KEY};
    use crate::socket::mock::{MockSocket, SharedMock};

    const KICK: u8 = 0x0E;
    const PING: u8 = 0x01;
    const STEP: Duration = Duration::from_millis(16);

    #[derive(Default)]
    struct TestHost {
        disconnects: Vec<DisconnectMessage>,
        chat: Vec<String>,
        progress: Vec<f32>,
        log_name: Option<String>,
        permissions_granted: bool,
        loaded_map: Option<PathBuf>,
        generated: Option<WorldGenRequest>,
        physics_ticks: usize,
        block_changes: Vec<(BlockPos, BlockId, BlockId)>,
        simulation_freed: usize,
        selected: BlockId,
        protocol_resets: usize,
        entities_removed: usize,
        net_ticks: usize,
        prompts: Vec<String>,
        http: FakeHttp,
        cache: FakeCache,
        with_resources: bool,
    }

    fn on_ping(_ctx: &mut PacketContext<'_, TestHost>, _payload: &[u8]) {}

    fn on_two_way_ping(ctx: &mut PacketContext<'_, TestHost>, payload: &[u8]) {
        let sequence = u16::from_be_bytes([payload[1], payload[2]]);
        if let Err(err) = crate::protocol::write_two_way_ping_reply(ctx.outbound, sequence) {
            ctx.fail(err);
        }
    }

    fn on_kick(ctx: &mut PacketContext<'_, TestHost>, payload: &[u8]) {
        let reason = String::from_utf8_lossy(payload).trim_end().to_string();
        ctx.disconnect("Kicked", reason);
    }

    impl GameHost for TestHost {
        fn on_disconnect(&mut self, message: &DisconnectMessage) {
            self.disconnects.push(message.clone());
        }

        fn add_chat(&mut self, text: &str) {
            self.chat.push(text.to_string());
        }

        fn set_chat_log_name(&mut self, name: &str) {
            self.log_name = Some(name.to_string());
        }

        fn grant_all_block_permissions(&mut self) {
            self.permissions_granted = true;
        }

        fn load_map(&mut self, path: &Path) {
            self.loaded_map = Some(path.to_path_buf());
        }

        fn generate_world(&mut self, request: WorldGenRequest) {
            self.generated = Some(request);
        }

        fn physics_tick(&mut self) {
            self.physics_ticks += 1;
        }

        fn physics_block_changed(&mut self, pos: BlockPos, old: BlockId, new: BlockId) {
            self.block_changes.push((pos, old, new));
        }

        fn free_simulation(&mut self) {
            self.simulation_freed += 1;
        }

        fn on_loading_progress(&mut self, progress: f32) {
            self.progress.push(progress);
        }

        fn selected_block(&self) -> BlockId {
            self.selected
        }

        fn register_packets(table: &mut PacketTable<Self>) -> Result<(), SessionError> {
            table.register(PING, 0, on_ping)?;
            table.register(opcode::TWO_WAY_PING, 3, on_two_way_ping)?;
            table.register(KICK, STRING_SIZE, on_kick)
        }

        fn reset_protocol(&mut self) {
            self.protocol_resets += 1;
        }

        fn net_tick(ctx: &mut PacketContext<'_, Self>) {
            ctx.host.net_ticks += 1;
        }

        fn remove_all_entities(&mut self) {
            self.entities_removed += 1;
        }

        fn show_texture_pack_prompt(&mut self, url: &str) {
            self.prompts.push(url.to_string());
        }

        fn resources(&mut self) -> Option<Resources<'_>> {
            if !self.with_resources {
                return None;
            }
            Some(Resources {
                http: &mut self.http,
                cache: &mut self.cache,
            })
        }
    }

    fn remote_session() -> (Session<TestHost>, SharedMock) {
        let socket: SharedMock = Rc::new(RefCell::new(MockSocket::default()));
        let config = SessionConfig::remote("10.0.0.1", 25565, "alice", "pass");
        let session = Session::with_socket(config, Box::new(socket.clone()));
        (session, socket)
    }

    /// Session that has completed its connect at `start`.
    fn connected_session(host: &mut TestHost, start: Instant) -> (Session<TestHost>, SharedMock) {
        let (mut session, socket) = remote_session();
        session.begin_connect_at(host, start);
        socket.borrow_mut().connected = true;
        session.tick_at(host, start, STEP);
        assert!(session.remote().unwrap().state().is_connected());
        socket.borrow_mut().written.clear();
        socket.borrow_mut().writes = 0;
        (session, socket)
    }

    fn kick_packet(reason: &str) -> Vec<u8> {
        let mut packet = vec![KICK];
        let mut text = reason.as_bytes().to_vec();
        text.resize(STRING_SIZE, b' ');
        packet.extend_from_slice(&text);
        packet
    }

    #[test]
    fn test_empty_host_selects_singleplayer() {
        let session = Session::<TestHost>::new(SessionConfig::singleplayer("Player"));
        assert!(session.is_singleplayer());
        assert!(session.capabilities().partial_messages);
        assert!(session.capabilities().full_cp437);
        assert!(!session.capabilities().player_click);
        assert_eq!(session.average_ping_ms(), 0);
    }

    #[test]
    fn test_remote_capabilities_start_off() {
        let (session, _) = remote_session();
        assert!(!session.is_singleplayer());
        assert_eq!(*session.capabilities(), Capabilities::default());
        assert!(session.server_info().app_name.starts_with("Nebula "));
    }

    #[test]
    fn test_from_network_config() {
        let network = NetworkConfig {
            server_address: " play.example.net ".to_string(),
            connect_timeout_seconds: 5,
            classic_mode: true,
            ..Default::default()
        };
        let config = SessionConfig::from_network(&network);
        assert_eq!(config.endpoint(), "play.example.net:25565");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert!(config.classic_mode);
        assert!(SessionConfig::from_network(&NetworkConfig::default()).is_singleplayer());
    }

    #[test]
    fn test_local_begin_connect_generates_world() {
        let mut host = TestHost::default();
        let mut session = Session::new(SessionConfig::singleplayer("Player"));
        session.begin_connect(&mut host);

        assert_eq!(host.log_name.as_deref(), Some("Singleplayer"));
        assert!(host.permissions_granted);
        let request = host.generated.unwrap();
        assert_eq!((request.width, request.height, request.length), (128, 64, 128));
        assert!(request.seed >= 0);
        assert!(host.loaded_map.is_none());
    }

    #[test]
    fn test_local_begin_connect_loads_dropped_map() {
        let dir = tempfile::tempdir().unwrap();
        let map = dir.path().join("castle.cw");
        std::fs::write(&map, b"map").unwrap();

        let mut host = TestHost::default();
        let mut session = Session::new(SessionConfig::singleplayer(map.to_string_lossy()));
        session.begin_connect(&mut host);

        assert_eq!(host.loaded_map.as_deref(), Some(map.as_path()));
        assert!(host.generated.is_none());
    }

    #[test]
    fn test_local_missing_map_path_generates() {
        let mut host = TestHost::default();
        let mut session = Session::new(SessionConfig::singleplayer("/no/such/map.cw"));
        session.begin_connect(&mut host);
        assert!(host.loaded_map.is_none());
        assert!(host.generated.is_some());
    }

    #[test]
    fn test_local_tick_subsamples_physics() {
        let mut host = TestHost::default();
        let mut session = Session::new(SessionConfig::singleplayer("Player"));
        session.begin_connect(&mut host);
        for _ in 0..7 {
            session.tick(&mut host, STEP);
        }
        // Ticks 0, 3 and 6.
        assert_eq!(host.physics_ticks, 3);
        assert_eq!(session.ticks(), 7);
    }

    #[test]
    fn test_local_sends_go_to_host() {
        let mut host = TestHost::default();
        let mut session = Session::new(SessionConfig::singleplayer("Player"));
        let pos = BlockPos::new(1, 2, 3);
        session.send_block(&mut host, pos, 1, BLOCK_AIR);
        session.send_chat(&mut host, &"x".repeat(STRING_SIZE + 1));
        session.send_chat(&mut host, "");
        session.send_position(&PlayerPose::default());

        assert_eq!(host.block_changes, vec![(pos, 1, BLOCK_AIR)]);
        assert_eq!(host.chat, vec!["x".repeat(STRING_SIZE), "x".to_string()]);
    }

    #[test]
    fn test_local_free_releases_simulation() {
        let mut host = TestHost::default();
        let mut session = Session::new(SessionConfig::singleplayer("Player"));
        session.free(&mut host);
        assert!(session.is_disconnected());
        assert_eq!(host.simulation_freed, 1);

        session.tick(&mut host, STEP);
        assert_eq!(host.physics_ticks, 0);
    }

    #[test]
    fn test_begin_connect_issues_nonblocking_connect() {
        let mut host = TestHost::default();
        let (mut session, socket) = remote_session();
        session.begin_connect_at(&mut host, Instant::now());

        let socket = socket.borrow();
        assert_eq!(socket.blocking, Some(false));
        assert_eq!(socket.connected_to, Some(("10.0.0.1".to_string(), 25565)));
        assert!(session.remote().unwrap().state().is_connecting());
        assert!(!session.is_disconnected());
    }

    #[test]
    fn test_immediate_connect_error_fails() {
        let mut host = TestHost::default();
        let (mut session, socket) = remote_session();
        socket.borrow_mut().connect_error = Some(std::io::ErrorKind::ConnectionRefused);
        session.begin_connect_at(&mut host, Instant::now());

        assert!(session.is_disconnected());
        assert_eq!(host.disconnects[0].title, "Failed to connect to 10.0.0.1:25565");
        assert!(socket.borrow().closed);
    }

    #[test]
    fn test_connect_timeout_disconnects() {
        let mut host = TestHost::default();
        let (mut session, socket) = remote_session();
        let start = Instant::now();
        session.begin_connect_at(&mut host, start);

        session.tick_at(&mut host, start + Duration::from_secs(3), STEP);
        assert!(!session.is_disconnected());
        assert!((host.progress[0] - 0.2).abs() < 1e-4);

        session.tick_at(&mut host, start + Duration::from_secs(16), STEP);
        assert!(session.is_disconnected());
        assert_eq!(
            host.disconnects,
            vec![DisconnectMessage::new(
                "Failed to connect to 10.0.0.1:25565",
                "You failed to connect to the server. It's probably down!"
            )]
        );
        assert!(socket.borrow().written.is_empty());
        assert_eq!(session.ticks(), 0);
    }

    #[test]
    fn test_pending_socket_error_disconnects() {
        let mut host = TestHost::default();
        let (mut session, socket) = remote_session();
        let start = Instant::now();
        session.begin_connect_at(&mut host, start);
        socket.borrow_mut().pending_error = Some(std::io::ErrorKind::ConnectionRefused);

        session.tick_at(&mut host, start, STEP);
        assert!(session.is_disconnected());
        assert_eq!(host.disconnects.len(), 1);
    }

    #[test]
    fn test_connect_completion_sends_exactly_one_login() {
        let mut host = TestHost::default();
        let (mut session, socket) = remote_session();
        let start = Instant::now();
        session.begin_connect_at(&mut host, start);
        socket.borrow_mut().connected = true;

        session.tick_at(&mut host, start + Duration::from_secs(1), STEP);
        {
            let socket = socket.borrow();
            assert_eq!(socket.writes, 1);
            assert_eq!(socket.written.len(), size::LOGIN);
            assert_eq!(socket.written[0], opcode::LOGIN);
            assert_eq!(socket.blocking, Some(true));
        }
        assert_eq!(host.progress.last(), Some(&0.0));
        assert_eq!(session.ticks(), 0);

        let remote = session.remote().unwrap();
        assert!(remote.state().is_connected());
        assert_eq!(remote.table().registered(), 3);
        assert_eq!(remote.last_packet_at(), Some(start + Duration::from_secs(1)));

        // Later ticks do not log in again.
        session.tick_at(&mut host, start + Duration::from_secs(2), STEP);
        assert_eq!(socket.borrow().writes, 1);
        assert_eq!(session.ticks(), 1);
    }

    #[test]
    fn test_connected_ticks_dispatch_and_subsample() {
        let mut host = TestHost::default();
        let start = Instant::now();
        let (mut session, socket) = connected_session(&mut host, start);

        socket.borrow_mut().push_inbound(&[PING, PING]);
        session.tick_at(&mut host, start, STEP);
        assert_eq!(session.remote().unwrap().last_opcode(), Some(PING));
        assert!(socket.borrow().inbound.is_empty());

        for _ in 0..5 {
            session.tick_at(&mut host, start, STEP);
        }
        // Ticks 0 and 3.
        assert_eq!(host.net_ticks, 2);
    }

    #[test]
    fn test_burst_of_server_pings_all_echoed() {
        let mut host = TestHost::default();
        let start = Instant::now();
        let (mut session, socket) = connected_session(&mut host, start);

        let mut burst = Vec::new();
        for sequence in 0..200u16 {
            burst.push(opcode::TWO_WAY_PING);
            burst.push(1);
            burst.extend_from_slice(&sequence.to_be_bytes());
        }
        socket.borrow_mut().push_inbound(&burst);
        session.tick_at(&mut host, start, STEP);

        assert!(!session.is_disconnected(), "{:?}", host.disconnects);
        let socket = socket.borrow();
        assert_eq!(socket.written.len(), 200 * size::TWO_WAY_PING);
        assert_eq!(&socket.written[..4], &[opcode::TWO_WAY_PING, 1, 0, 0]);
        assert_eq!(&socket.written[796..], &[opcode::TWO_WAY_PING, 1, 0, 199]);
    }

    #[test]
    fn test_kick_packet_disconnects_with_reason() {
        let mut host = TestHost::default();
        let start = Instant::now();
        let (mut session, socket) = connected_session(&mut host, start);

        socket.borrow_mut().push_inbound(&kick_packet("Banned"));
        session.tick_at(&mut host, start, STEP);

        assert!(session.is_disconnected());
        assert_eq!(host.disconnects, vec![DisconnectMessage::new("Kicked", "Banned")]);
        assert!(socket.borrow().closed);
    }

    #[test]
    fn test_invalid_opcode_disconnects() {
        let mut host = TestHost::default();
        let start = Instant::now();
        let (mut session, socket) = connected_session(&mut host, start);

        socket.borrow_mut().push_inbound(&[0x99, 0, 0]);
        session.tick_at(&mut host, start, STEP);

        assert!(session.is_disconnected());
        assert_eq!(host.disconnects[0].reason, "Server sent invalid packet!");
    }

    #[test]
    fn test_read_error_disconnects() {
        let mut host = TestHost::default();
        let start = Instant::now();
        let (mut session, socket) = connected_session(&mut host, start);

        socket.borrow_mut().fail_available = true;
        session.tick_at(&mut host, start, STEP);
        assert_eq!(host.disconnects[0].reason, "I/O error when reading packets");
    }

    #[test]
    fn test_orderly_close_detected_after_rate_limit() {
        let mut host = TestHost::default();
        let start = Instant::now();
        let (mut session, socket) = connected_session(&mut host, start);
        socket.borrow_mut().peer_closed = true;

        // Not yet quiet for long enough.
        session.tick_at(&mut host, start + Duration::from_secs(29), Duration::from_secs(1));
        assert!(!session.is_disconnected());

        let quiet = start + Duration::from_secs(31);
        let interval = Duration::from_millis(400);
        session.tick_at(&mut host, quiet, interval);
        session.tick_at(&mut host, quiet, interval);
        assert!(!session.is_disconnected());

        session.tick_at(&mut host, quiet, interval);
        assert!(session.is_disconnected());
        assert_eq!(
            host.disconnects,
            vec![DisconnectMessage::new(
                "Disconnected!",
                "You've lost connection to the server"
            )]
        );
    }

    #[test]
    fn test_quiet_but_open_connection_survives() {
        let mut host = TestHost::default();
        let start = Instant::now();
        let (mut session, _socket) = connected_session(&mut host, start);

        for secs in 31..40 {
            session.tick_at(&mut host, start + Duration::from_secs(secs), Duration::from_secs(1));
        }
        assert!(!session.is_disconnected());
    }

    #[test]
    fn test_long_chat_is_four_flushed_parts() {
        let mut host = TestHost::default();
        let start = Instant::now();
        let (mut session, socket) = connected_session(&mut host, start);

        let text = format!(
            "{}{}{}{}",
            "a".repeat(STRING_SIZE),
            "b".repeat(STRING_SIZE),
            "c".repeat(STRING_SIZE),
            "d".repeat(5)
        );
        session.send_chat(&mut host, &text);

        let socket = socket.borrow();
        assert_eq!(socket.writes, 4);
        assert_eq!(socket.written.len(), 4 * size::MESSAGE);
        let packets: Vec<&[u8]> = socket.written.chunks(size::MESSAGE).collect();
        for (packet, fill) in packets.iter().zip([b'a', b'b', b'c']) {
            assert_eq!(packet[0], opcode::MESSAGE);
            assert!(packet[2..].iter().all(|&b| b == fill));
        }
        assert_eq!(&packets[3][2..7], b"ddddd");
    }

    #[test]
    fn test_partial_flag_only_with_capability() {
        let mut host = TestHost::default();
        let start = Instant::now();
        let (mut session, socket) = connected_session(&mut host, start);
        session.capabilities.partial_messages = true;

        session.send_chat(&mut host, &"z".repeat(STRING_SIZE + 1));
        let socket = socket.borrow();
        assert_eq!(socket.written[1], 1);
        assert_eq!(socket.written[size::MESSAGE + 1], 0);
    }

    #[test]
    fn test_sends_dropped_while_connecting() {
        let mut host = TestHost::default();
        let (mut session, socket) = remote_session();
        session.begin_connect_at(&mut host, Instant::now());

        session.send_chat(&mut host, "hello");
        session.send_block(&mut host, BlockPos::new(0, 0, 0), BLOCK_AIR, 1);
        session.send_position(&PlayerPose::default());
        assert_eq!(socket.borrow().writes, 0);
    }

    #[test]
    fn test_removing_block_sends_delete_with_held_block() {
        let mut host = TestHost {
            selected: 7,
            ..Default::default()
        };
        let start = Instant::now();
        let (mut session, socket) = connected_session(&mut host, start);

        session.send_block(&mut host, BlockPos::new(1, 2, 3), 4, BLOCK_AIR);
        session.send_block(&mut host, BlockPos::new(1, 2, 3), BLOCK_AIR, 5);

        let socket = socket.borrow();
        let packets: Vec<&[u8]> = socket.written.chunks(size::SET_BLOCK).collect();
        assert_eq!(&packets[0][7..], &[0, 7]);
        assert_eq!(&packets[1][7..], &[1, 5]);
    }

    #[test]
    fn test_player_click_needs_capability() {
        let mut host = TestHost::default();
        let start = Instant::now();
        let (mut session, socket) = connected_session(&mut host, start);
        let click = PlayerClick {
            button: crate::protocol::MouseButton::Left,
            pressed: true,
            target_entity: None,
            picked: None,
            yaw: 0.0,
            pitch: 0.0,
        };

        session.send_player_click(&click);
        assert_eq!(socket.borrow().writes, 0);

        session.capabilities.player_click = true;
        session.send_player_click(&click);
        assert_eq!(socket.borrow().written.len(), size::PLAYER_CLICK);
    }

    #[test]
    fn test_write_failure_is_deferred() {
        let mut host = TestHost::default();
        let start = Instant::now();
        let (mut session, socket) = connected_session(&mut host, start);

        socket.borrow_mut().fail_writes = true;
        session.send_chat(&mut host, "hello");
        assert!(session.remote().unwrap().write_failed());
        assert!(!session.is_disconnected());

        // A kick already on the wire is still read and shown.
        socket.borrow_mut().push_inbound(&kick_packet("Server closed"));
        session.tick_at(&mut host, start, STEP);
        assert_eq!(host.disconnects, vec![DisconnectMessage::new("Kicked", "Server closed")]);
    }

    #[test]
    fn test_write_failure_escalates_at_liveness_check() {
        let mut host = TestHost::default();
        let start = Instant::now();
        let (mut session, socket) = connected_session(&mut host, start);

        socket.borrow_mut().fail_writes = true;
        session.send_position(&PlayerPose::default());
        session.tick_at(&mut host, start + Duration::from_secs(5), STEP);
        assert!(!session.is_disconnected());

        session.tick_at(&mut host, start + Duration::from_secs(31), Duration::from_secs(1));
        assert!(session.is_disconnected());
        assert_eq!(host.disconnects[0].title, "Disconnected!");
    }

    #[test]
    fn test_free_closes_once_and_stops_ticking() {
        let mut host = TestHost::default();
        let start = Instant::now();
        let (mut session, socket) = connected_session(&mut host, start);

        session.free(&mut host);
        session.free(&mut host);
        assert!(session.is_disconnected());
        assert!(socket.borrow().closed);
        assert_eq!(host.simulation_freed, 0);

        let ticks = session.ticks();
        socket.borrow_mut().push_inbound(&[0x99]);
        session.tick_at(&mut host, start, STEP);
        assert_eq!(session.ticks(), ticks);
        assert!(host.disconnects.is_empty());
    }

    #[test]
    fn test_reset_clears_protocol_state() {
        let mut host = TestHost::default();
        let start = Instant::now();
        let (mut session, socket) = connected_session(&mut host, start);
        socket.borrow_mut().fail_writes = true;
        session.send_chat(&mut host, "x");

        session.reset(&mut host);
        let remote = session.remote().unwrap();
        assert_eq!(remote.table().registered(), 0);
        assert!(!remote.write_failed());
        assert_eq!(host.protocol_resets, 1);
        assert!(session.is_disconnected());
        assert!(socket.borrow().closed);
    }

    #[test]
    fn test_reset_and_new_map_ignored_in_singleplayer() {
        let mut host = TestHost::default();
        let mut session = Session::new(SessionConfig::singleplayer("Player"));
        session.reset(&mut host);
        session.on_new_map(&mut host);
        assert_eq!(host.protocol_resets, 0);
        assert_eq!(host.entities_removed, 0);
        assert!(!session.is_disconnected());
    }

    #[test]
    fn test_new_map_removes_entities() {
        let mut host = TestHost::default();
        let (mut session, _) = remote_session();
        session.on_new_map(&mut host);
        assert_eq!(host.entities_removed, 1);
    }

    #[test]
    fn test_texture_pack_prompt_then_download() {
        let mut host = TestHost {
            with_resources: true,
            ..Default::default()
        };
        let (mut session, _) = remote_session();
        let url = "http://example.com/pack.zip";

        session.request_texture_pack(&mut host, url);
        assert_eq!(host.prompts, vec![url.to_string()]);
        assert!(host.http.issued.is_empty());

        session.download_texture_pack(&mut host, url);
        assert_eq!(host.http.issued.len(), 1);
        assert_eq!(host.cache.extracted, vec![url.to_string()]);
    }

    #[test]
    fn test_texture_pack_error_reported_on_coarse_tick() {
        let mut host = TestHost {
            with_resources: true,
            ..Default::default()
        };
        let start = Instant::now();
        let (mut session, _socket) = connected_session(&mut host, start);

        session.tick_at(&mut host, start, STEP);
        assert!(host.chat.is_empty());

        host.http.completed.insert(
            TEXTURE_PACK_REQUEST_KEY.to_string(),
            FetchResult {
                status: 500,
                ..Default::default()
            },
        );
        // Ticks 1 and 2 are not coarse.
        session.tick_at(&mut host, start, STEP);
        session.tick_at(&mut host, start, STEP);
        assert!(host.chat.is_empty());

        session.tick_at(&mut host, start, STEP);
        assert_eq!(host.chat, vec!["500 error when trying to download texture pack"]);
        assert!(!session.is_disconnected());
    }
}
