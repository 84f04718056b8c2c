//! A headless [`GameHost`]: logs what the server sends and answers the
//! handshake, with no world or renderer behind it.

use nebula_session::protocol::{
    self, STRING_SIZE, write_ext_entry, write_ext_info, write_two_way_ping,
    write_two_way_ping_reply,
};
use nebula_session::{
    DisconnectMessage, GameHost, OutboundBuffer, PacketContext, PacketTable, SessionError,
    WorldGenRequest,
};
use tracing::{debug, info, trace, warn};

/// Server → client opcodes this client understands.
pub mod opcode {
    pub const IDENTIFICATION: u8 = 0x00;
    pub const PING: u8 = 0x01;
    pub const LEVEL_INIT: u8 = 0x02;
    pub const LEVEL_CHUNK: u8 = 0x03;
    pub const LEVEL_FINALIZE: u8 = 0x04;
    pub const SET_BLOCK: u8 = 0x06;
    pub const SPAWN_ENTITY: u8 = 0x07;
    pub const TELEPORT: u8 = 0x08;
    pub const RELATIVE_MOVE_AND_ORIENT: u8 = 0x09;
    pub const RELATIVE_MOVE: u8 = 0x0A;
    pub const ORIENTATION: u8 = 0x0B;
    pub const DESPAWN_ENTITY: u8 = 0x0C;
    pub const MESSAGE: u8 = 0x0D;
    pub const KICK: u8 = 0x0E;
    pub const USER_TYPE: u8 = 0x0F;
    pub const EXT_INFO: u8 = 0x10;
    pub const EXT_ENTRY: u8 = 0x11;
    pub const HACK_CONTROL: u8 = 0x20;
    pub const TWO_WAY_PING: u8 = 0x2B;
}

/// Extensions announced back to the server, with their versions.
pub const SUPPORTED_EXTENSIONS: [(&str, i32); 5] = [
    ("TwoWayPing", 1),
    ("PlayerClick", 1),
    ("LongerMessages", 1),
    ("FullCP437", 1),
    ("HackControl", 1),
];

/// Net ticks between latency pings.
const LATENCY_PING_INTERVAL: u32 = 20;

/// Headless game state.
#[derive(Debug, Default)]
pub struct HeadlessClient {
    /// Chat lines received, newest last.
    pub chat: Vec<String>,
    /// Why the session ended, once it has.
    pub disconnect: Option<DisconnectMessage>,
    /// Bytes of compressed map data received for the current level.
    pub level_bytes: usize,
    /// Whether the server negotiated two-way pings.
    pub two_way_ping: bool,
    ext_remaining: Option<u16>,
    net_ticks: u32,
}

impl HeadlessClient {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GameHost for HeadlessClient {
    fn on_disconnect(&mut self, message: &DisconnectMessage) {
        warn!(title = %message.title, reason = %message.reason, "session ended");
        self.disconnect = Some(message.clone());
    }

    fn add_chat(&mut self, text: &str) {
        info!(target: "chat", "{text}");
        self.chat.push(text.to_string());
    }

    fn generate_world(&mut self, request: WorldGenRequest) {
        info!(
            "Generating {}x{}x{} world with seed {}",
            request.width, request.height, request.length, request.seed
        );
    }

    fn on_loading_progress(&mut self, progress: f32) {
        trace!("connecting: {:.0}%", progress * 100.0);
    }

    fn register_packets(table: &mut PacketTable<Self>) -> Result<(), SessionError> {
        table.register(opcode::IDENTIFICATION, 130, on_identification)?;
        table.register(opcode::PING, 0, on_ping)?;
        table.register(opcode::LEVEL_INIT, 0, on_level_init)?;
        table.register(opcode::LEVEL_CHUNK, 1027, on_level_chunk)?;
        table.register(opcode::LEVEL_FINALIZE, 6, on_level_finalize)?;
        table.register(opcode::SET_BLOCK, 7, on_set_block)?;
        table.register(opcode::SPAWN_ENTITY, 73, on_spawn_entity)?;
        table.register(opcode::TELEPORT, 9, on_entity_moved)?;
        table.register(opcode::RELATIVE_MOVE_AND_ORIENT, 6, on_entity_moved)?;
        table.register(opcode::RELATIVE_MOVE, 4, on_entity_moved)?;
        table.register(opcode::ORIENTATION, 3, on_entity_moved)?;
        table.register(opcode::DESPAWN_ENTITY, 1, on_despawn_entity)?;
        table.register(opcode::MESSAGE, 65, on_message)?;
        table.register(opcode::KICK, STRING_SIZE, on_kick)?;
        table.register(opcode::USER_TYPE, 1, on_user_type)?;
        table.register(opcode::EXT_INFO, 66, on_ext_info)?;
        table.register(opcode::EXT_ENTRY, 68, on_ext_entry)?;
        table.register(opcode::HACK_CONTROL, 7, on_hack_control)?;
        table.register(opcode::TWO_WAY_PING, 3, on_two_way_ping)
    }

    fn reset_protocol(&mut self) {
        self.two_way_ping = false;
        self.ext_remaining = None;
        self.level_bytes = 0;
    }

    fn net_tick(ctx: &mut PacketContext<'_, Self>) {
        ctx.host.net_ticks = ctx.host.net_ticks.wrapping_add(1);
        if !ctx.host.two_way_ping || ctx.host.net_ticks % LATENCY_PING_INTERVAL != 0 {
            return;
        }
        let sequence = ctx.ping.issue_probe();
        if let Err(err) = write_two_way_ping(ctx.outbound, sequence) {
            warn!("dropping latency ping: {err}");
        }
    }

    fn remove_all_entities(&mut self) {
        debug!("removing all entities");
    }

    fn on_hack_control_resync(&mut self) {
        debug!("resynced after HackControl");
    }
}

fn read_u16(src: &[u8]) -> u16 {
    u16::from_be_bytes([src[0], src[1]])
}

fn read_i16(src: &[u8]) -> i16 {
    i16::from_be_bytes([src[0], src[1]])
}

fn on_identification(ctx: &mut PacketContext<'_, HeadlessClient>, payload: &[u8]) {
    ctx.server.name = protocol::read_string(&payload[1..]);
    ctx.server.motd = protocol::read_string(&payload[1 + STRING_SIZE..]);
    info!(
        version = payload[0],
        "Joined {}: {}", ctx.server.name, ctx.server.motd
    );
}

fn on_ping(_ctx: &mut PacketContext<'_, HeadlessClient>, _payload: &[u8]) {}

fn on_level_init(ctx: &mut PacketContext<'_, HeadlessClient>, _payload: &[u8]) {
    ctx.host.level_bytes = 0;
    info!("Receiving map");
}

fn on_level_chunk(ctx: &mut PacketContext<'_, HeadlessClient>, payload: &[u8]) {
    let length = usize::from(read_u16(payload)).min(1024);
    ctx.host.level_bytes += length;
    trace!(percent = payload[1026], "map chunk of {length} bytes");
}

fn on_level_finalize(ctx: &mut PacketContext<'_, HeadlessClient>, payload: &[u8]) {
    let (x, y, z) = (
        read_i16(payload),
        read_i16(&payload[2..]),
        read_i16(&payload[4..]),
    );
    info!(
        "Map loaded: {x}x{y}x{z} ({} compressed bytes)",
        ctx.host.level_bytes
    );
}

fn on_set_block(_ctx: &mut PacketContext<'_, HeadlessClient>, payload: &[u8]) {
    trace!(
        x = read_i16(payload),
        y = read_i16(&payload[2..]),
        z = read_i16(&payload[4..]),
        block = payload[6],
        "set block"
    );
}

fn on_spawn_entity(_ctx: &mut PacketContext<'_, HeadlessClient>, payload: &[u8]) {
    debug!(id = payload[0], "spawned {}", protocol::read_string(&payload[1..]));
}

fn on_entity_moved(_ctx: &mut PacketContext<'_, HeadlessClient>, payload: &[u8]) {
    trace!(id = payload[0], "entity moved");
}

fn on_despawn_entity(_ctx: &mut PacketContext<'_, HeadlessClient>, payload: &[u8]) {
    debug!(id = payload[0], "despawned");
}

fn on_message(ctx: &mut PacketContext<'_, HeadlessClient>, payload: &[u8]) {
    let text = protocol::read_string(&payload[1..]);
    ctx.host.add_chat(&text);
}

fn on_kick(ctx: &mut PacketContext<'_, HeadlessClient>, payload: &[u8]) {
    let reason = protocol::read_string(payload);
    ctx.disconnect("Disconnected!", reason);
}

fn on_user_type(_ctx: &mut PacketContext<'_, HeadlessClient>, payload: &[u8]) {
    debug!(op = payload[0] == 0x64, "user type changed");
}

fn on_ext_info(ctx: &mut PacketContext<'_, HeadlessClient>, payload: &[u8]) {
    let app_name = protocol::read_string(payload);
    let count = read_u16(&payload[STRING_SIZE..]);
    info!("Server software: {app_name} ({count} extensions)");

    ctx.capabilities.needs_d3_fix = app_name.to_ascii_lowercase().starts_with("d3 server");
    ctx.host.ext_remaining = Some(count);
    if count == 0 {
        send_extensions(ctx);
    }
}

fn on_ext_entry(ctx: &mut PacketContext<'_, HeadlessClient>, payload: &[u8]) {
    let name = protocol::read_string(payload);
    let version = i32::from_be_bytes([
        payload[STRING_SIZE],
        payload[STRING_SIZE + 1],
        payload[STRING_SIZE + 2],
        payload[STRING_SIZE + 3],
    ]);
    debug!("server supports {name} v{version}");

    match name.as_str() {
        "TwoWayPing" => ctx.host.two_way_ping = true,
        "PlayerClick" => ctx.capabilities.player_click = true,
        "LongerMessages" => ctx.capabilities.partial_messages = true,
        "FullCP437" => ctx.capabilities.full_cp437 = true,
        _ => {}
    }

    let Some(remaining) = ctx.host.ext_remaining else {
        return;
    };
    let remaining = remaining.saturating_sub(1);
    ctx.host.ext_remaining = Some(remaining);
    if remaining == 0 {
        send_extensions(ctx);
    }
}

/// Answer the server's extension list with ours.
fn send_extensions(ctx: &mut PacketContext<'_, HeadlessClient>) {
    ctx.host.ext_remaining = None;
    if let Err(err) = stage_extensions(ctx.outbound, &ctx.server.app_name) {
        ctx.fail(err);
    }
}

fn stage_extensions(out: &mut OutboundBuffer, app_name: &str) -> Result<(), SessionError> {
    write_ext_info(out, app_name, SUPPORTED_EXTENSIONS.len() as u16)?;
    for (name, version) in SUPPORTED_EXTENSIONS {
        write_ext_entry(out, name, version)?;
    }
    Ok(())
}

fn on_hack_control(_ctx: &mut PacketContext<'_, HeadlessClient>, payload: &[u8]) {
    debug!(flying = payload[0] != 0, noclip = payload[1] != 0, "hack control");
}

fn on_two_way_ping(ctx: &mut PacketContext<'_, HeadlessClient>, payload: &[u8]) {
    let server_initiated = payload[0] != 0;
    let sequence = read_u16(&payload[1..]);
    if server_initiated {
        if let Err(err) = write_two_way_ping_reply(ctx.outbound, sequence) {
            warn!("dropping ping reply: {err}");
        }
    } else {
        ctx.ping.record_reply(sequence);
    }
}
