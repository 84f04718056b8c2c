//! Classic protocol packet encoders.
//!
//! Each writer stages exactly one fixed-size packet into an [`OutboundBuffer`].
//! Multi-byte integers are big-endian; strings are [`STRING_SIZE`] bytes,
//! space padded, with anything outside ASCII replaced by `?`.

use crate::error::SessionError;
use crate::outbound::OutboundBuffer;

/// Fixed length of every protocol string, and the chat split size.
pub const STRING_SIZE: usize = 64;

/// Protocol version sent in the login packet.
pub const PROTOCOL_VERSION: u8 = 7;

/// Entity id the client uses for itself.
pub const SELF_ENTITY_ID: u8 = 0xFF;

/// Login padding byte that advertises protocol extension support.
const CPE_MAGIC: u8 = 0x42;

/// Client → server opcodes.
pub mod opcode {
    /// Player identification (login).
    pub const LOGIN: u8 = 0x00;
    /// Set block.
    pub const SET_BLOCK: u8 = 0x05;
    /// Position and orientation.
    pub const POSITION: u8 = 0x08;
    /// Chat message.
    pub const MESSAGE: u8 = 0x0D;
    /// Extended: supported extension count.
    pub const EXT_INFO: u8 = 0x10;
    /// Extended: one supported extension.
    pub const EXT_ENTRY: u8 = 0x11;
    /// Extended: player click.
    pub const PLAYER_CLICK: u8 = 0x22;
    /// Extended: two-way ping.
    pub const TWO_WAY_PING: u8 = 0x2B;
}

/// Packet sizes including the opcode byte.
pub mod size {
    /// Login packet.
    pub const LOGIN: usize = 131;
    /// Set block packet.
    pub const SET_BLOCK: usize = 9;
    /// Position packet.
    pub const POSITION: usize = 10;
    /// Chat message packet.
    pub const MESSAGE: usize = 66;
    /// Extension info packet.
    pub const EXT_INFO: usize = 67;
    /// Extension entry packet.
    pub const EXT_ENTRY: usize = 69;
    /// Player click packet.
    pub const PLAYER_CLICK: usize = 15;
    /// Two-way ping packet.
    pub const TWO_WAY_PING: usize = 4;
}

/// Block type id. Zero is air.
pub type BlockId = u8;

/// The air block.
pub const BLOCK_AIR: BlockId = 0;

/// Integer block coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockPos {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate (up).
    pub y: i32,
    /// Z coordinate.
    pub z: i32,
}

impl BlockPos {
    /// Construct a position.
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Player position and orientation in world units and degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerPose {
    /// Feet position.
    pub position: [f32; 3],
    /// Horizontal rotation in degrees.
    pub yaw: f32,
    /// Vertical head rotation in degrees.
    pub pitch: f32,
}

/// Mouse button reported in a player click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    /// Left button.
    Left = 0,
    /// Right button.
    Right = 1,
    /// Middle button.
    Middle = 2,
}

/// Block face hit by a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickedBlock {
    /// Block that was hit.
    pub pos: BlockPos,
    /// Face index of the hit.
    pub face: u8,
}

/// A mouse click to report to servers that negotiated click events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerClick {
    /// Which button.
    pub button: MouseButton,
    /// Pressed (true) or released (false).
    pub pressed: bool,
    /// Entity under the cursor, if any.
    pub target_entity: Option<u8>,
    /// Block under the cursor, if any.
    pub picked: Option<PickedBlock>,
    /// Player yaw in degrees at the time of the click.
    pub yaw: f32,
    /// Player pitch in degrees at the time of the click.
    pub pitch: f32,
}

fn put_u16(dst: &mut [u8], value: u16) {
    dst[..2].copy_from_slice(&value.to_be_bytes());
}

fn put_coord(dst: &mut [u8], value: i32) {
    put_u16(dst, value as i16 as u16);
}

fn put_string(dst: &mut [u8], text: &str) {
    let field = &mut dst[..STRING_SIZE];
    field.fill(b' ');
    for (slot, ch) in field.iter_mut().zip(text.chars()) {
        *slot = if ch.is_ascii() { ch as u8 } else { b'?' };
    }
}

/// Decode a space-padded protocol string, trimming the padding.
pub fn read_string(src: &[u8]) -> String {
    let field = &src[..STRING_SIZE.min(src.len())];
    let end = field.iter().rposition(|&b| b != b' ').map_or(0, |idx| idx + 1);
    field[..end]
        .iter()
        .map(|&b| if b.is_ascii() { char::from(b) } else { '?' })
        .collect()
}

fn degrees_to_packed(degrees: f32) -> u8 {
    (degrees.rem_euclid(360.0) * 256.0 / 360.0) as u32 as u8
}

fn degrees_to_short(degrees: f32) -> u16 {
    (degrees.rem_euclid(360.0) * 65536.0 / 360.0) as u32 as u16
}

/// Split chat text into parts of at most [`STRING_SIZE`] characters, in order.
pub fn chat_parts(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text;
    while rest.chars().count() > STRING_SIZE {
        let split = rest
            .char_indices()
            .nth(STRING_SIZE)
            .map_or(rest.len(), |(idx, _)| idx);
        let (part, tail) = rest.split_at(split);
        parts.push(part);
        rest = tail;
    }
    parts.push(rest);
    parts
}

/// Stage the login handshake.
pub fn write_login(
    out: &mut OutboundBuffer,
    username: &str,
    mppass: &str,
    cpe: bool,
) -> Result<(), SessionError> {
    let data = out.stage(size::LOGIN)?;
    data[0] = opcode::LOGIN;
    data[1] = PROTOCOL_VERSION;
    put_string(&mut data[2..], username);
    put_string(&mut data[66..], mppass);
    data[130] = if cpe { CPE_MAGIC } else { 0 };
    Ok(())
}

/// Stage a block place (`place = true`) or delete.
pub fn write_set_block(
    out: &mut OutboundBuffer,
    pos: BlockPos,
    place: bool,
    block: BlockId,
) -> Result<(), SessionError> {
    let data = out.stage(size::SET_BLOCK)?;
    data[0] = opcode::SET_BLOCK;
    put_coord(&mut data[1..], pos.x);
    put_coord(&mut data[3..], pos.y);
    put_coord(&mut data[5..], pos.z);
    data[7] = u8::from(place);
    data[8] = block;
    Ok(())
}

/// Stage a position/orientation update in 5-bit fixed point.
pub fn write_position(out: &mut OutboundBuffer, pose: &PlayerPose) -> Result<(), SessionError> {
    let data = out.stage(size::POSITION)?;
    data[0] = opcode::POSITION;
    data[1] = SELF_ENTITY_ID;
    for (axis, value) in pose.position.iter().enumerate() {
        put_coord(&mut data[2 + axis * 2..], (value * 32.0) as i32);
    }
    data[8] = degrees_to_packed(pose.yaw);
    data[9] = degrees_to_packed(pose.pitch);
    Ok(())
}

/// Stage one chat part. `partial` marks that more parts follow, and is only
/// sent when the server negotiated partial messages.
pub fn write_chat(
    out: &mut OutboundBuffer,
    text: &str,
    partial: bool,
    supports_partial: bool,
) -> Result<(), SessionError> {
    let data = out.stage(size::MESSAGE)?;
    data[0] = opcode::MESSAGE;
    data[1] = if supports_partial {
        u8::from(partial)
    } else {
        SELF_ENTITY_ID
    };
    put_string(&mut data[2..], text);
    Ok(())
}

/// Stage a player click event.
pub fn write_player_click(
    out: &mut OutboundBuffer,
    click: &PlayerClick,
) -> Result<(), SessionError> {
    let data = out.stage(size::PLAYER_CLICK)?;
    data[0] = opcode::PLAYER_CLICK;
    data[1] = click.button as u8;
    data[2] = u8::from(!click.pressed);
    put_u16(&mut data[3..], degrees_to_short(click.yaw));
    put_u16(&mut data[5..], degrees_to_short(click.pitch));
    data[7] = click.target_entity.unwrap_or(SELF_ENTITY_ID);

    match click.picked {
        Some(picked) => {
            put_coord(&mut data[8..], picked.pos.x);
            put_coord(&mut data[10..], picked.pos.y);
            put_coord(&mut data[12..], picked.pos.z);
            data[14] = picked.face;
        }
        None => {
            data[8..14].fill(0xFF);
            data[14] = 0xFF;
        }
    }
    Ok(())
}

/// Stage a client-initiated two-way ping carrying `sequence`.
pub fn write_two_way_ping(out: &mut OutboundBuffer, sequence: u16) -> Result<(), SessionError> {
    let data = out.stage(size::TWO_WAY_PING)?;
    data[0] = opcode::TWO_WAY_PING;
    data[1] = 0;
    put_u16(&mut data[2..], sequence);
    Ok(())
}

/// Stage the echo of a server-initiated two-way ping.
pub fn write_two_way_ping_reply(
    out: &mut OutboundBuffer,
    sequence: u16,
) -> Result<(), SessionError> {
    let data = out.stage(size::TWO_WAY_PING)?;
    data[0] = opcode::TWO_WAY_PING;
    data[1] = 1;
    put_u16(&mut data[2..], sequence);
    Ok(())
}

/// Stage the client's extension announcement.
pub fn write_ext_info(
    out: &mut OutboundBuffer,
    app_name: &str,
    extension_count: u16,
) -> Result<(), SessionError> {
    let data = out.stage(size::EXT_INFO)?;
    data[0] = opcode::EXT_INFO;
    put_string(&mut data[1..], app_name);
    put_u16(&mut data[65..], extension_count);
    Ok(())
}

/// Stage one supported extension.
pub fn write_ext_entry(
    out: &mut OutboundBuffer,
    name: &str,
    version: i32,
) -> Result<(), SessionError> {
    let data = out.stage(size::EXT_ENTRY)?;
    data[0] = opcode::EXT_ENTRY;
    put_string(&mut data[1..], name);
    data[65..69].copy_from_slice(&version.to_be_bytes());
    Ok(())
}
