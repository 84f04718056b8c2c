//! The seam between the session and the embedding game.
//!
//! Everything outside the transport (chat display, world state, entities,
//! physics, the texture-pack cache) is reached through [`GameHost`]. Only the
//! two notifications every game must react to are required; the rest default
//! to doing nothing.

use std::path::Path;

use crate::error::{DisconnectMessage, SessionError};
use crate::packet_table::{PacketContext, PacketTable};
use crate::protocol::{BLOCK_AIR, BlockId, BlockPos};
use crate::resources::Resources;

/// Dimensions and seed for a freshly generated singleplayer world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldGenRequest {
    /// Blocks along X.
    pub width: u32,
    /// Blocks along Y.
    pub height: u32,
    /// Blocks along Z.
    pub length: u32,
    /// Non-negative generator seed.
    pub seed: i32,
}

impl WorldGenRequest {
    /// The default singleplayer world size.
    pub const DEFAULT_WIDTH: u32 = 128;
    /// The default singleplayer world height.
    pub const DEFAULT_HEIGHT: u32 = 64;
    /// The default singleplayer world length.
    pub const DEFAULT_LENGTH: u32 = 128;

    /// A default-sized world with the given seed.
    pub fn with_seed(seed: i32) -> Self {
        Self {
            width: Self::DEFAULT_WIDTH,
            height: Self::DEFAULT_HEIGHT,
            length: Self::DEFAULT_LENGTH,
            seed,
        }
    }
}

/// Callbacks into the game that owns the session.
pub trait GameHost: Sized {
    /// The session ended; show `message` to the player.
    fn on_disconnect(&mut self, message: &DisconnectMessage);

    /// Append a line to the chat log.
    fn add_chat(&mut self, text: &str);

    /// Name used for the chat log file.
    fn set_chat_log_name(&mut self, _name: &str) {}

    /// Allow placing and deleting every block type.
    fn grant_all_block_permissions(&mut self) {}

    /// Load a map file dropped onto the game.
    fn load_map(&mut self, _path: &Path) {}

    /// Start generating a new local world.
    fn generate_world(&mut self, _request: WorldGenRequest) {}

    /// Advance the local simulation by one coarse step.
    fn physics_tick(&mut self) {}

    /// A block changed in the local world.
    fn physics_block_changed(&mut self, _pos: BlockPos, _old: BlockId, _new: BlockId) {}

    /// Release local simulation resources.
    fn free_simulation(&mut self) {}

    /// Progress of the current connect attempt, in `0.0..=1.0`.
    fn on_loading_progress(&mut self, _progress: f32) {}

    /// Block currently held by the player.
    fn selected_block(&self) -> BlockId {
        BLOCK_AIR
    }

    /// Populate the inbound packet table. Called on every successful connect,
    /// after the table has been cleared.
    fn register_packets(_table: &mut PacketTable<Self>) -> Result<(), SessionError> {
        Ok(())
    }

    /// Forget protocol state (negotiated extensions, handler-side buffers).
    fn reset_protocol(&mut self) {}

    /// Periodic protocol work, e.g. position updates and latency probes.
    /// Anything staged in `ctx.outbound` is flushed afterwards.
    fn net_tick(_ctx: &mut PacketContext<'_, Self>) {}

    /// Remove every entity except the local player.
    fn remove_all_entities(&mut self) {}

    /// The stray byte after a HackControl packet was skipped.
    fn on_hack_control_resync(&mut self) {}

    /// Ask the player whether to download the texture pack at `url`.
    fn show_texture_pack_prompt(&mut self, _url: &str) {}

    /// HTTP client and texture cache, if the game has them.
    fn resources(&mut self) -> Option<Resources<'_>> {
        None
    }
}
