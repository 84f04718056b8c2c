//! Singleplayer backend. There is no network; changes go straight to the host.

use std::path::Path;

use rand::Rng;
use tracing::info;

use crate::host::{GameHost, WorldGenRequest};
use crate::protocol::{self, BlockId, BlockPos};
use crate::session::{Capabilities, SessionConfig};

/// Name of the chat log used for singleplayer sessions.
pub const SINGLEPLAYER_LOG_NAME: &str = "Singleplayer";

/// State of a local session.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    username: String,
    classic_mode: bool,
}

impl LocalBackend {
    /// Create a backend for the given identity.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            username: config.username.clone(),
            classic_mode: config.classic_mode,
        }
    }

    /// Capabilities a local session always has.
    pub fn init_capabilities(&self, capabilities: &mut Capabilities) {
        capabilities.partial_messages = true;
        capabilities.full_cp437 = !self.classic_mode;
    }

    /// Path of a map file dropped onto the game, if the identity names one.
    ///
    /// Launchers pass the dropped file as the username, so anything that looks
    /// like a path and exists is treated as a map.
    pub fn dropped_map(&self) -> Option<&Path> {
        let looks_like_path = self.username.contains('/') || self.username.contains('\\');
        let path = Path::new(&self.username);
        (looks_like_path && path.is_file()).then_some(path)
    }

    /// Open permissions, then either load the dropped map or generate a world.
    pub fn begin_connect<H: GameHost>(&mut self, host: &mut H) {
        host.set_chat_log_name(SINGLEPLAYER_LOG_NAME);
        host.grant_all_block_permissions();

        if let Some(path) = self.dropped_map() {
            info!(path = %path.display(), "loading dropped map");
            host.load_map(path);
            return;
        }

        let seed = rand::rng().random_range(0..i32::MAX);
        info!(seed, "generating singleplayer world");
        host.generate_world(WorldGenRequest::with_seed(seed));
    }

    /// Coarse simulation step.
    pub fn tick<H: GameHost>(&mut self, host: &mut H) {
        host.physics_tick();
    }

    /// Apply a block change to the local simulation.
    pub fn send_block<H: GameHost>(&mut self, host: &mut H, pos: BlockPos, old: BlockId, new: BlockId) {
        host.physics_block_changed(pos, old, new);
    }

    /// Echo chat to the local log, split the same way a server would receive it.
    pub fn send_chat<H: GameHost>(&mut self, host: &mut H, text: &str) {
        if text.is_empty() {
            return;
        }
        for part in protocol::chat_parts(text) {
            host.add_chat(part);
        }
    }

    /// Release the simulation.
    pub fn free<H: GameHost>(&mut self, host: &mut H) {
        host.free_simulation();
    }
}
