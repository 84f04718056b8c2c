//! Command-line argument parsing for the Nebula client.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Nebula client command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "nebula-client", about = "Headless classic-protocol game client")]
pub struct CliArgs {
    /// Server address. Pass an empty string for singleplayer.
    #[arg(long)]
    pub server: Option<String>,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Player name.
    #[arg(long)]
    pub username: Option<String>,

    /// Server verification key.
    #[arg(long)]
    pub mppass: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(ref name) = args.username {
            self.network.username = name.clone();
        }
        if let Some(ref mppass) = args.mppass {
            self.network.mppass = mppass.clone();
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
