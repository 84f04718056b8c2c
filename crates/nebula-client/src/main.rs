//! Headless classic-protocol client.
//!
//! Loads `config.ron`, applies command-line overrides, then runs one session
//! at the configured tick rate until it ends.

mod headless;
mod platform;

use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use nebula_config::{CliArgs, Config};
use nebula_session::{Session, SessionConfig, TickDriver};
use tracing::{error, info};

use crate::headless::HeadlessClient;
use crate::platform::ClientDirs;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let dirs = ClientDirs::resolve(args.config.as_deref());
    if let Err(e) = dirs.create_dirs() {
        eprintln!("Failed to initialize client directories: {e}");
        return ExitCode::FAILURE;
    }

    let mut config = match Config::load_or_create(&dirs.config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config, using defaults: {e}");
            Config::default()
        }
    };
    config.apply_cli_overrides(&args);

    nebula_log::init_logging(Some(&dirs.log_dir), cfg!(debug_assertions), Some(&config));
    info!("config: {}", dirs.config_dir.display());

    let session_config = SessionConfig::from_network(&config.network);
    if session_config.is_singleplayer() {
        info!("Starting singleplayer as {}", session_config.username);
    } else {
        info!(
            "Connecting to {} as {}",
            session_config.endpoint(),
            session_config.username
        );
    }

    let mut host = HeadlessClient::new();
    let mut session = Session::new(session_config);
    session.begin_connect(&mut host);

    let mut driver = TickDriver::new(config.network.net_tick_rate);
    while !session.is_disconnected() {
        driver.advance(|interval| session.tick(&mut host, interval));
        std::thread::sleep(driver.time_until_next(Instant::now()));
    }
    info!("{} chat lines received", host.chat.len());

    match host.disconnect {
        Some(message) => {
            error!("{}: {}", message.title, message.reason);
            ExitCode::FAILURE
        }
        None => ExitCode::SUCCESS,
    }
}
