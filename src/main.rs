//! # adjimg
//!
//! Opens a single noise-filled window on the running Wayland compositor and
//! waits for `q`.

use std::process::ExitCode;

use adjimg::{logging, ClientConfig, ExitReason, FATAL_EXIT_STATUS};
use clap::Parser;
use log::{debug, error, info};

#[derive(Parser)]
#[command(name = "adjimg")]
#[command(about = "A minimal Wayland client that shows a noise-filled window until q is pressed")]
#[command(version)]
struct Cli {}

fn main() -> ExitCode {
    let _cli = Cli::parse();

    logging::init();

    info!("🚀 Starting adjimg");
    info!("📄 Version: {}", adjimg::VERSION);

    let config = ClientConfig::default();
    match config.to_toml_string() {
        Ok(rendered) => debug!("🔧 Effective configuration:\n{}", rendered),
        Err(e) => debug!("Could not render configuration: {}", e),
    }

    match adjimg::run(config) {
        Ok(ExitReason::QuitKey) => {
            info!("✅ Exiting on quit key");
            ExitCode::SUCCESS
        }
        Ok(ExitReason::ConnectionClosed) => {
            info!("✅ Exiting after compositor disconnect");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("❌ {}", e);
            ExitCode::from(FATAL_EXIT_STATUS)
        }
    }
}
