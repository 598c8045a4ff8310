//! parcelcam - Scan a parcel, record a video of it, deliver it locally or to a LAN server
//!
//! Entry point for the parcelcam CLI application.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use parcelcam::cli::{Cli, Commands};
use parcelcam::config::{Settings, SettingsStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Completions { shell } => {
            parcelcam::cli::completions::print(shell);
        }
        command => {
            // Load configuration only for runtime commands.
            let settings = Settings::load()?;

            match command {
                Commands::Run { json, synthetic } => {
                    let store = SettingsStore::new(Settings::config_path()?, settings);
                    parcelcam::cli::console::run(store, json, synthetic).await?;
                }
                Commands::Upload {
                    file,
                    tracking,
                    host,
                    port,
                } => {
                    parcelcam::cli::commands::upload_video(&settings, file, tracking, host, port)
                        .await?;
                }
                Commands::Save { file, tracking } => {
                    parcelcam::cli::commands::save_video(&settings, file, tracking).await?;
                }
                Commands::Ping { host, port } => {
                    parcelcam::cli::commands::ping_server(&settings, host, port).await?;
                }
                Commands::History { limit, json } => {
                    parcelcam::cli::commands::show_history(&settings, limit, json).await?;
                }
                Commands::Doctor { json } => {
                    parcelcam::cli::commands::run_doctor(&settings, json).await?;
                }
                Commands::Config(config_cmd) => {
                    parcelcam::cli::commands::config_command(&settings, config_cmd)?;
                }
                Commands::Completions { .. } => unreachable!(),
            }
        }
    }

    Ok(())
}
