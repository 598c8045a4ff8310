//! CLI argument definitions using clap

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// parcelcam - Scan a parcel, record a video of it, deliver it locally or to a LAN server
#[derive(Parser, Debug)]
#[command(name = "parcelcam")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scan-record-deliver loop, reading scans from stdin
    Run {
        /// Print every state change as a JSON line
        #[arg(long)]
        json: bool,

        /// Record a generated test pattern instead of the camera
        #[arg(long)]
        synthetic: bool,
    },

    /// Upload a video file to the LAN server
    Upload {
        /// Video file to upload
        file: PathBuf,

        /// Tracking number sent with the video
        #[arg(short, long)]
        tracking: String,

        /// Server host (defaults to the configured address)
        #[arg(long)]
        host: Option<String>,

        /// Server port (defaults to the configured port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Copy a video file into the local library
    Save {
        /// Video file to save
        file: PathBuf,

        /// Tracking number used for the library file name
        #[arg(short, long)]
        tracking: String,
    },

    /// Check that the LAN server answers
    Ping {
        /// Server host (defaults to the configured address)
        #[arg(long)]
        host: Option<String>,

        /// Server port (defaults to the configured port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// List recent deliveries
    History {
        /// Maximum number of deliveries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check the local setup (ffmpeg, camera, server, library)
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., delivery.server_port)
        key: String,

        /// Value to set
        value: String,
    },

    /// Configure the LAN server from a "<address>:<port>" code
    Provision {
        /// Scanned server code
        payload: String,
    },
}
