//! CLI module for parcelcam
//!
//! Contains argument parsing, the interactive scan loop, and one-shot commands.

pub mod args;
pub mod commands;
pub mod completions;
pub mod console;

pub use args::{Cli, Commands, ConfigCommand};
