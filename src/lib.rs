//! parcelcam - Scan a parcel barcode, record a video of the package, and deliver it
//!
//! Videos land either in a local media library or on a LAN server via HTTP
//! multipart upload, with local save as the fallback when the upload fails.

pub mod capture;
pub mod cli;
pub mod config;
pub mod network;
pub mod session;
pub mod storage;

use thiserror::Error;

/// Main error type for parcelcam
#[derive(Error, Debug)]
pub enum ParcelcamError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Capture error: {0}")]
    Capture(#[from] capture::CaptureError),

    #[error("Upload error: {0}")]
    Upload(#[from] network::UploadError),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ParcelcamError>;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "parcelcam";
