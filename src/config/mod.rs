//! Configuration module for parcelcam
//!
//! Handles loading, persisting and mutating application settings stored as TOML.

mod settings;
mod store;

pub use settings::{
    CameraSettings, CaptureSettings, DeliverySettings, FocusMode, GeneralSettings, SaveMode,
    Settings, StorageSettings, VideoResolution, VideoSettings, WhiteBalanceMode,
};
pub use store::SettingsStore;
