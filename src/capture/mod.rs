//! Video capture for parcelcam
//!
//! The session drives a [`CaptureController`], which owns exactly one
//! [`CaptureDevice`]. Backends:
//! - ffmpeg (default) - records a V4L2 / AVFoundation / DirectShow camera
//! - synthetic - ffmpeg with a generated test pattern, no camera needed

mod controller;
mod ffmpeg;

pub use controller::{CaptureController, CaptureEvent, CaptureState, ControlReport};
pub use ffmpeg::{FfmpegCapture, FfmpegSource};

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::config::{FocusMode, Settings, WhiteBalanceMode};

/// Capture backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    /// Record the configured camera through ffmpeg
    #[default]
    Ffmpeg,
    /// Record an ffmpeg test pattern
    Synthetic,
}

/// Errors reported by capture devices and the controller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("Camera is not ready")]
    NotReady,

    #[error("{0} is not supported by this camera")]
    Unsupported(String),

    #[error("{0}")]
    Device(String),
}

/// Camera controls a device may expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraControl {
    Exposure,
    WhiteBalance,
    Focus,
    Iso,
    Zoom,
}

impl CameraControl {
    pub const ALL: [CameraControl; 5] = [
        CameraControl::Exposure,
        CameraControl::WhiteBalance,
        CameraControl::Focus,
        CameraControl::Iso,
        CameraControl::Zoom,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Exposure => "exposure compensation",
            Self::WhiteBalance => "white balance",
            Self::Focus => "focus",
            Self::Iso => "ISO",
            Self::Zoom => "zoom",
        }
    }
}

/// Output format requested for one recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingProfile {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate_mbps: u32,
    /// Stop automatically after this much unpaused time
    pub max_duration: Option<Duration>,
}

impl RecordingProfile {
    pub fn from_settings(settings: &Settings) -> Self {
        let max_secs = settings.video.max_record_duration_secs;
        Self {
            width: settings.video.resolution.width(),
            height: settings.video.resolution.height(),
            framerate: settings.capture.framerate.max(1),
            bitrate_mbps: settings.video.bitrate_mbps.max(1),
            max_duration: (max_secs > 0).then(|| Duration::from_secs(u64::from(max_secs))),
        }
    }
}

/// Capability interface of a camera that can record to a file.
///
/// Implementations are driven from a single task and never panic into the
/// caller; every failure comes back as a [`CaptureError`].
pub trait CaptureDevice: Send {
    /// Acquire the camera
    fn open(&mut self) -> Result<(), CaptureError>;

    /// Release the camera, finalizing any recording still running
    fn close(&mut self);

    /// Controls this camera supports
    fn controls(&self) -> Vec<CameraControl>;

    fn set_exposure_compensation(&mut self, ev: i32) -> Result<(), CaptureError>;

    /// `temperature` is `None` in automatic mode
    fn set_white_balance(
        &mut self,
        mode: WhiteBalanceMode,
        temperature: Option<u32>,
    ) -> Result<(), CaptureError>;

    fn set_focus_mode(&mut self, mode: FocusMode) -> Result<(), CaptureError>;

    fn set_iso(&mut self, auto: bool, iso: u32) -> Result<(), CaptureError>;

    fn set_zoom_ratio(&mut self, ratio: f32) -> Result<(), CaptureError>;

    /// Start recording to `output_path`
    fn start(&mut self, output_path: &Path, profile: &RecordingProfile) -> Result<(), CaptureError>;

    /// Stop recording and finalize the file
    fn stop(&mut self) -> Result<(), CaptureError>;

    fn pause(&mut self) -> Result<(), CaptureError> {
        Err(CaptureError::Unsupported("Pause".to_string()))
    }

    fn resume(&mut self) -> Result<(), CaptureError> {
        Err(CaptureError::Unsupported("Resume".to_string()))
    }

    /// Report a failure that happened while recording, if any
    fn poll_failure(&mut self) -> Option<String> {
        None
    }

    /// Get capture backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Create a capture device based on settings
pub fn create_device(settings: &Settings) -> Box<dyn CaptureDevice> {
    match settings.capture.backend {
        CaptureBackend::Ffmpeg => {
            tracing::info!(
                "Using ffmpeg capture backend ({} {})",
                settings.capture.input_format,
                settings.capture.device
            );
            Box::new(FfmpegCapture::new(
                &settings.capture,
                FfmpegSource::Device {
                    input_format: settings.capture.input_format.clone(),
                    device: settings.capture.device.clone(),
                },
            ))
        }
        CaptureBackend::Synthetic => {
            tracing::info!("Using synthetic capture backend");
            Box::new(FfmpegCapture::new(&settings.capture, FfmpegSource::TestPattern))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VideoResolution;

    #[test]
    fn profile_follows_video_settings() {
        let mut settings = Settings::default();
        settings.video.resolution = VideoResolution::P720;
        settings.video.bitrate_mbps = 4;

        let profile = RecordingProfile::from_settings(&settings);
        assert_eq!((profile.width, profile.height), (1280, 720));
        assert_eq!(profile.bitrate_mbps, 4);
        assert_eq!(profile.max_duration, None);

        settings.video.max_record_duration_secs = 90;
        let profile = RecordingProfile::from_settings(&settings);
        assert_eq!(profile.max_duration, Some(Duration::from_secs(90)));
    }

    #[test]
    fn backend_names_are_lowercase_in_config() {
        let toml = toml::to_string(&crate::config::CaptureSettings {
            backend: CaptureBackend::Synthetic,
            ..Default::default()
        })
        .unwrap();
        assert!(toml.contains("backend = \"synthetic\""));
    }
}
