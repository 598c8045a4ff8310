//! Recording lifecycle on top of a capture device

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::CameraSettings;

use super::{CameraControl, CaptureDevice, CaptureError, RecordingProfile};

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Initializing,
    Ready,
    Recording,
    Stopping,
}

/// Events emitted by the controller.
///
/// Every started recording ends in exactly one `Completed` or `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Ready,
    Started(PathBuf),
    Status { elapsed: Duration },
    Paused,
    Resumed,
    Completed(PathBuf),
    Failed(String),
}

/// Outcome of applying camera settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlReport {
    pub applied: Vec<CameraControl>,
    pub skipped: Vec<(CameraControl, String)>,
}

struct ActiveRecording {
    path: PathBuf,
    started_at: Instant,
    paused_at: Option<Instant>,
    paused_total: Duration,
    max_duration: Option<Duration>,
}

impl ActiveRecording {
    fn elapsed(&self, now: Instant) -> Duration {
        let paused_now = self
            .paused_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default();
        now.saturating_duration_since(self.started_at)
            .saturating_sub(self.paused_total + paused_now)
    }
}

/// Owns one capture device and at most one recording
pub struct CaptureController {
    device: Box<dyn CaptureDevice>,
    state: CaptureState,
    events: mpsc::UnboundedSender<CaptureEvent>,
    active: Option<ActiveRecording>,
}

impl CaptureController {
    pub fn new(device: Box<dyn CaptureDevice>) -> (Self, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let controller = Self {
            device,
            state: CaptureState::Idle,
            events,
            active: None,
        };
        (controller, rx)
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn backend_name(&self) -> &'static str {
        self.device.backend_name()
    }

    /// Acquire the camera. Only the first call touches the device.
    pub fn initialize(&mut self) {
        if self.state != CaptureState::Idle {
            debug!("Camera already initialized");
            self.emit(CaptureEvent::Ready);
            return;
        }

        self.state = CaptureState::Initializing;
        match self.device.open() {
            Ok(()) => {
                self.state = CaptureState::Ready;
                info!("Camera ready ({})", self.device.backend_name());
                self.emit(CaptureEvent::Ready);
            }
            Err(e) => {
                self.state = CaptureState::Idle;
                warn!("Camera initialization failed: {}", e);
                self.emit(CaptureEvent::Failed(format!(
                    "Camera initialization failed: {}",
                    e
                )));
            }
        }
    }

    /// Push camera settings to the device, one control at a time
    pub fn apply_settings(&mut self, camera: &CameraSettings) -> ControlReport {
        let mut report = ControlReport::default();

        if self.state == CaptureState::Idle || self.state == CaptureState::Initializing {
            for control in CameraControl::ALL {
                report
                    .skipped
                    .push((control, CaptureError::NotReady.to_string()));
            }
            return report;
        }

        let supported = self.device.controls();
        for control in CameraControl::ALL {
            if !supported.contains(&control) {
                debug!("Skipping {}: not supported", control.label());
                report
                    .skipped
                    .push((control, "not supported".to_string()));
                continue;
            }

            let result = match control {
                CameraControl::Exposure => self
                    .device
                    .set_exposure_compensation(camera.exposure_compensation),
                CameraControl::WhiteBalance => self
                    .device
                    .set_white_balance(camera.white_balance_mode, camera.effective_temperature()),
                CameraControl::Focus => self.device.set_focus_mode(camera.focus_mode),
                CameraControl::Iso => self.device.set_iso(camera.iso_auto, camera.iso),
                CameraControl::Zoom => self.device.set_zoom_ratio(camera.zoom_ratio),
            };

            match result {
                Ok(()) => report.applied.push(control),
                Err(e) => {
                    warn!("Failed to apply {}: {}", control.label(), e);
                    report.skipped.push((control, e.to_string()));
                }
            }
        }

        report
    }

    /// Start recording to the path resolved for `tracking_id`.
    ///
    /// Fails without side effects when a recording is already running or the
    /// camera is not ready.
    pub fn start_recording<F>(
        &mut self,
        tracking_id: &str,
        resolve_path: F,
        profile: &RecordingProfile,
    ) -> Result<PathBuf, CaptureError>
    where
        F: FnOnce(&str) -> PathBuf,
    {
        if self.active.is_some() {
            warn!("Ignoring start request: already recording");
            return Err(CaptureError::AlreadyRecording);
        }
        if self.state != CaptureState::Ready {
            return Err(CaptureError::NotReady);
        }

        let path = resolve_path(tracking_id);
        self.device.start(&path, profile)?;

        self.state = CaptureState::Recording;
        self.active = Some(ActiveRecording {
            path: path.clone(),
            started_at: Instant::now(),
            paused_at: None,
            paused_total: Duration::ZERO,
            max_duration: profile.max_duration,
        });

        info!(
            "Recording {} at {}x{} to {}",
            tracking_id,
            profile.width,
            profile.height,
            path.display()
        );
        self.emit(CaptureEvent::Started(path.clone()));
        Ok(path)
    }

    /// Finalize the running recording. No-op when nothing is recording.
    pub fn stop_recording(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        self.state = CaptureState::Stopping;
        let result = self.device.stop();
        self.state = CaptureState::Ready;

        match result {
            Ok(()) => {
                info!("Recording finished: {}", active.path.display());
                self.emit(CaptureEvent::Completed(active.path));
            }
            Err(e) => {
                warn!("Recording failed: {}", e);
                self.emit(CaptureEvent::Failed(format!("Recording failed: {}", e)));
            }
        }
    }

    pub fn pause(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.paused_at.is_some() {
            return;
        }

        match self.device.pause() {
            Ok(()) => {
                active.paused_at = Some(Instant::now());
                self.emit(CaptureEvent::Paused);
            }
            Err(CaptureError::Unsupported(_)) => debug!("Pause not supported, ignoring"),
            Err(e) => warn!("Failed to pause recording: {}", e),
        }
    }

    pub fn resume(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let Some(paused_at) = active.paused_at else {
            return;
        };

        match self.device.resume() {
            Ok(()) => {
                active.paused_total += paused_at.elapsed();
                active.paused_at = None;
                self.emit(CaptureEvent::Resumed);
            }
            Err(CaptureError::Unsupported(_)) => debug!("Resume not supported, ignoring"),
            Err(e) => warn!("Failed to resume recording: {}", e),
        }
    }

    /// Periodic check while recording: device failures, the duration limit,
    /// and a status tick.
    pub fn poll(&mut self) {
        if self.active.is_none() {
            return;
        }

        if let Some(message) = self.device.poll_failure() {
            self.active = None;
            if let Err(e) = self.device.stop() {
                debug!("Cleanup after recorder failure: {}", e);
            }
            self.state = CaptureState::Ready;
            warn!("Recorder failed: {}", message);
            self.emit(CaptureEvent::Failed(message));
            return;
        }

        let Some(active) = self.active.as_ref() else {
            return;
        };
        let elapsed = active.elapsed(Instant::now());

        if let Some(max) = active.max_duration {
            if elapsed >= max {
                info!("Maximum recording duration reached ({:?})", max);
                self.stop_recording();
                return;
            }
        }

        self.emit(CaptureEvent::Status { elapsed });
    }

    /// Finalize any recording and close the camera
    pub fn release(&mut self) {
        self.stop_recording();

        if self.state != CaptureState::Idle {
            self.device.close();
            self.state = CaptureState::Idle;
            debug!("Camera released");
        }
    }

    fn emit(&self, event: CaptureEvent) {
        // The receiver is gone only while shutting down.
        let _ = self.events.send(event);
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.release();
    }
}
