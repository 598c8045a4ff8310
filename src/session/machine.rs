//! Session actor: barcode → record → save or upload → reset

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureController, CaptureDevice, CaptureEvent, RecordingProfile};
use crate::config::{SaveMode, Settings, SettingsStore};
use crate::network::{ConnectionProbe, UploadEvent, UploadRequest, UploadTransport};
use crate::storage::{Delivery, DeliveryOutcome, Journal, MediaStore};
use crate::{ParcelcamError, Result};

use super::gate::{parse_server_payload, BarcodeGate, Detection, ServerAddress};
use super::state::{Phase, ScanMode, SessionState, StateStore};

/// Inputs from the UI and the barcode detector
#[derive(Debug, Clone)]
pub enum SessionCommand {
    BarcodeDetected(Detection),
    Confirm,
    Cancel,
    StopRecording,
    PauseRecording,
    ResumeRecording,
    AcceptSave,
    Dismiss,
    ScanServerConfig,
    UpdateSettings(Box<Settings>),
    TestConnection,
    Shutdown,
}

/// Timing knobs
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// How long the success screen stays before the next scan
    pub success_display: Duration,
    /// Recorder polling period
    pub tick: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            success_display: Duration::from_secs(2),
            tick: Duration::from_millis(250),
        }
    }
}

/// Upload in flight, kept so a failure can fall back to the same file
struct PendingUpload {
    tracking_number: String,
    file: PathBuf,
    destination: String,
}

/// Owns the session state and every collaborator that mutates it
pub struct Session {
    settings: SettingsStore,
    state: StateStore,
    capture: CaptureController,
    capture_events: mpsc::UnboundedReceiver<CaptureEvent>,
    media: MediaStore,
    transport: UploadTransport,
    journal: Option<Journal>,
    gate: BarcodeGate,
    options: SessionOptions,
    upload_tx: mpsc::UnboundedSender<UploadEvent>,
    upload_rx: mpsc::UnboundedReceiver<UploadEvent>,
    probe_tx: mpsc::UnboundedSender<ConnectionProbe>,
    probe_rx: mpsc::UnboundedReceiver<ConnectionProbe>,
    pending_upload: Option<PendingUpload>,
    reset_at: Option<Instant>,
}

impl Session {
    pub fn new(
        settings: SettingsStore,
        device: Box<dyn CaptureDevice>,
        transport: UploadTransport,
        journal: Option<Journal>,
        options: SessionOptions,
    ) -> Self {
        let (capture, capture_events) = CaptureController::new(device);
        let (upload_tx, upload_rx) = mpsc::unbounded_channel();
        let (probe_tx, probe_rx) = mpsc::unbounded_channel();
        let media = MediaStore::from_settings(settings.get());

        Self {
            settings,
            state: StateStore::default(),
            capture,
            capture_events,
            media,
            transport,
            journal,
            gate: BarcodeGate::default(),
            options,
            upload_tx,
            upload_rx,
            probe_tx,
            probe_rx,
            pending_upload: None,
            reset_at: None,
        }
    }

    /// Start the actor on the current runtime
    pub fn spawn(self) -> (SessionHandle, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(32);
        let handle = SessionHandle {
            commands,
            state: self.state.subscribe(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        info!(
            "Session started ({} delivery, {} capture)",
            self.settings.get().delivery.save_mode.label(),
            self.capture.backend_name()
        );

        let mut tick = tokio::time::interval(self.options.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let reset_at = self.reset_at;
            let reset_timer = async move {
                match reset_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.capture_events.recv() => self.handle_capture_event(event).await,
                Some(event) = self.upload_rx.recv() => self.handle_upload_event(event).await,
                Some(probe) = self.probe_rx.recv() => self.handle_probe(probe),
                _ = tick.tick() => self.capture.poll(),
                _ = reset_timer => self.reset(),
            }
        }

        self.capture.release();
        info!("Session stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        debug!("Session command: {:?}", command);
        let phase = self.state.get().phase;

        match command {
            SessionCommand::BarcodeDetected(detection) => self.on_barcode(detection),
            SessionCommand::Confirm => {
                if phase != Phase::Confirming {
                    return;
                }
                self.state.update(|s| {
                    s.phase = Phase::Recording;
                    s.error_message = None;
                    s.elapsed_secs = 0;
                    s.paused = false;
                    s.status = "Starting camera...".to_string();
                });
                self.capture.initialize();
            }
            SessionCommand::Cancel => match phase {
                Phase::Confirming => self.reset(),
                Phase::Scanning => self.state.update(|s| {
                    s.scan_mode = ScanMode::Parcel;
                    s.status.clear();
                }),
                _ => debug!("Cancel ignored while {}", phase.label()),
            },
            SessionCommand::StopRecording => {
                if phase == Phase::Recording && self.capture.is_recording() {
                    self.state
                        .update(|s| s.status = "Finishing recording...".to_string());
                    self.capture.stop_recording();
                }
            }
            SessionCommand::PauseRecording => {
                if phase == Phase::Recording {
                    self.capture.pause();
                }
            }
            SessionCommand::ResumeRecording => {
                if phase == Phase::Recording {
                    self.capture.resume();
                }
            }
            SessionCommand::AcceptSave => {
                if phase == Phase::SaveDialog {
                    self.deliver().await;
                }
            }
            SessionCommand::Dismiss => match phase {
                Phase::Error | Phase::Success => self.reset(),
                _ => self.state.update(|s| s.error_message = None),
            },
            SessionCommand::ScanServerConfig => {
                if phase == Phase::Scanning {
                    self.state.update(|s| {
                        s.scan_mode = ScanMode::ServerConfig;
                        s.status = "Scan the server QR code".to_string();
                    });
                }
            }
            SessionCommand::UpdateSettings(settings) => {
                if let Err(e) = self.settings.replace(*settings) {
                    warn!("Failed to persist settings: {}", e);
                }
                self.media = MediaStore::from_settings(self.settings.get());
                info!("Settings updated");
            }
            SessionCommand::TestConnection => {
                let delivery = &self.settings.get().delivery;
                let (host, port) = (delivery.server_address.clone(), delivery.server_port);
                self.state
                    .update(|s| s.status = format!("Testing connection to {}:{}...", host, port));
                self.transport
                    .spawn_test_connection(host, port, self.probe_tx.clone());
            }
            SessionCommand::Shutdown => {}
        }
    }
}

impl Session {
    fn on_barcode(&mut self, detection: Detection) {
        let state = self.state.get();
        if state.phase != Phase::Scanning {
            debug!("Ignoring barcode while {}", state.phase.label());
            return;
        }
        if !self.gate.accept(&detection, std::time::Instant::now()) {
            return;
        }

        if let Some(server) = parse_server_payload(&detection.value, state.scan_mode) {
            self.provision(server);
            return;
        }

        if state.scan_mode == ScanMode::ServerConfig {
            warn!("Not a server code: {}", detection.value);
            self.state
                .update(|s| s.status = format!("Not a server code: {}", detection.value));
            return;
        }

        let value = detection.value.trim().to_string();
        info!("Scanned {}", value);
        self.state.update(|s| {
            s.phase = Phase::Confirming;
            s.status = format!("Scanned {}, confirm to record", value);
            s.scanned_barcode = value;
            s.error_message = None;
        });
    }

    fn provision(&mut self, server: ServerAddress) {
        info!("Provisioning server {}:{}", server.host, server.port);
        if let Err(e) = self
            .settings
            .update(|s| s.provision_server(&server.host, server.port))
        {
            warn!("Failed to persist server settings: {}", e);
        }
        self.state.update(|s| {
            s.scan_mode = ScanMode::Parcel;
            s.status = format!(
                "Server set to {}:{}, uploads enabled",
                server.host, server.port
            );
        });
    }

    async fn handle_capture_event(&mut self, event: CaptureEvent) {
        let state = self.state.get();
        if state.phase != Phase::Recording {
            debug!("Ignoring {:?} while {}", event, state.phase.label());
            return;
        }

        match event {
            CaptureEvent::Ready => self.start_recording(&state.scanned_barcode),
            CaptureEvent::Started(_) => self.state.update(|s| s.status = "Recording".to_string()),
            CaptureEvent::Status { elapsed } => {
                let secs = elapsed.as_secs();
                if secs != state.elapsed_secs {
                    self.state.update(|s| s.elapsed_secs = secs);
                }
            }
            CaptureEvent::Paused => self.state.update(|s| {
                s.paused = true;
                s.status = "Paused".to_string();
            }),
            CaptureEvent::Resumed => self.state.update(|s| {
                s.paused = false;
                s.status = "Recording".to_string();
            }),
            CaptureEvent::Completed(path) => {
                self.on_recording_complete(&state.scanned_barcode, path)
                    .await
            }
            CaptureEvent::Failed(message) => self.fail_capture(&state.scanned_barcode, message),
        }
    }

    fn start_recording(&mut self, tracking_number: &str) {
        if self.capture.is_recording() {
            return;
        }

        let settings = self.settings.get();
        let report = self.capture.apply_settings(&settings.camera);
        if !report.skipped.is_empty() {
            debug!(
                "Applied {} camera controls, skipped {}",
                report.applied.len(),
                report.skipped.len()
            );
        }

        let profile = RecordingProfile::from_settings(settings);
        let media = &self.media;
        if let Err(e) =
            self.capture
                .start_recording(tracking_number, |id| media.local_path(id), &profile)
        {
            self.fail_capture(tracking_number, format!("Failed to start recording: {}", e));
        }
    }

    async fn on_recording_complete(&mut self, tracking_number: &str, path: PathBuf) {
        let size = tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        if size == 0 {
            self.fail_capture(
                tracking_number,
                "Recording failed: the video file is missing or empty".to_string(),
            );
            return;
        }

        info!("Recorded {} ({} bytes)", path.display(), size);
        self.state.update(|s| {
            s.recorded_file = Some(path);
            s.paused = false;
        });

        if self.settings.get().delivery.confirm_save {
            self.state.update(|s| {
                s.phase = Phase::SaveDialog;
                s.status = "Recording finished, save it?".to_string();
            });
        } else {
            self.deliver().await;
        }
    }

    fn fail_capture(&mut self, tracking_number: &str, message: String) {
        warn!("Capture failed for {}: {}", tracking_number, message);
        self.capture.release();
        self.record(
            Delivery::new(tracking_number, DeliveryOutcome::CaptureFailed).with_detail(&message),
        );
        self.state.update(|s| {
            let mut next = SessionState::reset_from(s);
            next.error_message = Some(message);
            *s = next;
        });
    }

    /// Route the recorded file by save mode
    async fn deliver(&mut self) {
        let state = self.state.get();
        let Some(file) = state.recorded_file.clone() else {
            warn!("Nothing to deliver");
            return;
        };
        let tracking_number = state.scanned_barcode.clone();
        let delivery = self.settings.get().delivery.clone();

        match delivery.save_mode {
            SaveMode::Network if delivery.server_configured() => {
                let host = delivery.server_address.trim().to_string();
                let destination = format!("{}:{}", host, delivery.server_port);
                self.state.update(|s| {
                    s.phase = Phase::Uploading;
                    s.upload_progress = 0;
                    s.status = format!("Connecting to server {}...", destination);
                });
                self.pending_upload = Some(PendingUpload {
                    tracking_number: tracking_number.clone(),
                    file: file.clone(),
                    destination,
                });
                self.transport.upload(
                    UploadRequest {
                        host,
                        port: delivery.server_port,
                        file,
                        tracking_number,
                    },
                    self.upload_tx.clone(),
                );
            }
            SaveMode::Network => {
                info!("No server configured, saving locally");
                self.state.update(|s| {
                    s.phase = Phase::SavingLocal;
                    s.upload_progress = 0;
                    s.status = "Server address not configured, saving locally...".to_string();
                });
                self.save_local(&tracking_number, file, None).await;
            }
            SaveMode::Local => {
                self.state.update(|s| {
                    s.phase = Phase::SavingLocal;
                    s.status = "Saving...".to_string();
                });
                self.save_local(&tracking_number, file, None).await;
            }
        }
    }

    async fn handle_upload_event(&mut self, event: UploadEvent) {
        if self.pending_upload.is_none() {
            debug!("Ignoring stale upload event {:?}", event);
            return;
        }

        match event {
            UploadEvent::Progress { percent, .. } => self.state.update(|s| {
                s.upload_progress = s.upload_progress.max(percent);
                s.status = match s.upload_progress {
                    0 => "Uploading...".to_string(),
                    100 => "Upload complete".to_string(),
                    p => format!("Uploading {}%", p),
                };
            }),
            UploadEvent::Success {
                message,
                verified,
                duration_secs,
            } => {
                let Some(upload) = self.pending_upload.take() else {
                    return;
                };
                let size = tokio::fs::metadata(&upload.file)
                    .await
                    .ok()
                    .map(|meta| meta.len());
                self.media.delete_scratch(&upload.file);
                info!(
                    "Uploaded {} to {} (verified: {}, duration {:.1}s)",
                    upload.tracking_number, upload.destination, verified, duration_secs
                );

                let mut delivery = Delivery::new(&upload.tracking_number, DeliveryOutcome::Uploaded)
                    .with_destination(upload.destination)
                    .with_detail(&message);
                if let Some(size) = size {
                    delivery = delivery.with_size(size);
                }
                self.record(delivery);

                self.state.update(|s| {
                    s.phase = Phase::Success;
                    s.upload_progress = 100;
                    s.recording_count += 1;
                    s.recorded_file = None;
                    s.status = if verified {
                        "Upload succeeded".to_string()
                    } else {
                        "Upload succeeded (not verified by server)".to_string()
                    };
                    s.saved_file_name = message;
                });
                self.schedule_reset();
            }
            UploadEvent::Error(reason) => {
                let Some(upload) = self.pending_upload.take() else {
                    return;
                };
                warn!(
                    "Upload to {} failed: {}, saving locally",
                    upload.destination, reason
                );
                self.state.update(|s| {
                    s.phase = Phase::SavingLocal;
                    s.status = format!("Upload failed: {}, saving locally...", reason);
                });
                self.save_local(&upload.tracking_number, upload.file, Some(reason))
                    .await;
            }
        }
    }

    /// Commit to the library; the scratch file is only removed once the copy is visible
    async fn save_local(
        &mut self,
        tracking_number: &str,
        file: PathBuf,
        upload_failure: Option<String>,
    ) {
        let size = tokio::fs::metadata(&file).await.ok().map(|meta| meta.len());
        let media = self.media.clone();
        let (tracking, source) = (tracking_number.to_string(), file.clone());
        let committed =
            match tokio::task::spawn_blocking(move || media.commit_to_library(&tracking, &source))
                .await
            {
                Ok(committed) => committed,
                Err(e) => {
                    error!("Library commit task failed: {}", e);
                    None
                }
            };

        match committed {
            Some(visible) => {
                self.media.delete_scratch(&file);
                let name = visible
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();

                let (outcome, status) = match &upload_failure {
                    Some(reason) => (
                        DeliveryOutcome::SavedAfterUploadFailure,
                        format!("Saved locally (upload failed: {})", reason),
                    ),
                    None => (DeliveryOutcome::SavedLocal, format!("Saved {}", name)),
                };

                let mut delivery = Delivery::new(tracking_number, outcome)
                    .with_destination(visible.display().to_string());
                if let Some(reason) = upload_failure {
                    delivery = delivery.with_detail(reason);
                }
                if let Some(size) = size {
                    delivery = delivery.with_size(size);
                }
                self.record(delivery);

                self.state.update(|s| {
                    s.phase = Phase::Success;
                    s.recording_count += 1;
                    s.recorded_file = None;
                    s.saved_file_name = name;
                    s.status = status;
                });
                self.schedule_reset();
            }
            None => {
                let (status, message) = match &upload_failure {
                    Some(reason) => (
                        format!("Upload failed: {}; local save also failed", reason),
                        format!(
                            "Upload failed: {}; local save also failed, the recording was kept at {}",
                            reason,
                            file.display()
                        ),
                    ),
                    None => (
                        "Save failed".to_string(),
                        format!("Save failed, the recording was kept at {}", file.display()),
                    ),
                };
                error!("{}", message);
                self.record(
                    Delivery::new(tracking_number, DeliveryOutcome::SaveFailed)
                        .with_destination(file.display().to_string())
                        .with_detail(&message),
                );
                self.state.update(|s| {
                    s.phase = Phase::Error;
                    s.status = status;
                    s.error_message = Some(message);
                });
            }
        }
    }

    fn handle_probe(&mut self, probe: ConnectionProbe) {
        if probe.reachable {
            info!("Server reachable");
        } else {
            warn!("Server unreachable: {}", probe.message);
        }
        self.state.update(|s| {
            s.status = if probe.reachable {
                "Server reachable".to_string()
            } else {
                format!("Server unreachable: {}", probe.message)
            };
            s.connection = Some(probe);
        });
    }

    fn schedule_reset(&mut self) {
        self.reset_at = Some(Instant::now() + self.options.success_display);
    }

    /// Back to scanning; the camera is released before the new state is published
    fn reset(&mut self) {
        self.capture.release();
        self.reset_at = None;
        self.pending_upload = None;
        let fresh = SessionState::reset_from(&self.state.get());
        self.state.replace(fresh);
        debug!("Ready for the next scan");
    }

    /// Journal writes are best effort
    fn record(&self, delivery: Delivery) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record(&delivery) {
                warn!("Failed to record delivery in journal: {}", e);
            }
        }
    }
}

/// Cloneable front end of a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ParcelcamError::Session("Session has stopped".to_string()))
    }

    /// Latest snapshot
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait until the state satisfies `predicate`
    pub async fn wait_for<F>(&self, predicate: F) -> Result<SessionState>
    where
        F: Fn(&SessionState) -> bool,
    {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|state| predicate(state))
            .await
            .map_err(|_| ParcelcamError::Session("Session has stopped".to_string()))?;
        Ok(state.clone())
    }
}
