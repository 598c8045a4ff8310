mod common;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tempfile::tempdir;

use parcelcam::config::{SaveMode, Settings, SettingsStore};
use parcelcam::network::UploadTransport;
use parcelcam::session::{
    Detection, Phase, ScanMode, Session, SessionCommand, SessionHandle, SessionOptions,
    SessionState,
};
use parcelcam::storage::{DeliveryOutcome, Journal, MediaStore};

use common::{closed_port, settings_in, spawn_upload_server, ScriptedCamera};

const WAIT: Duration = Duration::from_secs(10);

fn options() -> SessionOptions {
    SessionOptions {
        success_display: Duration::from_millis(300),
        tick: Duration::from_millis(20),
    }
}

fn start(settings: Settings, camera: ScriptedCamera) -> Result<SessionHandle> {
    let journal = Journal::open(&settings)?;
    let session = Session::new(
        SettingsStore::in_memory(settings),
        Box::new(camera),
        UploadTransport::new()?,
        Some(journal),
        options(),
    );
    let (handle, _task) = session.spawn();
    Ok(handle)
}

async fn wait<F>(handle: &SessionHandle, predicate: F) -> SessionState
where
    F: Fn(&SessionState) -> bool,
{
    tokio::time::timeout(WAIT, handle.wait_for(predicate))
        .await
        .expect("timed out waiting for session state")
        .expect("session stopped")
}

/// Scan, confirm and stop one recording
async fn record(handle: &SessionHandle, barcode: &str) -> Result<()> {
    handle
        .send(SessionCommand::BarcodeDetected(Detection::keyboard(barcode)))
        .await?;
    wait(handle, |s| s.phase == Phase::Confirming).await;

    handle.send(SessionCommand::Confirm).await?;
    wait(handle, |s| s.phase == Phase::Recording && s.status == "Recording").await;

    handle.send(SessionCommand::StopRecording).await?;
    Ok(())
}

fn library_files(settings: &Settings) -> Vec<String> {
    MediaStore::from_settings(settings)
        .list_library()
        .unwrap()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

fn scratch_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}

#[tokio::test]
async fn local_mode_saves_to_library_and_resets() -> Result<()> {
    let tmp = tempdir()?;
    let settings = settings_in(tmp.path());
    let (camera, log) = ScriptedCamera::new(b"fake mp4 bytes");
    let handle = start(settings.clone(), camera)?;

    record(&handle, "SF 100/1").await?;
    let done = wait(&handle, |s| s.phase == Phase::Success).await;
    assert_eq!(done.saved_file_name, "SF_100_1.mp4");
    assert_eq!(done.status, "Saved SF_100_1.mp4");
    assert_eq!(done.recording_count, 1);

    let next = wait(&handle, |s| s.phase == Phase::Scanning).await;
    assert_eq!(next.recording_count, 1);
    assert!(next.scanned_barcode.is_empty());
    assert!(next.recorded_file.is_none());

    assert_eq!(library_files(&settings), vec!["SF_100_1.mp4"]);
    assert!(scratch_is_empty(&settings.storage.scratch_dir));
    assert_eq!(log.lock().unwrap().closed, 1, "camera released on reset");

    handle.send(SessionCommand::Shutdown).await?;
    let journal = Journal::open(&settings)?;
    let deliveries = journal.find_by_tracking("SF 100/1")?;
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].outcome, DeliveryOutcome::SavedLocal);
    Ok(())
}

#[tokio::test]
async fn save_dialog_waits_for_acceptance() -> Result<()> {
    let tmp = tempdir()?;
    let mut settings = settings_in(tmp.path());
    settings.delivery.confirm_save = true;
    let (camera, _log) = ScriptedCamera::new(b"bytes");
    let handle = start(settings.clone(), camera)?;

    record(&handle, "ASK1").await?;
    let dialog = wait(&handle, |s| s.phase == Phase::SaveDialog).await;
    assert!(dialog.recorded_file.is_some());
    assert!(library_files(&settings).is_empty());

    handle.send(SessionCommand::AcceptSave).await?;
    wait(&handle, |s| s.phase == Phase::Success).await;
    assert_eq!(library_files(&settings), vec!["ASK1.mp4"]);
    Ok(())
}

#[tokio::test]
async fn network_mode_without_server_saves_locally() -> Result<()> {
    let tmp = tempdir()?;
    let mut settings = settings_in(tmp.path());
    settings.delivery.save_mode = SaveMode::Network;
    settings.delivery.server_address = "   ".to_string();
    let (camera, _log) = ScriptedCamera::new(b"bytes");
    let handle = start(settings.clone(), camera)?;

    record(&handle, "NOSERVER").await?;
    let done = wait(&handle, |s| s.phase == Phase::Success).await;
    assert_eq!(done.status, "Saved NOSERVER.mp4");
    assert_eq!(library_files(&settings), vec!["NOSERVER.mp4"]);
    Ok(())
}

#[tokio::test]
async fn network_mode_uploads_and_deletes_scratch() -> Result<()> {
    let (port, received) =
        spawn_upload_server(200, r#"{"message":"File saved: UP1.mp4","verified":true}"#).await;

    let tmp = tempdir()?;
    let mut settings = settings_in(tmp.path());
    settings.provision_server("127.0.0.1", port);
    let (camera, _log) = ScriptedCamera::new(b"uploaded bytes");
    let handle = start(settings.clone(), camera)?;

    record(&handle, "UP1").await?;
    let done = wait(&handle, |s| s.phase == Phase::Success).await;
    assert_eq!(done.status, "Upload succeeded");
    assert_eq!(done.saved_file_name, "File saved: UP1.mp4");
    assert_eq!(done.upload_progress, 100);

    let uploads = received.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].tracking_number.as_deref(), Some("UP1"));
    assert_eq!(uploads[0].bytes, b"uploaded bytes");

    assert!(library_files(&settings).is_empty());
    assert!(scratch_is_empty(&settings.storage.scratch_dir));
    Ok(())
}

#[tokio::test]
async fn unverified_upload_is_flagged() -> Result<()> {
    let (port, _received) = spawn_upload_server(200, r#"{"verified":false}"#).await;

    let tmp = tempdir()?;
    let mut settings = settings_in(tmp.path());
    settings.provision_server("127.0.0.1", port);
    let (camera, _log) = ScriptedCamera::new(b"bytes");
    let handle = start(settings, camera)?;

    record(&handle, "UNVERIFIED").await?;
    let done = wait(&handle, |s| s.phase == Phase::Success).await;
    assert_eq!(done.status, "Upload succeeded (not verified by server)");
    Ok(())
}

#[tokio::test]
async fn failed_upload_falls_back_to_library() -> Result<()> {
    let tmp = tempdir()?;
    let mut settings = settings_in(tmp.path());
    settings.provision_server("127.0.0.1", closed_port());
    let (camera, _log) = ScriptedCamera::new(b"bytes");
    let handle = start(settings.clone(), camera)?;

    record(&handle, "FALLBACK").await?;
    let done = wait(&handle, |s| s.phase == Phase::Success).await;
    assert!(
        done.status.starts_with("Saved locally (upload failed: Connection refused"),
        "{}",
        done.status
    );
    assert_eq!(done.recording_count, 1);
    assert_eq!(library_files(&settings), vec!["FALLBACK.mp4"]);
    assert!(scratch_is_empty(&settings.storage.scratch_dir));

    handle.send(SessionCommand::Shutdown).await?;
    let deliveries = Journal::open(&settings)?.find_by_tracking("FALLBACK")?;
    assert_eq!(deliveries[0].outcome, DeliveryOutcome::SavedAfterUploadFailure);
    Ok(())
}

#[tokio::test]
async fn empty_recording_reports_error_and_resets() -> Result<()> {
    let tmp = tempdir()?;
    let settings = settings_in(tmp.path());
    let (camera, _log) = ScriptedCamera::new(b"");
    let handle = start(settings.clone(), camera)?;

    record(&handle, "EMPTY").await?;
    let state = wait(&handle, |s| s.error_message.is_some()).await;
    assert_eq!(state.phase, Phase::Scanning);
    assert_eq!(
        state.error_message.as_deref(),
        Some("Recording failed: the video file is missing or empty")
    );
    assert!(library_files(&settings).is_empty());
    Ok(())
}

#[tokio::test]
async fn camera_failure_returns_to_scanning() -> Result<()> {
    let tmp = tempdir()?;
    let settings = settings_in(tmp.path());
    let (mut camera, _log) = ScriptedCamera::new(b"bytes");
    camera.fail_open = true;
    let handle = start(settings, camera)?;

    handle
        .send(SessionCommand::BarcodeDetected(Detection::keyboard("CAM1")))
        .await?;
    wait(&handle, |s| s.phase == Phase::Confirming).await;
    handle.send(SessionCommand::Confirm).await?;

    let state = wait(&handle, |s| s.error_message.is_some()).await;
    assert_eq!(state.phase, Phase::Scanning);
    assert_eq!(
        state.error_message.as_deref(),
        Some("Camera initialization failed: camera unplugged")
    );
    Ok(())
}

#[tokio::test]
async fn repeated_scan_within_debounce_is_ignored() -> Result<()> {
    let tmp = tempdir()?;
    let (camera, _log) = ScriptedCamera::new(b"bytes");
    let handle = start(settings_in(tmp.path()), camera)?;

    handle
        .send(SessionCommand::BarcodeDetected(Detection::keyboard("D1")))
        .await?;
    wait(&handle, |s| s.phase == Phase::Confirming).await;
    handle.send(SessionCommand::Cancel).await?;
    wait(&handle, |s| s.phase == Phase::Scanning).await;

    handle
        .send(SessionCommand::BarcodeDetected(Detection::keyboard("D2")))
        .await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.state().phase, Phase::Scanning);

    tokio::time::sleep(Duration::from_millis(600)).await;
    handle
        .send(SessionCommand::BarcodeDetected(Detection::keyboard("D3")))
        .await?;
    let state = wait(&handle, |s| s.phase == Phase::Confirming).await;
    assert_eq!(state.scanned_barcode, "D3");
    Ok(())
}

#[tokio::test]
async fn server_code_provisions_and_persists() -> Result<()> {
    let tmp = tempdir()?;
    let config_path = tmp.path().join("config.toml");
    let settings = settings_in(tmp.path());
    let (camera, _log) = ScriptedCamera::new(b"bytes");
    let session = Session::new(
        SettingsStore::new(config_path.clone(), settings),
        Box::new(camera),
        UploadTransport::new()?,
        None,
        options(),
    );
    let (handle, _task) = session.spawn();

    handle.send(SessionCommand::ScanServerConfig).await?;
    wait(&handle, |s| s.scan_mode == ScanMode::ServerConfig).await;

    handle
        .send(SessionCommand::BarcodeDetected(Detection::keyboard(
            "192.168.1.20:9000",
        )))
        .await?;
    let state = wait(&handle, |s| s.scan_mode == ScanMode::Parcel).await;
    assert_eq!(state.phase, Phase::Scanning);
    assert_eq!(state.status, "Server set to 192.168.1.20:9000, uploads enabled");

    let stored = Settings::load_from(&config_path)?;
    assert_eq!(stored.delivery.server_address, "192.168.1.20");
    assert_eq!(stored.delivery.server_port, 9000);
    assert_eq!(stored.delivery.save_mode, SaveMode::Network);
    Ok(())
}

#[tokio::test]
async fn host_port_code_provisions_from_parcel_mode() -> Result<()> {
    let tmp = tempdir()?;
    let (camera, _log) = ScriptedCamera::new(b"bytes");
    let handle = start(settings_in(tmp.path()), camera)?;

    handle
        .send(SessionCommand::BarcodeDetected(Detection::keyboard(
            "nas.local:8081",
        )))
        .await?;
    let state = wait(&handle, |s| s.status.starts_with("Server set to")).await;
    assert_eq!(state.phase, Phase::Scanning);
    assert_eq!(state.status, "Server set to nas.local:8081, uploads enabled");
    Ok(())
}

#[tokio::test]
async fn updated_settings_apply_to_next_cycle() -> Result<()> {
    let tmp = tempdir()?;
    let settings = settings_in(tmp.path());
    let (camera, _log) = ScriptedCamera::new(b"bytes");
    let handle = start(settings.clone(), camera)?;

    let mut updated = settings.clone();
    updated.storage.library_dir = tmp.path().join("elsewhere");
    handle
        .send(SessionCommand::UpdateSettings(Box::new(updated.clone())))
        .await?;

    record(&handle, "MOVED").await?;
    wait(&handle, |s| s.phase == Phase::Success).await;
    assert!(library_files(&settings).is_empty());
    assert_eq!(library_files(&updated), vec!["MOVED.mp4"]);
    Ok(())
}

#[tokio::test]
async fn failed_local_save_keeps_recording_until_dismissed() -> Result<()> {
    let tmp = tempdir()?;
    let mut settings = settings_in(tmp.path());
    settings.storage.library_dir = tmp.path().join("library-is-a-file");
    std::fs::write(&settings.storage.library_dir, b"not a directory")?;
    let (camera, _log) = ScriptedCamera::new(b"bytes");
    let handle = start(settings.clone(), camera)?;

    record(&handle, "KEEP1").await?;
    let failed = wait(&handle, |s| s.phase == Phase::Error).await;
    assert_eq!(failed.status, "Save failed");
    assert_eq!(failed.recording_count, 0);

    let kept = failed.recorded_file.clone().expect("recording retained");
    assert!(kept.is_file(), "{} should still exist", kept.display());
    let message = failed.error_message.unwrap_or_default();
    assert!(message.contains(&kept.display().to_string()), "{}", message);

    handle.send(SessionCommand::Dismiss).await?;
    let next = wait(&handle, |s| s.phase == Phase::Scanning).await;
    assert!(next.recorded_file.is_none());
    Ok(())
}

#[tokio::test]
async fn failed_fallback_save_still_reports_upload_failure() -> Result<()> {
    let tmp = tempdir()?;
    let mut settings = settings_in(tmp.path());
    settings.provision_server("127.0.0.1", closed_port());
    settings.storage.library_dir = tmp.path().join("library-is-a-file");
    std::fs::write(&settings.storage.library_dir, b"not a directory")?;
    let (camera, _log) = ScriptedCamera::new(b"bytes");
    let handle = start(settings.clone(), camera)?;

    record(&handle, "FB1").await?;
    let failed = wait(&handle, |s| s.phase == Phase::Error).await;
    assert!(
        failed.status.starts_with("Upload failed: Connection refused"),
        "{}",
        failed.status
    );
    assert!(failed.status.ends_with("local save also failed"), "{}", failed.status);

    let message = failed.error_message.clone().unwrap_or_default();
    assert!(message.contains("Connection refused"), "{}", message);
    assert!(message.contains("local save also failed"), "{}", message);
    assert!(failed.recorded_file.as_deref().is_some_and(Path::is_file));

    handle.send(SessionCommand::Shutdown).await?;
    let deliveries = Journal::open(&settings)?.find_by_tracking("FB1")?;
    assert_eq!(deliveries[0].outcome, DeliveryOutcome::SaveFailed);
    assert!(deliveries[0]
        .detail
        .as_deref()
        .is_some_and(|d| d.contains("Connection refused")));
    Ok(())
}

#[tokio::test]
async fn recording_stops_itself_at_the_duration_limit() -> Result<()> {
    let tmp = tempdir()?;
    let mut settings = settings_in(tmp.path());
    settings.video.max_record_duration_secs = 1;
    let (camera, log) = ScriptedCamera::new(b"bytes");
    let handle = start(settings.clone(), camera)?;

    handle
        .send(SessionCommand::BarcodeDetected(Detection::keyboard("AUTO1")))
        .await?;
    wait(&handle, |s| s.phase == Phase::Confirming).await;
    handle.send(SessionCommand::Confirm).await?;
    wait(&handle, |s| s.phase == Phase::Recording).await;

    let done = wait(&handle, |s| s.phase == Phase::Success).await;
    assert_eq!(done.saved_file_name, "AUTO1.mp4");
    assert_eq!(log.lock().unwrap().stopped, 1);
    assert_eq!(library_files(&settings), vec!["AUTO1.mp4"]);
    Ok(())
}

#[tokio::test]
async fn identical_detections_confirm_once() -> Result<()> {
    let tmp = tempdir()?;
    let (camera, _log) = ScriptedCamera::new(b"bytes");
    let handle = start(settings_in(tmp.path()), camera)?;

    let mut states = handle.subscribe();
    let counter = tokio::spawn(async move {
        let mut entered = 0;
        let mut previous = states.borrow_and_update().phase;
        while states.changed().await.is_ok() {
            let phase = states.borrow_and_update().phase;
            if phase == Phase::Confirming && previous != Phase::Confirming {
                entered += 1;
            }
            previous = phase;
        }
        entered
    });

    for _ in 0..2 {
        handle
            .send(SessionCommand::BarcodeDetected(Detection::keyboard("SAME1")))
            .await?;
    }
    wait(&handle, |s| s.phase == Phase::Confirming).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.send(SessionCommand::Shutdown).await?;

    let entered = tokio::time::timeout(WAIT, counter).await??;
    assert_eq!(entered, 1);
    Ok(())
}
