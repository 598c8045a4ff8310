//! CLI command implementations

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tokio::sync::mpsc;

use crate::capture::{CaptureBackend, FfmpegCapture};
use crate::cli::args::ConfigCommand;
use crate::config::Settings;
use crate::network::{UploadEvent, UploadRequest, UploadTransport};
use crate::session::{parse_server_payload, ScanMode};
use crate::storage::{Delivery, DeliveryOutcome, Journal, MediaStore};

/// Upload one video file to the LAN server
pub async fn upload_video(
    settings: &Settings,
    file: PathBuf,
    tracking: String,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let (host, port) = server_target(settings, host, port);
    let size = std::fs::metadata(&file).map(|meta| meta.len()).ok();

    let transport = UploadTransport::new()?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let request = UploadRequest {
        host: host.clone(),
        port,
        file: file.clone(),
        tracking_number: tracking.clone(),
    };
    let task = transport.upload(request, tx);

    let destination = format!("{}:{}", host.trim(), port);
    let mut outcome = None;
    while let Some(event) = rx.recv().await {
        match event {
            UploadEvent::Progress { percent, .. } => {
                eprint!("\rUploading {:>3}%", percent);
                let _ = std::io::stderr().flush();
            }
            UploadEvent::Success {
                message,
                verified,
                duration_secs,
            } => {
                eprintln!();
                println!("{}", message);
                if !verified {
                    println!("(not verified by server)");
                }
                println!("Uploaded to {} in {:.1}s", destination, duration_secs);
                outcome = Some(Ok(message));
            }
            UploadEvent::Error(reason) => {
                eprintln!();
                outcome = Some(Err(reason));
            }
        }
    }
    task.await.context("Upload task failed")?;

    match outcome {
        Some(Ok(message)) => {
            let mut delivery = Delivery::new(&tracking, DeliveryOutcome::Uploaded)
                .with_destination(destination)
                .with_detail(message);
            if let Some(size) = size {
                delivery = delivery.with_size(size);
            }
            record_delivery(settings, &delivery);
            Ok(())
        }
        Some(Err(reason)) => anyhow::bail!("Upload failed: {}", reason),
        None => anyhow::bail!("Upload ended without a result"),
    }
}

/// Copy one video file into the local library
pub async fn save_video(settings: &Settings, file: PathBuf, tracking: String) -> Result<()> {
    let media = MediaStore::from_settings(settings);
    let size = std::fs::metadata(&file).map(|meta| meta.len()).ok();

    let source = file.clone();
    let id = tracking.clone();
    let committed = tokio::task::spawn_blocking(move || media.commit_to_library(&id, &source))
        .await
        .context("Library commit task failed")?;

    let Some(visible) = committed else {
        anyhow::bail!(
            "Could not save {} (missing, empty, or library not writable)",
            file.display()
        );
    };

    let mut delivery = Delivery::new(&tracking, DeliveryOutcome::SavedLocal)
        .with_destination(visible.display().to_string());
    if let Some(size) = size {
        delivery = delivery.with_size(size);
    }
    record_delivery(settings, &delivery);

    println!("Saved to {}", visible.display());
    Ok(())
}

/// Check that the server answers `GET /ping`
pub async fn ping_server(settings: &Settings, host: Option<String>, port: Option<u16>) -> Result<()> {
    let (host, port) = server_target(settings, host, port);
    let transport = UploadTransport::new()?;
    let probe = transport.test_connection(&host, port).await;

    if probe.reachable {
        println!("{}:{} {}", host.trim(), port, probe.message);
        Ok(())
    } else {
        anyhow::bail!("Server unreachable: {}", probe.message)
    }
}

/// List recent deliveries from the journal
pub async fn show_history(settings: &Settings, limit: usize, json: bool) -> Result<()> {
    let journal = Journal::open(settings)?;
    let deliveries = journal.list_recent(limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&deliveries)?);
        return Ok(());
    }

    if deliveries.is_empty() {
        println!("No deliveries found");
        return Ok(());
    }

    println!(
        "{:<18} {:<22} {:<28} {:<10} {}",
        "Date", "Tracking", "Outcome", "Size", "Destination"
    );
    println!("{}", "-".repeat(100));

    for delivery in deliveries {
        let date = delivery
            .created_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M");
        let size = delivery
            .size_bytes
            .map(format_size)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<18} {:<22} {:<28} {:<10} {}",
            date,
            truncate(&delivery.tracking_number, 20),
            delivery.outcome.as_str(),
            size,
            delivery.destination.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

/// Handle config subcommands
pub fn config_command(settings: &Settings, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => {
            let toml = toml::to_string_pretty(settings)?;
            println!("{}", toml);
        }
        ConfigCommand::Path => {
            let path = Settings::config_path()?;
            println!("{}", path.display());
        }
        ConfigCommand::Init { force } => {
            let path = Settings::config_path()?;
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists at {}. Use --force to overwrite.",
                    path.display()
                );
            }
            Settings::write_default(&path)?;
            println!("Configuration initialized at: {}", path.display());
        }
        ConfigCommand::Set { key, value } => {
            // Edit the file contents, not the env-overridden view
            let path = Settings::config_path()?;
            let mut stored = Settings::load_from(&path)?;
            stored.set_value(&key, &value)?;
            stored.save_to(&path)?;
            println!("Set {} = {}", key, value.trim());
        }
        ConfigCommand::Provision { payload } => {
            let server = parse_server_payload(&payload, ScanMode::ServerConfig)
                .with_context(|| format!("Not a server code: {}", payload))?;
            let path = Settings::config_path()?;
            let mut stored = Settings::load_from(&path)?;
            stored.provision_server(&server.host, server.port);
            stored.save_to(&path)?;
            println!(
                "Server set to {}:{}, uploads enabled",
                server.host, server.port
            );
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: &'static str,
    detail: String,
}

#[derive(Serialize)]
struct DoctorReport {
    version: &'static str,
    backend: String,
    save_mode: &'static str,
    server: Option<String>,
    checks: Vec<DoctorCheck>,
    notes: Vec<String>,
}

/// Run diagnostic checks to help troubleshoot local setup issues.
pub async fn run_doctor(settings: &Settings, json: bool) -> Result<()> {
    let mut report = collect_doctor_report(settings);

    if settings.delivery.server_configured() {
        let transport = UploadTransport::new()?;
        let probe = transport
            .test_connection(
                &settings.delivery.server_address,
                settings.delivery.server_port,
            )
            .await;
        report.checks.push(DoctorCheck {
            name: "server",
            status: if probe.reachable { "ok" } else { "failed" },
            detail: probe.message,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{} doctor ({})", crate::APP_NAME, report.version);
    println!("backend: {}", report.backend);
    println!(
        "delivery: {} (server: {})",
        report.save_mode,
        report.server.as_deref().unwrap_or("not configured")
    );
    println!();

    for check in &report.checks {
        println!("{:<10} {:<8} {}", check.name, check.status, check.detail);
    }

    if !report.notes.is_empty() {
        println!();
        for note in &report.notes {
            println!("{}", note);
        }
    }

    Ok(())
}

fn collect_doctor_report(settings: &Settings) -> DoctorReport {
    let capture = &settings.capture;
    let ffmpeg_ok = FfmpegCapture::is_available(&capture.ffmpeg_path);
    let v4l2_ok = command_exists(&capture.v4l2_ctl_path);

    let mut checks = vec![
        DoctorCheck {
            name: "ffmpeg",
            status: if ffmpeg_ok { "ok" } else { "missing" },
            detail: format!("{} (required for recording)", capture.ffmpeg_path),
        },
        DoctorCheck {
            name: "v4l2-ctl",
            status: if v4l2_ok { "ok" } else { "missing" },
            detail: "used for exposure, focus and other camera controls".to_string(),
        },
        DoctorCheck {
            name: "library",
            status: if dir_writable(&settings.storage.library_dir) {
                "ok"
            } else {
                "failed"
            },
            detail: settings.storage.library_dir.display().to_string(),
        },
    ];

    let mut notes = Vec::new();
    match capture.backend {
        CaptureBackend::Ffmpeg if capture.input_format == "v4l2" => {
            let present = Path::new(&capture.device).exists();
            checks.push(DoctorCheck {
                name: "camera",
                status: if present { "ok" } else { "missing" },
                detail: capture.device.clone(),
            });
            if !present {
                notes.push(
                    "hint: set capture.device, or run with --synthetic to test without a camera."
                        .to_string(),
                );
            }
        }
        CaptureBackend::Ffmpeg => {
            notes.push(format!(
                "info: camera {} ({}) is not checked on this platform.",
                capture.device, capture.input_format
            ));
        }
        CaptureBackend::Synthetic => {
            notes.push("info: synthetic backend records a test pattern, no camera needed.".to_string());
        }
    }

    if !v4l2_ok {
        notes.push("info: without v4l2-ctl the camera runs with its own defaults.".to_string());
    }
    if settings.delivery.save_mode == crate::config::SaveMode::Network
        && !settings.delivery.server_configured()
    {
        notes.push(
            "warning: network delivery is selected but no server is configured; recordings are saved locally."
                .to_string(),
        );
    }

    DoctorReport {
        version: crate::VERSION,
        backend: format!("{:?}", capture.backend),
        save_mode: settings.delivery.save_mode.label(),
        server: settings.delivery.server_configured().then(|| {
            format!(
                "{}:{}",
                settings.delivery.server_address.trim(),
                settings.delivery.server_port
            )
        }),
        checks,
        notes,
    }
}

// Helper functions

fn server_target(settings: &Settings, host: Option<String>, port: Option<u16>) -> (String, u16) {
    (
        host.unwrap_or_else(|| settings.delivery.server_address.clone()),
        port.unwrap_or(settings.delivery.server_port),
    )
}

/// Journal writes from one-shot commands are best effort
fn record_delivery(settings: &Settings, delivery: &Delivery) {
    let result = Journal::open(settings).and_then(|journal| journal.record(delivery));
    if let Err(e) = result {
        tracing::warn!("Failed to record delivery in journal: {}", e);
    }
}

fn command_exists(bin: &str) -> bool {
    Command::new(bin)
        .arg("--help")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

fn dir_writable(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = dir.join(format!(".parcelcam-doctor-{}", std::process::id()));
    let ok = std::fs::write(&probe, b"").is_ok();
    let _ = std::fs::remove_file(&probe);
    ok
}

fn format_size(bytes: u64) -> String {
    const MB: u64 = 1024 * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else {
        format!("{} KB", bytes.div_ceil(1024))
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("SF1234", 20), "SF1234");
        assert_eq!(truncate("单号单号单号单号", 6), "单号单...");
    }

    #[test]
    fn format_size_switches_to_megabytes() {
        assert_eq!(format_size(1), "1 KB");
        assert_eq!(format_size(2048), "2 KB");
        assert_eq!(format_size(3 * 1024 * 1024 / 2), "1.5 MB");
    }

    #[test]
    fn explicit_target_overrides_settings() {
        let mut settings = Settings::default();
        settings.delivery.server_address = "10.0.0.2".to_string();
        settings.delivery.server_port = 9000;

        assert_eq!(server_target(&settings, None, None), ("10.0.0.2".to_string(), 9000));
        assert_eq!(
            server_target(&settings, Some("nas.local".to_string()), Some(80)),
            ("nas.local".to_string(), 80)
        );
    }
}
