//! Line-oriented front end for the session.
//!
//! Each stdin line is either a scanned code or a key for the current phase.
//! A handheld scanner in keyboard-wedge mode types the code and presses Enter,
//! so it works without any extra setup.

use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::warn;

use crate::capture::{create_device, CaptureBackend};
use crate::config::SettingsStore;
use crate::network::UploadTransport;
use crate::session::{
    Detection, Phase, Session, SessionCommand, SessionHandle, SessionOptions, SessionState,
};
use crate::storage::Journal;

/// Upper bound on waiting for a command to show up in the state
const SETTLE: Duration = Duration::from_millis(200);

const HELP: &str = "\
Scan a barcode (or type a tracking number) and press Enter.
  :server   scan the server QR code next
  :ping     test the server connection
  :cancel   leave server scan mode
While confirming:  y / Enter = record, n = cancel
While recording:   s / Enter = stop, p = pause, r = resume
Save prompt:       y / Enter = save
After a result:    Enter = next parcel";

/// Run the scan loop until stdin closes or Ctrl-C
pub async fn run(store: SettingsStore, json: bool, synthetic: bool) -> Result<()> {
    let mut settings = store.get().clone();
    settings.ensure_dirs()?;

    let journal = match Journal::open(&settings) {
        Ok(journal) => Some(journal),
        Err(e) => {
            warn!("Delivery journal unavailable: {}", e);
            None
        }
    };

    // --synthetic only applies to this run, it is not persisted
    if synthetic {
        settings.capture.backend = CaptureBackend::Synthetic;
    }
    let device = create_device(&settings);
    let transport = UploadTransport::new()?;
    let (handle, task) =
        Session::new(store, device, transport, journal, SessionOptions::default()).spawn();

    let renderer = tokio::spawn(render(handle.subscribe(), json));
    if !json {
        eprintln!("{}", HELP);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Some(command) = interpret(&line, &handle.state()) {
                        send_and_settle(&handle, command).await?;
                    }
                }
                None => {
                    // Piped input: let a delivery that is already underway finish
                    let phase = handle.state().phase;
                    if matches!(phase, Phase::Uploading | Phase::SavingLocal | Phase::Success) {
                        handle
                            .wait_for(|s| matches!(s.phase, Phase::Scanning | Phase::Error))
                            .await?;
                    }
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                break;
            }
        }
    }

    handle.send(SessionCommand::Shutdown).await.ok();
    if let Err(e) = task.await {
        warn!("Session task ended abnormally: {}", e);
    }
    renderer.abort();

    let count = handle.state().recording_count;
    if !json {
        println!("Delivered {} recording(s)", count);
    }
    Ok(())
}

/// Send and give the session a moment to publish, so the next line is read
/// against the state this command produced
async fn send_and_settle(handle: &SessionHandle, command: SessionCommand) -> Result<()> {
    let mut rx = handle.subscribe();
    rx.borrow_and_update();
    handle.send(command).await?;
    let _ = tokio::time::timeout(SETTLE, rx.changed()).await;
    Ok(())
}

/// Map one input line to a session command for the given state
pub fn interpret(line: &str, state: &SessionState) -> Option<SessionCommand> {
    let input = line.trim();
    let key = input.to_ascii_lowercase();

    match state.phase {
        Phase::Scanning => match key.as_str() {
            "" => None,
            ":server" => Some(SessionCommand::ScanServerConfig),
            ":ping" => Some(SessionCommand::TestConnection),
            ":cancel" => Some(SessionCommand::Cancel),
            _ => Some(SessionCommand::BarcodeDetected(Detection::keyboard(input))),
        },
        Phase::Confirming => match key.as_str() {
            "" | "y" | "yes" => Some(SessionCommand::Confirm),
            "n" | "no" => Some(SessionCommand::Cancel),
            _ => None,
        },
        Phase::Recording => match key.as_str() {
            "" | "s" | "stop" => Some(SessionCommand::StopRecording),
            "p" | "pause" => Some(SessionCommand::PauseRecording),
            "r" | "resume" => Some(SessionCommand::ResumeRecording),
            _ => None,
        },
        Phase::SaveDialog => match key.as_str() {
            "" | "y" | "yes" => Some(SessionCommand::AcceptSave),
            _ => None,
        },
        Phase::Success | Phase::Error => Some(SessionCommand::Dismiss),
        Phase::Uploading | Phase::SavingLocal => None,
    }
}

/// One status line for a state snapshot
pub fn render_line(state: &SessionState) -> String {
    let mut line = format!("[{}]", state.phase.label());

    match state.phase {
        Phase::Recording => {
            line.push_str(&format!(
                " {} {}",
                state.scanned_barcode,
                format_elapsed(state.elapsed_secs)
            ));
            if state.paused {
                line.push_str(" (paused)");
            }
        }
        Phase::Uploading => line.push_str(&format!(" {:>3}%", state.upload_progress)),
        Phase::Success => line.push_str(&format!(" #{}", state.recording_count)),
        _ => {}
    }

    if !state.status.is_empty() {
        line.push(' ');
        line.push_str(&state.status);
    }
    if let Some(error) = &state.error_message {
        line.push_str(&format!(" | error: {}", error));
    }
    line
}

async fn render(mut rx: watch::Receiver<SessionState>, json: bool) {
    let mut last = String::new();
    loop {
        let state = rx.borrow_and_update().clone();
        let line = if json {
            serde_json::to_string(&state).unwrap_or_default()
        } else {
            render_line(&state)
        };
        if line != last {
            println!("{}", line);
            last = line;
        }

        if rx.changed().await.is_err() {
            break;
        }
    }
}

fn format_elapsed(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_phase(phase: Phase) -> SessionState {
        SessionState {
            phase,
            ..SessionState::default()
        }
    }

    #[test]
    fn scanning_lines_become_barcodes() {
        let state = in_phase(Phase::Scanning);
        match interpret("  SF1234567890  ", &state) {
            Some(SessionCommand::BarcodeDetected(detection)) => {
                assert_eq!(detection.value, "SF1234567890")
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(interpret("   ", &state).is_none());
        assert!(matches!(
            interpret(":server", &state),
            Some(SessionCommand::ScanServerConfig)
        ));
    }

    #[test]
    fn single_letters_are_barcodes_while_scanning() {
        let state = in_phase(Phase::Scanning);
        assert!(matches!(
            interpret("s", &state),
            Some(SessionCommand::BarcodeDetected(_))
        ));
    }

    #[test]
    fn keys_depend_on_phase() {
        assert!(matches!(
            interpret("", &in_phase(Phase::Confirming)),
            Some(SessionCommand::Confirm)
        ));
        assert!(matches!(
            interpret("n", &in_phase(Phase::Confirming)),
            Some(SessionCommand::Cancel)
        ));
        assert!(matches!(
            interpret("P", &in_phase(Phase::Recording)),
            Some(SessionCommand::PauseRecording)
        ));
        assert!(matches!(
            interpret("", &in_phase(Phase::Recording)),
            Some(SessionCommand::StopRecording)
        ));
        assert!(matches!(
            interpret("y", &in_phase(Phase::SaveDialog)),
            Some(SessionCommand::AcceptSave)
        ));
        assert!(matches!(
            interpret("anything", &in_phase(Phase::Error)),
            Some(SessionCommand::Dismiss)
        ));
        assert!(interpret("", &in_phase(Phase::Uploading)).is_none());
    }

    #[test]
    fn render_line_shows_progress_and_errors() {
        let mut state = in_phase(Phase::Uploading);
        state.upload_progress = 42;
        state.status = "Uploading 42%".to_string();
        assert_eq!(render_line(&state), "[uploading]  42% Uploading 42%");

        let mut state = in_phase(Phase::Scanning);
        state.error_message = Some("Camera is not ready".to_string());
        assert_eq!(render_line(&state), "[scanning] | error: Camera is not ready");
    }

    #[test]
    fn render_line_shows_recording_timer() {
        let mut state = in_phase(Phase::Recording);
        state.scanned_barcode = "SF1".to_string();
        state.elapsed_secs = 65;
        state.paused = true;
        state.status = "Paused".to_string();
        assert_eq!(render_line(&state), "[recording] SF1 01:05 (paused) Paused");
    }
}
