//! Observable session state

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::watch;

use crate::network::ConnectionProbe;

/// Where the scan-record-deliver cycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Scanning,
    Confirming,
    Recording,
    SaveDialog,
    SavingLocal,
    Uploading,
    Success,
    Error,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Scanning => "scanning",
            Self::Confirming => "confirming",
            Self::Recording => "recording",
            Self::SaveDialog => "save dialog",
            Self::SavingLocal => "saving locally",
            Self::Uploading => "uploading",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// What a scanned code is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Tracking numbers, plus `host:port` provisioning codes
    #[default]
    Parcel,
    /// The next code configures the server
    ServerConfig,
}

/// Snapshot published to the UI after every change
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    pub scanned_barcode: String,
    pub phase: Phase,
    pub scan_mode: ScanMode,
    pub recorded_file: Option<PathBuf>,
    pub upload_progress: u8,
    pub status: String,
    /// Successful deliveries since start, survives resets
    pub recording_count: u32,
    pub error_message: Option<String>,
    pub paused: bool,
    pub elapsed_secs: u64,
    pub saved_file_name: String,
    #[serde(skip)]
    pub connection: Option<ConnectionProbe>,
}

impl SessionState {
    /// Fresh scanning state that keeps the delivery count
    pub fn reset_from(previous: &SessionState) -> Self {
        Self {
            recording_count: previous.recording_count,
            connection: previous.connection.clone(),
            ..Self::default()
        }
    }
}

/// Single-writer holder of the session state.
///
/// Every update replaces the whole snapshot, so readers never observe a
/// half-applied change.
#[derive(Debug)]
pub struct StateStore {
    tx: watch::Sender<SessionState>,
}

impl StateStore {
    pub fn new(initial: SessionState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub fn update<F>(&self, transform: F)
    where
        F: FnOnce(&mut SessionState),
    {
        let mut next = self.get();
        transform(&mut next);
        self.tx.send_replace(next);
    }

    pub fn replace(&self, state: SessionState) {
        self.tx.send_replace(state);
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(SessionState::default())
    }
}
