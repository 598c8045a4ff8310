//! Data models for the delivery journal

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a recording cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Accepted by the LAN server
    Uploaded,
    /// Committed to the local library
    SavedLocal,
    /// Upload failed, then committed to the local library
    SavedAfterUploadFailure,
    /// Neither delivered nor saved; the scratch file was kept
    SaveFailed,
    /// Capture never produced a usable file
    CaptureFailed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::SavedLocal => "saved_local",
            Self::SavedAfterUploadFailure => "saved_after_upload_failure",
            Self::SaveFailed => "save_failed",
            Self::CaptureFailed => "capture_failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(Self::Uploaded),
            "saved_local" => Some(Self::SavedLocal),
            "saved_after_upload_failure" => Some(Self::SavedAfterUploadFailure),
            "save_failed" => Some(Self::SaveFailed),
            "capture_failed" => Some(Self::CaptureFailed),
            _ => None,
        }
    }

    /// Whether the video ended up somewhere durable
    pub fn is_delivered(&self) -> bool {
        matches!(
            self,
            Self::Uploaded | Self::SavedLocal | Self::SavedAfterUploadFailure
        )
    }
}

/// One finished scan-record-deliver cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    /// Unique identifier (UUID)
    pub id: String,

    /// Scanned tracking number, unsanitized
    pub tracking_number: String,

    pub outcome: DeliveryOutcome,

    /// Library path, server address, or retained scratch path
    pub destination: Option<String>,

    /// Status or error text shown to the operator
    pub detail: Option<String>,

    /// Size of the recording in bytes
    pub size_bytes: Option<u64>,

    pub created_at: DateTime<Utc>,
}

impl Delivery {
    pub fn new(tracking_number: impl Into<String>, outcome: DeliveryOutcome) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracking_number: tracking_number.into(),
            outcome,
            destination: None,
            detail: None,
            size_bytes: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = Some(size_bytes);
        self
    }
}
