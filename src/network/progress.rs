//! Upload progress events and coalescing

use std::time::{Duration, Instant};

/// Minimum spacing between progress events
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Events reported by one upload.
///
/// Zero or more `Progress` with non-decreasing percent, then exactly one
/// `Success` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    Progress {
        percent: u8,
        bytes_written: u64,
        total_bytes: u64,
    },
    Success {
        message: String,
        verified: bool,
        duration_secs: f64,
    },
    Error(String),
}

impl UploadEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Turns byte counts into at most one progress event per interval
#[derive(Debug)]
pub struct ProgressThrottle {
    total: u64,
    interval: Duration,
    last_emit: Option<Instant>,
    last_percent: u8,
    last_bytes: u64,
}

impl ProgressThrottle {
    pub fn new(total: u64, interval: Duration) -> Self {
        Self {
            total,
            interval,
            last_emit: None,
            last_percent: 0,
            last_bytes: 0,
        }
    }

    /// The 0% event sent before the first byte
    pub fn start(&mut self, now: Instant) -> UploadEvent {
        self.last_emit = Some(now);
        UploadEvent::Progress {
            percent: 0,
            bytes_written: 0,
            total_bytes: self.total,
        }
    }

    /// Record `bytes_written` so far; returns an event when one is due
    pub fn observe(&mut self, bytes_written: u64, now: Instant) -> Option<UploadEvent> {
        if bytes_written <= self.last_bytes {
            return None;
        }
        if let Some(last) = self.last_emit {
            if now.saturating_duration_since(last) < self.interval {
                return None;
            }
        }

        let percent = percent_of(bytes_written, self.total).max(self.last_percent);
        self.last_emit = Some(now);
        self.last_percent = percent;
        self.last_bytes = bytes_written;

        Some(UploadEvent::Progress {
            percent,
            bytes_written,
            total_bytes: self.total,
        })
    }

    /// The 100% event sent once the server accepted the file
    pub fn complete(total: u64) -> UploadEvent {
        UploadEvent::Progress {
            percent: 100,
            bytes_written: total,
            total_bytes: total,
        }
    }
}

fn percent_of(written: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((u128::from(written) * 100) / u128::from(total)).min(100) as u8
}
