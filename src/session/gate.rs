//! Barcode acceptance: symbology filter, debounce, and server provisioning codes

use std::time::{Duration, Instant};

use tracing::debug;

use super::ScanMode;

/// Window in which a second detection is treated as the same label
pub const DEBOUNCE: Duration = Duration::from_millis(500);

const FALLBACK_SERVER_PORT: u16 = 8080;

/// Barcode symbologies a detector can report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbology {
    Code128,
    Code39,
    Code93,
    Ean13,
    Ean8,
    UpcA,
    UpcE,
    QrCode,
    Codabar,
    Itf,
    DataMatrix,
    Pdf417,
    Aztec,
    Unknown,
}

impl Symbology {
    /// Parcel labels and provisioning codes only use these
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            Self::Code128
                | Self::Code39
                | Self::Code93
                | Self::Ean13
                | Self::Ean8
                | Self::UpcA
                | Self::UpcE
                | Self::QrCode
        )
    }
}

/// One detector result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub value: String,
    pub symbology: Symbology,
}

impl Detection {
    pub fn new(value: impl Into<String>, symbology: Symbology) -> Self {
        Self {
            value: value.into(),
            symbology,
        }
    }

    /// A code typed by a keyboard-wedge scanner.
    ///
    /// Wedge scanners do not report the symbology; they are configured for
    /// linear parcel labels.
    pub fn keyboard(value: impl Into<String>) -> Self {
        Self::new(value, Symbology::Code128)
    }
}

/// Filters raw detections down to the ones the session acts on
#[derive(Debug)]
pub struct BarcodeGate {
    debounce: Duration,
    last_accepted: Option<Instant>,
}

impl BarcodeGate {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            last_accepted: None,
        }
    }

    /// Whether `detection` should be acted on at `now`
    pub fn accept(&mut self, detection: &Detection, now: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.debounce {
                debug!("Debounced detection {:?}", detection.value);
                return false;
            }
        }

        if !detection.symbology.is_supported() {
            debug!("Ignoring {:?} barcode", detection.symbology);
            return false;
        }

        if detection.value.trim().is_empty() {
            return false;
        }

        self.last_accepted = Some(now);
        true
    }
}

impl Default for BarcodeGate {
    fn default() -> Self {
        Self::new(DEBOUNCE)
    }
}

/// LAN server location carried by a provisioning code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

/// Read a `"<address>:<port>"` provisioning payload.
///
/// In `ServerConfig` mode any payload with a `:` is taken and a non-numeric
/// port falls back to 8080. In `Parcel` mode only a well-formed `host:port`
/// counts; anything else is a tracking number.
pub fn parse_server_payload(payload: &str, mode: ScanMode) -> Option<ServerAddress> {
    let payload = payload.trim();

    match mode {
        ScanMode::ServerConfig => {
            let parts: Vec<&str> = payload.split(':').collect();
            if parts.len() < 2 {
                return None;
            }
            let host = parts[0].trim();
            if host.is_empty() {
                return None;
            }
            let port = parts
                .last()
                .and_then(|p| p.trim().parse::<u16>().ok())
                .unwrap_or(FALLBACK_SERVER_PORT);
            Some(ServerAddress {
                host: host.to_string(),
                port,
            })
        }
        ScanMode::Parcel => {
            let (host, port) = payload.split_once(':')?;
            if host.is_empty() || !host.chars().all(is_host_char) {
                return None;
            }
            if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let port = port.parse::<u16>().ok().filter(|p| *p != 0)?;
            Some(ServerAddress {
                host: host.to_string(),
                port,
            })
        }
    }
}

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '-'
}
