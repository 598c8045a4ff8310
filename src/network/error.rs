//! Upload failure classes

use std::error::Error as _;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Why an upload or a connection probe failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("Server address not configured")]
    BlankHost,

    #[error("Video file not found: {}", .0.display())]
    FileMissing(PathBuf),

    #[error("Video file is empty, the recording may have failed")]
    EmptyFile,

    #[error("Cannot resolve server {host}:{port}, check the network and server address")]
    HostUnresolvable { host: String, port: u16 },

    #[error("Connection refused, make sure the server is running ({host}:{port})")]
    ConnectionRefused { host: String, port: u16 },

    #[error("Connection timed out, check the network")]
    Timeout,

    #[error("Server returned error: {code} {reason}")]
    Status { code: u16, reason: String },

    #[error("{0}")]
    Io(String),
}

impl UploadError {
    /// Failures raised before any network I/O happens
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::BlankHost | Self::FileMissing(_) | Self::EmptyFile)
    }

    /// Classify a reqwest failure for `host:port`
    pub(crate) fn from_reqwest(err: reqwest::Error, host: &str, port: u16) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }

        if let Some(io_err) = io_source(&err) {
            match io_err.kind() {
                io::ErrorKind::ConnectionRefused => {
                    return Self::ConnectionRefused {
                        host: host.to_string(),
                        port,
                    }
                }
                io::ErrorKind::TimedOut => return Self::Timeout,
                _ => {}
            }
        }

        if let Some(status) = err.status() {
            return Self::Status {
                code: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            };
        }

        Self::Io(format!("Upload failed: {}", error_chain(&err)))
    }
}

/// First `io::Error` in the source chain
fn io_source(err: &reqwest::Error) -> Option<&io::Error> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return Some(io_err);
        }
        source = cause.source();
    }
    None
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
