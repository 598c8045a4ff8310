//! Multipart upload to the LAN server

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::progress::{ProgressThrottle, UploadEvent, PROGRESS_INTERVAL};
use super::UploadError;

const DEFAULT_SUCCESS_MESSAGE: &str = "Upload succeeded";

/// Timeouts and pacing for the transport.
///
/// `write_timeout` is the longest the request body may stall between two
/// chunks. `read_timeout` bounds the wait for the response once the body is
/// out, and again the read of the response body. Neither caps the total time
/// of an upload that keeps moving.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub read_timeout: Duration,
    pub progress_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(5 * 60),
            read_timeout: Duration::from_secs(30),
            progress_interval: PROGRESS_INTERVAL,
        }
    }
}

/// One file to upload
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub host: String,
    pub port: u16,
    pub file: PathBuf,
    pub tracking_number: String,
}

/// What the server said about an accepted upload
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub message: String,
    pub verified: bool,
    pub duration_secs: f64,
}

impl Default for UploadReceipt {
    fn default() -> Self {
        Self {
            message: DEFAULT_SUCCESS_MESSAGE.to_string(),
            verified: true,
            duration_secs: 0.0,
        }
    }
}

/// Result of `GET /ping`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProbe {
    pub reachable: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default = "default_verified")]
    verified: bool,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    message: Option<String>,
}

fn default_verified() -> bool {
    true
}

/// HTTP transport for recordings
#[derive(Clone)]
pub struct UploadTransport {
    http: Client,
    config: TransportConfig,
}

impl UploadTransport {
    pub fn new() -> Result<Self, UploadError> {
        Self::with_config(TransportConfig::default())
    }

    pub fn with_config(config: TransportConfig) -> Result<Self, UploadError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| UploadError::Io(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Upload in the background, reporting through `events`.
    ///
    /// Returns immediately. The task always finishes with exactly one
    /// `Success` or `Error` event.
    pub fn upload(
        &self,
        request: UploadRequest,
        events: mpsc::UnboundedSender<UploadEvent>,
    ) -> JoinHandle<()> {
        let transport = self.clone();
        tokio::spawn(async move {
            let terminal = match transport.upload_file(&request, &events).await {
                Ok(receipt) => {
                    let _ = events.send(ProgressThrottle::complete(file_len(&request).await));
                    UploadEvent::Success {
                        message: receipt.message,
                        verified: receipt.verified,
                        duration_secs: receipt.duration_secs,
                    }
                }
                Err(e) => {
                    warn!("Upload of {} failed: {}", request.file.display(), e);
                    UploadEvent::Error(e.to_string())
                }
            };
            let _ = events.send(terminal);
        })
    }

    /// Upload and wait for the server's answer.
    ///
    /// Progress events go to `events`; the terminal outcome is the return value.
    pub async fn upload_file(
        &self,
        request: &UploadRequest,
        events: &mpsc::UnboundedSender<UploadEvent>,
    ) -> Result<UploadReceipt, UploadError> {
        let host = request.host.trim();
        if host.is_empty() {
            return Err(UploadError::BlankHost);
        }

        let total = match tokio::fs::metadata(&request.file).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(UploadError::FileMissing(request.file.clone())),
        };
        if total == 0 {
            return Err(UploadError::EmptyFile);
        }

        self.resolve(host, request.port).await?;

        let file = tokio::fs::File::open(&request.file)
            .await
            .map_err(|_| UploadError::FileMissing(request.file.clone()))?;

        let url = format!("http://{}:{}/upload", host, request.port);
        info!(
            "Uploading {} ({} bytes) to {}",
            request.file.display(),
            total,
            url
        );

        let mut throttle = ProgressThrottle::new(total, self.config.progress_interval);
        let _ = events.send(throttle.start(Instant::now()));

        let activity = Arc::new(Mutex::new(BodyActivity::new(Instant::now())));
        let progress = events.clone();
        let body_activity = activity.clone();
        let mut written = 0u64;
        let stream = ReaderStream::new(file).inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                written += bytes.len() as u64;
                let now = Instant::now();
                if let Ok(mut activity) = body_activity.lock() {
                    activity.record(now, written >= total);
                }
                if let Some(event) = throttle.observe(written, now) {
                    let _ = progress.send(event);
                }
            }
        });

        let file_name = request
            .file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video.mp4".to_string());

        let part = Part::stream_with_length(Body::wrap_stream(stream), total)
            .file_name(file_name)
            .mime_str("video/mp4")
            .map_err(|e| UploadError::Io(e.to_string()))?;

        let form = Form::new()
            .text("trackingNumber", request.tracking_number.clone())
            .part("file", part);

        let send = self.http.post(&url).multipart(form).send();
        let response = tokio::select! {
            result = send => result.map_err(|e| UploadError::from_reqwest(e, host, request.port))?,
            stalled = self.watch_body(activity) => return Err(stalled),
        };

        let status = response.status();
        debug!("Upload response status: {}", status);
        if !status.is_success() {
            return Err(UploadError::Status {
                code: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let body = tokio::time::timeout(self.config.read_timeout, response.text())
            .await
            .map_err(|_| UploadError::Timeout)?
            .map_err(|e| UploadError::from_reqwest(e, host, request.port))?;

        let receipt = parse_receipt(&body);
        info!("Upload accepted: {}", receipt.message);
        Ok(receipt)
    }

    /// Resolves with `Timeout` once the body stalls for `write_timeout`, or
    /// the response has not started `read_timeout` after the last byte went out
    async fn watch_body(&self, activity: Arc<Mutex<BodyActivity>>) -> UploadError {
        loop {
            let Some(deadline) = current_deadline(&activity, &self.config) else {
                return UploadError::Io("Upload state poisoned".to_string());
            };
            if Instant::now() >= deadline {
                debug!("Upload made no progress in time, giving up");
                return UploadError::Timeout;
            }
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
        }
    }

    /// `GET /ping` against the server
    pub async fn test_connection(&self, host: &str, port: u16) -> ConnectionProbe {
        match self.ping(host, port).await {
            Ok(()) => ConnectionProbe {
                reachable: true,
                message: "Connected".to_string(),
            },
            Err(e) => ConnectionProbe {
                reachable: false,
                message: e.to_string(),
            },
        }
    }

    /// Probe in the background, delivering the result through `results`
    pub fn spawn_test_connection(
        &self,
        host: String,
        port: u16,
        results: mpsc::UnboundedSender<ConnectionProbe>,
    ) -> JoinHandle<()> {
        let transport = self.clone();
        tokio::spawn(async move {
            let probe = transport.test_connection(&host, port).await;
            let _ = results.send(probe);
        })
    }

    async fn ping(&self, host: &str, port: u16) -> Result<(), UploadError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(UploadError::BlankHost);
        }
        self.resolve(host, port).await?;

        let response = self
            .http
            .get(format!("http://{}:{}/ping", host, port))
            .timeout(self.config.read_timeout)
            .send()
            .await
            .map_err(|e| UploadError::from_reqwest(e, host, port))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(UploadError::Status {
                code: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            })
        }
    }

    /// Resolve before connecting so DNS failures get their own class
    async fn resolve(&self, host: &str, port: u16) -> Result<(), UploadError> {
        let unresolvable = || UploadError::HostUnresolvable {
            host: host.to_string(),
            port,
        };

        match tokio::time::timeout(
            self.config.connect_timeout,
            tokio::net::lookup_host((host, port)),
        )
        .await
        {
            Ok(Ok(mut addrs)) => {
                if addrs.next().is_some() {
                    Ok(())
                } else {
                    Err(unresolvable())
                }
            }
            Ok(Err(e)) => {
                debug!("Lookup of {} failed: {}", host, e);
                Err(unresolvable())
            }
            Err(_) => Err(unresolvable()),
        }
    }
}

/// When the request body last moved, and whether it is all out
#[derive(Debug)]
struct BodyActivity {
    last_chunk: Instant,
    finished: bool,
}

impl BodyActivity {
    fn new(now: Instant) -> Self {
        Self {
            last_chunk: now,
            finished: false,
        }
    }

    fn record(&mut self, now: Instant, finished: bool) {
        self.last_chunk = now;
        self.finished = finished;
    }

    fn deadline(&self, config: &TransportConfig) -> Instant {
        if self.finished {
            self.last_chunk + config.read_timeout
        } else {
            self.last_chunk + config.write_timeout
        }
    }
}

fn current_deadline(activity: &Mutex<BodyActivity>, config: &TransportConfig) -> Option<Instant> {
    activity.lock().ok().map(|activity| activity.deadline(config))
}

async fn file_len(request: &UploadRequest) -> u64 {
    tokio::fs::metadata(&request.file)
        .await
        .map(|meta| meta.len())
        .unwrap_or(0)
}

/// Server reply, falling back to defaults when it is empty or not JSON
fn parse_receipt(body: &str) -> UploadReceipt {
    if body.trim().is_empty() {
        return UploadReceipt::default();
    }

    match serde_json::from_str::<UploadResponse>(body) {
        Ok(response) => UploadReceipt {
            message: response
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SUCCESS_MESSAGE.to_string()),
            verified: response.verified,
            duration_secs: response.duration,
        },
        Err(e) => {
            warn!("Ignoring unparseable upload response: {}", e);
            UploadReceipt::default()
        }
    }
}
