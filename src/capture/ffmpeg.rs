//! ffmpeg recorder backend
//!
//! Recording runs in an `ffmpeg` child process writing straight to the scratch
//! file. Camera controls on V4L2 devices go through `v4l2-ctl`.

use std::collections::{HashSet, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::runtime::{Handle, RuntimeFlavor};

use crate::config::{CaptureSettings, FocusMode, WhiteBalanceMode};

use super::{CameraControl, CaptureDevice, CaptureError, RecordingProfile};

/// How long ffmpeg gets to write the trailer after `q`
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Lines of ffmpeg output kept for error messages
const STDERR_TAIL_LINES: usize = 16;

/// Where ffmpeg reads frames from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FfmpegSource {
    /// A camera opened with an ffmpeg input format (`v4l2`, `avfoundation`, `dshow`)
    Device { input_format: String, device: String },
    /// Generated `testsrc` pattern
    TestPattern,
}

/// Records through an ffmpeg subprocess
pub struct FfmpegCapture {
    ffmpeg_path: String,
    v4l2_ctl_path: String,
    source: FfmpegSource,
    opened: bool,
    /// Control names reported by `v4l2-ctl --list-ctrls`
    device_ctrls: HashSet<String>,
    process: Option<Child>,
    stderr: Option<StderrTail>,
    output_path: Option<PathBuf>,
    paused: bool,
}

impl FfmpegCapture {
    pub fn new(settings: &CaptureSettings, source: FfmpegSource) -> Self {
        Self {
            ffmpeg_path: settings.ffmpeg_path.clone(),
            v4l2_ctl_path: settings.v4l2_ctl_path.clone(),
            source,
            opened: false,
            device_ctrls: HashSet::new(),
            process: None,
            stderr: None,
            output_path: None,
            paused: false,
        }
    }

    /// Check if the ffmpeg binary can be executed
    pub fn is_available(ffmpeg_path: &str) -> bool {
        off_runtime(|| {
            Command::new(ffmpeg_path)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|status| status.success())
                .unwrap_or(false)
        })
    }

    fn v4l2_device(&self) -> Option<&str> {
        match &self.source {
            FfmpegSource::Device {
                input_format,
                device,
            } if input_format == "v4l2" => Some(device),
            _ => None,
        }
    }

    /// Command line for one recording
    fn recording_args(&self, output_path: &Path, profile: &RecordingProfile) -> Vec<String> {
        let size = format!("{}x{}", profile.width, profile.height);
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostats", "-y"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        match &self.source {
            FfmpegSource::Device {
                input_format,
                device,
            } => {
                args.extend([
                    "-f".to_string(),
                    input_format.clone(),
                    "-framerate".to_string(),
                    profile.framerate.to_string(),
                    "-video_size".to_string(),
                    size,
                    "-i".to_string(),
                    device.clone(),
                ]);
            }
            FfmpegSource::TestPattern => {
                args.extend([
                    "-re".to_string(),
                    "-f".to_string(),
                    "lavfi".to_string(),
                    "-i".to_string(),
                    format!("testsrc=size={}:rate={}", size, profile.framerate),
                ]);
            }
        }

        args.extend([
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "veryfast".to_string(),
            "-b:v".to_string(),
            format!("{}M", profile.bitrate_mbps),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
        ]);
        args.push(output_path.to_string_lossy().into_owned());
        args
    }

    fn set_ctrls(&self, label: &str, ctrls: &[(&str, String)]) -> Result<(), CaptureError> {
        let device = self
            .v4l2_device()
            .ok_or_else(|| CaptureError::Unsupported(label.to_string()))?;

        let assignments = ctrls
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join(",");

        let output = off_runtime(|| {
            Command::new(&self.v4l2_ctl_path)
                .args(["-d", device, "--set-ctrl", &assignments])
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .output()
        })
        .map_err(|e| CaptureError::Device(format!("Failed to run v4l2-ctl: {}", e)))?;

        if output.status.success() {
            tracing::debug!("v4l2-ctl set {}", assignments);
            Ok(())
        } else {
            Err(CaptureError::Device(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    /// First of `names` the device actually has
    fn ctrl<'a>(&self, names: &[&'a str]) -> Option<&'a str> {
        names
            .iter()
            .copied()
            .find(|name| self.device_ctrls.contains(*name))
    }

    fn probe_controls(&mut self) {
        let Some(device) = self.v4l2_device().map(str::to_string) else {
            return;
        };

        let listed = off_runtime(|| {
            Command::new(&self.v4l2_ctl_path)
                .args(["-d", &device, "--list-ctrls"])
                .stderr(Stdio::null())
                .output()
        });
        match listed {
            Ok(output) if output.status.success() => {
                self.device_ctrls = parse_ctrl_names(&String::from_utf8_lossy(&output.stdout));
                tracing::debug!("{} camera controls on {}", self.device_ctrls.len(), device);
            }
            Ok(output) => {
                tracing::warn!("v4l2-ctl --list-ctrls exited with {}", output.status)
            }
            Err(e) => tracing::warn!("Camera controls unavailable, v4l2-ctl failed: {}", e),
        }
    }

    fn signal(&self, signal: i32) -> Result<(), CaptureError> {
        let Some(child) = self.process.as_ref() else {
            return Err(CaptureError::NotReady);
        };

        #[cfg(unix)]
        {
            let rc = unsafe { libc::kill(child.id() as i32, signal) };
            if rc == 0 {
                Ok(())
            } else {
                Err(CaptureError::Device(format!(
                    "Failed to signal recorder: {}",
                    std::io::Error::last_os_error()
                )))
            }
        }

        #[cfg(not(unix))]
        {
            let _ = (child, signal);
            Err(CaptureError::Unsupported("Pause".to_string()))
        }
    }
}

impl CaptureDevice for FfmpegCapture {
    fn open(&mut self) -> Result<(), CaptureError> {
        if self.opened {
            return Ok(());
        }

        if !Self::is_available(&self.ffmpeg_path) {
            return Err(CaptureError::Device(format!(
                "{} not found. Please install ffmpeg.",
                self.ffmpeg_path
            )));
        }

        if let Some(device) = self.v4l2_device() {
            if !Path::new(device).exists() {
                return Err(CaptureError::Device(format!("Camera {} not found", device)));
            }
        }

        self.probe_controls();
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.process.is_some() {
            if let Err(e) = self.stop() {
                tracing::warn!("Recorder did not stop cleanly: {}", e);
            }
        }
        self.device_ctrls.clear();
        self.opened = false;
    }

    fn controls(&self) -> Vec<CameraControl> {
        let mut controls = Vec::new();
        if self.ctrl(&["auto_exposure_bias"]).is_some() {
            controls.push(CameraControl::Exposure);
        }
        if self
            .ctrl(&["white_balance_automatic", "white_balance_temperature_auto"])
            .is_some()
        {
            controls.push(CameraControl::WhiteBalance);
        }
        if self
            .ctrl(&["focus_automatic_continuous", "focus_auto"])
            .is_some()
        {
            controls.push(CameraControl::Focus);
        }
        if self.ctrl(&["iso_sensitivity"]).is_some() {
            controls.push(CameraControl::Iso);
        }
        if self.ctrl(&["zoom_absolute"]).is_some() {
            controls.push(CameraControl::Zoom);
        }
        controls
    }

    fn set_exposure_compensation(&mut self, ev: i32) -> Result<(), CaptureError> {
        // auto_exposure_bias is in 0.001 EV
        self.set_ctrls(
            "Exposure compensation",
            &[("auto_exposure_bias", ev.saturating_mul(1000).to_string())],
        )
    }

    fn set_white_balance(
        &mut self,
        mode: WhiteBalanceMode,
        temperature: Option<u32>,
    ) -> Result<(), CaptureError> {
        let auto = self
            .ctrl(&["white_balance_automatic", "white_balance_temperature_auto"])
            .ok_or_else(|| CaptureError::Unsupported("White balance".to_string()))?;

        match (mode, temperature) {
            (WhiteBalanceMode::Manual, Some(kelvin)) => self.set_ctrls(
                "White balance",
                &[
                    (auto, "0".to_string()),
                    ("white_balance_temperature", kelvin.to_string()),
                ],
            ),
            (WhiteBalanceMode::Manual, None) => {
                self.set_ctrls("White balance", &[(auto, "0".to_string())])
            }
            (WhiteBalanceMode::Auto, _) => {
                self.set_ctrls("White balance", &[(auto, "1".to_string())])
            }
        }
    }

    fn set_focus_mode(&mut self, mode: FocusMode) -> Result<(), CaptureError> {
        let ctrl = self
            .ctrl(&["focus_automatic_continuous", "focus_auto"])
            .ok_or_else(|| CaptureError::Unsupported("Focus".to_string()))?;

        // UVC cameras only know continuous autofocus or manual
        let value = match mode {
            FocusMode::Auto | FocusMode::Continuous => "1",
            FocusMode::Manual => "0",
        };
        self.set_ctrls("Focus", &[(ctrl, value.to_string())])
    }

    fn set_iso(&mut self, auto: bool, iso: u32) -> Result<(), CaptureError> {
        let mut ctrls = Vec::new();
        if self.ctrl(&["iso_sensitivity_auto"]).is_some() {
            ctrls.push(("iso_sensitivity_auto", if auto { "1" } else { "0" }.to_string()));
        }
        if !auto {
            ctrls.push(("iso_sensitivity", iso.to_string()));
        }
        if ctrls.is_empty() {
            return Ok(());
        }
        self.set_ctrls("ISO", &ctrls)
    }

    fn set_zoom_ratio(&mut self, ratio: f32) -> Result<(), CaptureError> {
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(CaptureError::Device(format!("Invalid zoom ratio {}", ratio)));
        }
        let value = (ratio * 100.0).round() as i64;
        self.set_ctrls("Zoom", &[("zoom_absolute", value.to_string())])
    }

    fn start(&mut self, output_path: &Path, profile: &RecordingProfile) -> Result<(), CaptureError> {
        if self.process.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }
        if !self.opened {
            return Err(CaptureError::NotReady);
        }

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CaptureError::Device(format!("Cannot create {}: {}", parent.display(), e))
            })?;
        }

        let args = self.recording_args(output_path, profile);
        tracing::debug!("Spawning {} {}", self.ffmpeg_path, args.join(" "));

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CaptureError::Device(format!("Failed to start ffmpeg: {}", e)))?;

        self.stderr = child.stderr.take().map(StderrTail::drain);
        self.process = Some(child);
        self.output_path = Some(output_path.to_path_buf());
        self.paused = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        let Some(mut child) = self.process.take() else {
            return Ok(());
        };

        if self.paused {
            #[cfg(unix)]
            unsafe {
                libc::kill(child.id() as i32, libc::SIGCONT);
            }
            self.paused = false;
        }

        // `q` on stdin makes ffmpeg write the trailer and exit cleanly
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(b"q");
        }

        let waited = off_runtime(|| wait_with_deadline(&mut child, STOP_TIMEOUT));
        let tail = self.stderr.take().map(StderrTail::finish);
        let status = waited?;

        if status.success() {
            Ok(())
        } else {
            Err(CaptureError::Device(format!(
                "ffmpeg exited with {}: {}",
                status,
                tail.as_deref().unwrap_or("no output")
            )))
        }
    }

    fn pause(&mut self) -> Result<(), CaptureError> {
        #[cfg(unix)]
        self.signal(libc::SIGSTOP)?;
        #[cfg(not(unix))]
        self.signal(0)?;
        self.paused = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), CaptureError> {
        #[cfg(unix)]
        self.signal(libc::SIGCONT)?;
        #[cfg(not(unix))]
        self.signal(0)?;
        self.paused = false;
        Ok(())
    }

    fn poll_failure(&mut self) -> Option<String> {
        let child = self.process.as_mut()?;
        match child.try_wait() {
            Ok(None) => None,
            Ok(Some(status)) => {
                self.process = None;
                let tail = self.stderr.take().map(StderrTail::finish);
                let path = self
                    .output_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                Some(format!(
                    "Recorder stopped unexpectedly ({}) while writing {}: {}",
                    status,
                    path,
                    tail.as_deref().unwrap_or("no output")
                ))
            }
            Err(e) => Some(format!("Lost track of the recorder: {}", e)),
        }
    }

    fn backend_name(&self) -> &'static str {
        match self.source {
            FfmpegSource::Device { .. } => "ffmpeg",
            FfmpegSource::TestPattern => "synthetic",
        }
    }
}

impl Drop for FfmpegCapture {
    fn drop(&mut self) {
        if let Some(mut child) = self.process.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(tail) = self.stderr.take() {
            tail.finish();
        }
    }
}

/// Control names from `v4l2-ctl --list-ctrls` output
fn parse_ctrl_names(output: &str) -> HashSet<String> {
    output
        .lines()
        .filter(|line| line.contains("0x"))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Process and v4l2-ctl calls block; on a multi-threaded runtime let the
/// scheduler move other tasks off this worker first.
fn off_runtime<T>(work: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

/// Wait for ffmpeg to exit, killing it once `timeout` has passed
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> Result<ExitStatus, CaptureError> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(50)),
            Ok(None) => {
                tracing::warn!("ffmpeg did not stop in time, killing it");
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureError::Device(
                    "Recorder did not finish writing the video".to_string(),
                ));
            }
            Err(e) => {
                return Err(CaptureError::Device(format!(
                    "Failed to wait for ffmpeg: {}",
                    e
                )))
            }
        }
    }
}

/// Reads ffmpeg's stderr as it is written, keeping the last few lines
struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    reader: JoinHandle<()>,
}

impl StderrTail {
    fn drain(pipe: ChildStderr) -> Self {
        let lines = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let sink = lines.clone();
        let reader = std::thread::spawn(move || {
            let mut pipe = BufReader::new(pipe);
            let mut raw = Vec::new();
            loop {
                raw.clear();
                match pipe.read_until(b'\n', &mut raw) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if let Ok(mut lines) = sink.lock() {
                            push_line(&mut lines, &String::from_utf8_lossy(&raw));
                        }
                    }
                }
            }
        });
        Self { lines, reader }
    }

    /// Wait for the pipe to close and return the last non-empty line
    fn finish(self) -> String {
        if self.reader.join().is_err() {
            tracing::debug!("ffmpeg stderr reader panicked");
        }
        let lines = match self.lines.lock() {
            Ok(lines) => lines,
            Err(poisoned) => poisoned.into_inner(),
        };
        lines
            .back()
            .cloned()
            .unwrap_or_else(|| "no output".to_string())
    }
}

/// Keep the last `\r`-separated segment of `raw` (ffmpeg redraws its status
/// line in place) and cap the buffer
fn push_line(lines: &mut VecDeque<String>, raw: &str) {
    let Some(line) = raw
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .last()
    else {
        return;
    };
    if lines.len() == STDERR_TAIL_LINES {
        lines.pop_front();
    }
    lines.push_back(line.to_string());
}
