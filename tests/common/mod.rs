use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use parcelcam::capture::{CameraControl, CaptureDevice, CaptureError, RecordingProfile};
use parcelcam::config::{FocusMode, Settings, WhiteBalanceMode};

#[allow(dead_code)]
pub fn run_parcelcam(args: &[&str]) -> Output {
    TestEnv::new().run(args)
}

#[allow(dead_code)]
pub struct TestEnv {
    home: TempDir,
    config: TempDir,
    data: TempDir,
    cache: TempDir,
    runtime: TempDir,
}

#[allow(dead_code)]
impl TestEnv {
    pub fn new() -> Self {
        Self {
            home: tempfile::tempdir().expect("create temporary HOME dir"),
            config: tempfile::tempdir().expect("create temporary XDG config dir"),
            data: tempfile::tempdir().expect("create temporary XDG data dir"),
            cache: tempfile::tempdir().expect("create temporary XDG cache dir"),
            runtime: tempfile::tempdir().expect("create temporary XDG runtime dir"),
        }
    }

    pub fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_parcelcam"))
            .args(args)
            .env("HOME", self.home.path())
            .env("XDG_CONFIG_HOME", self.config.path())
            .env("XDG_DATA_HOME", self.data.path())
            .env("XDG_CACHE_HOME", self.cache.path())
            .env("XDG_RUNTIME_DIR", self.runtime.path())
            .env_remove("PARCELCAM_SERVER_ADDRESS")
            .env_remove("PARCELCAM_SERVER_PORT")
            .env_remove("RUST_LOG")
            .output()
            .expect("failed to execute parcelcam binary")
    }

    pub fn home(&self) -> &Path {
        self.home.path()
    }

    pub fn library_dir(&self) -> PathBuf {
        self.home.path().join("library")
    }

    pub fn config_path(&self) -> PathBuf {
        let output = self.run(&["config", "path"]);
        assert!(
            output.status.success(),
            "config path should succeed\nstdout:\n{}\nstderr:\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );

        let path = String::from_utf8_lossy(&output.stdout);
        PathBuf::from(path.trim())
    }

    pub fn write_config(&self, contents: &str) {
        let config_path = self.config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).expect("create config parent directory");
        }
        std::fs::write(&config_path, contents).expect("write config file");
    }

    /// Config with the library inside the temporary HOME
    pub fn write_storage_config(&self) {
        self.write_config(&format!(
            "[storage]\nscratch_dir = {:?}\nlibrary_dir = {:?}\n",
            self.home.path().join("scratch"),
            self.library_dir()
        ));
    }
}

/// Settings whose directories all live under `root`
#[allow(dead_code)]
pub fn settings_in(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.general.data_dir = root.join("data");
    settings.storage.scratch_dir = root.join("scratch");
    settings.storage.library_dir = root.join("library");
    settings.delivery.confirm_save = false;
    settings
}

/// What a [`ScriptedCamera`] was asked to do
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct CameraLog {
    pub opened: usize,
    pub closed: usize,
    pub started: Vec<PathBuf>,
    pub stopped: usize,
}

/// Camera double that writes a fixed payload to the output path on start
#[allow(dead_code)]
pub struct ScriptedCamera {
    pub payload: Vec<u8>,
    pub fail_open: bool,
    pub log: Arc<Mutex<CameraLog>>,
}

#[allow(dead_code)]
impl ScriptedCamera {
    pub fn new(payload: &[u8]) -> (Self, Arc<Mutex<CameraLog>>) {
        let log = Arc::new(Mutex::new(CameraLog::default()));
        let camera = Self {
            payload: payload.to_vec(),
            fail_open: false,
            log: log.clone(),
        };
        (camera, log)
    }
}

impl CaptureDevice for ScriptedCamera {
    fn open(&mut self) -> Result<(), CaptureError> {
        if self.fail_open {
            return Err(CaptureError::Device("camera unplugged".to_string()));
        }
        self.log.lock().unwrap().opened += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closed += 1;
    }

    fn controls(&self) -> Vec<CameraControl> {
        vec![CameraControl::Exposure, CameraControl::Zoom]
    }

    fn set_exposure_compensation(&mut self, _ev: i32) -> Result<(), CaptureError> {
        Ok(())
    }

    fn set_white_balance(
        &mut self,
        _mode: WhiteBalanceMode,
        _temperature: Option<u32>,
    ) -> Result<(), CaptureError> {
        Ok(())
    }

    fn set_focus_mode(&mut self, _mode: FocusMode) -> Result<(), CaptureError> {
        Ok(())
    }

    fn set_iso(&mut self, _auto: bool, _iso: u32) -> Result<(), CaptureError> {
        Ok(())
    }

    fn set_zoom_ratio(&mut self, _ratio: f32) -> Result<(), CaptureError> {
        Ok(())
    }

    fn start(&mut self, output_path: &Path, _profile: &RecordingProfile) -> Result<(), CaptureError> {
        std::fs::write(output_path, &self.payload)
            .map_err(|e| CaptureError::Device(e.to_string()))?;
        self.log.lock().unwrap().started.push(output_path.to_path_buf());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.log.lock().unwrap().stopped += 1;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

/// What the test server saw for one multipart upload
#[allow(dead_code)]
#[derive(Debug, Clone, Default)]
pub struct ReceivedUpload {
    pub tracking_number: Option<String>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Minimal LAN server: `POST /upload` records the form, `GET /ping` answers 200.
///
/// `status` and `body` are what `/upload` replies with.
#[allow(dead_code)]
pub async fn spawn_upload_server(
    status: u16,
    body: &'static str,
) -> (u16, Arc<Mutex<Vec<ReceivedUpload>>>) {
    use axum::extract::{Multipart, State};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::Router;

    type Received = Arc<Mutex<Vec<ReceivedUpload>>>;

    async fn upload(
        State((received, status, body)): State<(Received, u16, &'static str)>,
        mut multipart: Multipart,
    ) -> (StatusCode, &'static str) {
        let mut upload = ReceivedUpload::default();
        while let Ok(Some(field)) = multipart.next_field().await {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some("trackingNumber") => {
                    upload.tracking_number = field.text().await.ok();
                }
                Some("file") => {
                    upload.file_name = field.file_name().map(str::to_string);
                    upload.content_type = field.content_type().map(str::to_string);
                    upload.bytes = field.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
                }
                _ => {}
            }
        }
        received.lock().unwrap().push(upload);
        (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body,
        )
    }

    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/upload", post(upload))
        .route("/ping", get(|| async { "pong" }))
        .with_state((received.clone(), status, body));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test server");
    let port = listener.local_addr().expect("test server address").port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (port, received)
}

/// A local port with nothing listening on it
#[allow(dead_code)]
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe port");
    let port = listener.local_addr().expect("probe port address").port();
    drop(listener);
    port
}
