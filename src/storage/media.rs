//! Scratch paths and the user-visible video library

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::Settings;

/// Extension of every recording
pub const VIDEO_EXTENSION: &str = "mp4";

/// Prefix of library entries that are still being written
const PENDING_PREFIX: &str = ".pending-";

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
///
/// One character in, one character out: length (in chars) and order are kept.
pub fn sanitize_tracking_id(tracking_id: &str) -> String {
    tracking_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Resolves scratch paths for recordings and commits finished ones to the library
#[derive(Debug, Clone)]
pub struct MediaStore {
    scratch_dir: PathBuf,
    library_dir: PathBuf,
}

impl MediaStore {
    pub fn new(scratch_dir: impl Into<PathBuf>, library_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            library_dir: library_dir.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.storage.scratch_dir.clone(),
            settings.storage.library_dir.clone(),
        )
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn library_dir(&self) -> &Path {
        &self.library_dir
    }

    /// Scratch path for a tracking number.
    ///
    /// The same tracking number always maps to the same file, so a retake
    /// replaces the previous attempt.
    pub fn local_path(&self, tracking_id: &str) -> PathBuf {
        if !self.scratch_dir.exists() {
            match fs::create_dir_all(&self.scratch_dir) {
                Ok(()) => debug!("Created scratch directory: {}", self.scratch_dir.display()),
                Err(e) => warn!(
                    "Failed to create scratch directory {}: {}",
                    self.scratch_dir.display(),
                    e
                ),
            }
        }

        self.scratch_dir
            .join(format!("{}.{}", sanitize_tracking_id(tracking_id), VIDEO_EXTENSION))
    }

    /// Copy a finished recording into the library.
    ///
    /// Returns the visible library path, or `None` when the source is missing or
    /// empty, or the copy fails. A failed copy never leaves a visible or pending
    /// entry behind.
    pub fn commit_to_library(&self, tracking_id: &str, source: &Path) -> Option<PathBuf> {
        let size = match fs::metadata(source) {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) | Err(_) => {
                warn!("Cannot commit {}: source file missing", source.display());
                return None;
            }
        };

        if size == 0 {
            warn!("Cannot commit {}: source file is empty", source.display());
            return None;
        }

        if let Err(e) = fs::create_dir_all(&self.library_dir) {
            warn!(
                "Failed to create library directory {}: {}",
                self.library_dir.display(),
                e
            );
            return None;
        }

        let file_name = format!("{}.{}", sanitize_tracking_id(tracking_id), VIDEO_EXTENSION);
        let pending = self
            .library_dir
            .join(format!("{}{}-{}", PENDING_PREFIX, uuid::Uuid::new_v4(), file_name));

        if let Err(e) = copy_into(source, &pending) {
            warn!("Failed to copy {} into library: {}", source.display(), e);
            let _ = fs::remove_file(&pending);
            return None;
        }

        let visible = self.available_name(&file_name);
        if let Err(e) = fs::rename(&pending, &visible) {
            warn!("Failed to publish {}: {}", visible.display(), e);
            let _ = fs::remove_file(&pending);
            return None;
        }

        info!("Committed {} ({} bytes) to library", visible.display(), size);
        Some(visible)
    }

    /// Delete a scratch file; absent files count as deleted
    pub fn delete_scratch(&self, path: &Path) -> bool {
        match fs::remove_file(path) {
            Ok(()) => {
                debug!("Deleted scratch file {}", path.display());
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!("Failed to delete scratch file {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Visible library entries, sorted by name
    pub fn list_library(&self) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.library_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// First free name: `name.mp4`, then `name (1).mp4`, `name (2).mp4`, ...
    fn available_name(&self, file_name: &str) -> PathBuf {
        let candidate = self.library_dir.join(file_name);
        if !candidate.exists() {
            return candidate;
        }

        let stem = file_name
            .strip_suffix(&format!(".{}", VIDEO_EXTENSION))
            .unwrap_or(file_name);

        (1..)
            .map(|n| {
                self.library_dir
                    .join(format!("{} ({}).{}", stem, n, VIDEO_EXTENSION))
            })
            .find(|path| !path.exists())
            .unwrap_or(candidate)
    }
}

fn copy_into(source: &Path, destination: &Path) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(source)?);
    let mut writer = BufWriter::new(File::create(destination)?);
    io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}
