//! Durable settings store used by the session

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::Settings;

/// Settings plus the file they persist to.
///
/// Mutations are applied in memory first and then written out, so a failing
/// disk never leaves the running session with stale values.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    current: Settings,
}

impl SettingsStore {
    /// Store backed by a config file
    pub fn new(path: PathBuf, current: Settings) -> Self {
        Self {
            path: Some(path),
            current,
        }
    }

    /// Store that never touches the filesystem
    pub fn in_memory(current: Settings) -> Self {
        Self {
            path: None,
            current,
        }
    }

    pub fn get(&self) -> &Settings {
        &self.current
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Apply a mutation and persist it
    pub fn update<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Settings),
    {
        f(&mut self.current);
        self.persist()
    }

    /// Replace all settings and persist them
    pub fn replace(&mut self, settings: Settings) -> Result<()> {
        self.current = settings;
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        match &self.path {
            Some(path) => self.current.save_to(path),
            None => Ok(()),
        }
    }
}
