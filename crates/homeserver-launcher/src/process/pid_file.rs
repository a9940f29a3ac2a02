// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Companion PID file.
//!
//! The PID file is a hint: the port probe is authoritative for deciding
//! whether the companion runs.

use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::persist::write_atomic;

/// PID file at a fixed path.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// PID file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recorded PID, if the file exists and holds one.
    pub fn read(&self) -> Option<u32> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match raw.trim().parse() {
            Ok(pid) => Some(pid),
            Err(_) => {
                debug!(path = %self.path.display(), "Ignoring malformed PID file");
                None
            }
        }
    }

    /// Record `pid`, creating the parent directory if needed.
    pub fn write(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::persistence(&self.path, e))?;
        }
        write_atomic(&self.path, pid.to_string().as_bytes(), 0o644)
            .map_err(|e| Error::persistence(&self.path, e))
    }

    /// Remove the file. A missing file is fine.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::persistence(&self.path, e)),
        }
    }
}
