// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Detached companion spawning.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::config::CompanionConfig;
use crate::error::{Error, Result};

/// A spawned process with its child handle and PID.
pub struct SpawnedProcess {
    /// The child process handle.
    pub child: Child,
    /// The OS process ID.
    pub pid: u32,
}

/// Spawn the companion in its own session.
///
/// Standard input is closed and both output streams are appended to the
/// companion log, so the process outlives the launcher and its terminal.
pub fn spawn(config: &CompanionConfig) -> Result<SpawnedProcess> {
    ensure_parent(&config.log_file)?;
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)
        .map_err(|e| Error::persistence(&config.log_file, e))?;
    let log_err = log
        .try_clone()
        .map_err(|e| Error::persistence(&config.log_file, e))?;

    let mut cmd = Command::new(&config.command.program);
    cmd.args(&config.command.args)
        .current_dir(&config.work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .kill_on_drop(false);

    // SAFETY: setsid is async-signal-safe and touches no shared state.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid().map_err(io::Error::from)?;
            Ok(())
        });
    }

    let child = cmd
        .spawn()
        .map_err(|e| Error::Startup(format!("failed to spawn {}: {}", config.command, e)))?;
    let pid = child
        .id()
        .ok_or_else(|| Error::Startup("failed to get process ID".to_string()))?;

    Ok(SpawnedProcess { child, pid })
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| Error::persistence(path, e))?;
    }
    Ok(())
}

/// Last `lines` lines of `path`, or an empty string if it cannot be read.
pub(crate) fn log_tail(path: &Path, lines: usize) -> String {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return String::new();
    };
    let all: Vec<&str> = contents.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
