// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Companion process supervision.
//!
//! The companion is a long-lived host process, not a container. Whether it
//! runs is decided by whether something listens on the port its own config
//! declares:
//!
//! ```text
//!              port bound?
//!             /           \
//!           no             yes
//!           |             /    \
//!         start    not forced   forced
//!                      |          |
//!               AlreadyRunning   SIGKILL holders, wait for the port,
//!                                clear PID file, start
//! ```
//!
//! A start only counts once the process survived the startup window. A
//! failed start is reported, not fatal: the container is already serving.

mod mock;
mod pid_file;
mod probe;
mod spawner;

pub use mock::MockProbe;
pub use pid_file::PidFile;
pub use probe::{PortProbe, ProcFsProbe};
pub use spawner::{SpawnedProcess, spawn};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CompanionConfig;
use crate::error::{Error, Result};

/// Lines of companion log surfaced when a start fails.
const LOG_TAIL_LINES: usize = 20;

/// How long to wait for a killed holder to release the port.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

const RELEASE_POLL: Duration = Duration::from_millis(100);

/// Result of [`ProcessSupervisor::ensure_running`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The port was already held and no takeover was requested.
    AlreadyRunning {
        /// Companion port.
        port: u16,
        /// Visible holders of the port.
        holders: Vec<u32>,
    },
    /// A new companion was started and survived the startup window.
    Started {
        /// Companion port.
        port: u16,
        /// PID of the new process.
        pid: u32,
        /// Holders killed to make room, if this was a takeover.
        replaced: Vec<u32>,
    },
    /// The companion could not be started.
    StartupFailed {
        /// Companion port.
        port: u16,
        /// Why the start failed.
        reason: String,
    },
}

#[derive(Debug, Deserialize)]
struct CompanionSettings {
    port: u16,
}

/// Read the port from the companion's YAML config.
pub fn companion_port(config_file: &Path) -> Result<u16> {
    let raw = match std::fs::read_to_string(config_file) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::ConfigMissing(config_file.to_path_buf()));
        }
        Err(e) => return Err(Error::Io(e)),
    };
    let settings: CompanionSettings =
        serde_yaml::from_str(&raw).map_err(|e| Error::ConfigInvalid {
            path: config_file.to_path_buf(),
            reason: e.to_string(),
        })?;
    Ok(settings.port)
}

/// Keeps exactly one companion listening on its port.
pub struct ProcessSupervisor {
    config: CompanionConfig,
    probe: Arc<dyn PortProbe>,
    pid_file: PidFile,
}

impl ProcessSupervisor {
    /// Create a supervisor for the configured companion.
    pub fn new(config: CompanionConfig, probe: Arc<dyn PortProbe>) -> Self {
        let pid_file = PidFile::new(config.pid_file.clone());
        Self {
            config,
            probe,
            pid_file,
        }
    }

    /// The companion's PID file.
    pub fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }

    /// Make sure a companion listens on its configured port.
    ///
    /// With `forced`, whatever holds the port is killed and replaced.
    /// Returns an error only when the companion config is missing or
    /// unreadable. Everything after that is best-effort: a failed takeover
    /// or start is [`EnsureOutcome::StartupFailed`], and PID file trouble is
    /// logged.
    pub async fn ensure_running(&self, forced: bool) -> Result<EnsureOutcome> {
        let port = companion_port(&self.config.config_file)?;
        let bound = self.probe.is_bound(port).await;
        self.check_pid_hint(port, bound);

        let replaced = match (bound, forced) {
            (true, false) => {
                let holders = self.probe.holders(port).await;
                info!(port, holders = ?holders, "Companion already running");
                return Ok(EnsureOutcome::AlreadyRunning { port, holders });
            }
            (true, true) => {
                let holders = self.probe.holders(port).await;
                warn!(port, holders = ?holders, "Forcing companion takeover");
                if let Err(e) = self.take_over(port, &holders).await {
                    return Ok(self.startup_failed(port, e));
                }
                holders
            }
            (false, _) => Vec::new(),
        };

        match self.start().await {
            Ok(pid) => Ok(EnsureOutcome::Started {
                port,
                pid,
                replaced,
            }),
            Err(e) => Ok(self.startup_failed(port, e)),
        }
    }

    fn check_pid_hint(&self, port: u16, bound: bool) {
        let Some(pid) = self.pid_file.read() else {
            return;
        };
        match (self.probe.pid_alive(pid), bound) {
            (false, _) => debug!(pid, "PID file is stale"),
            (true, false) => warn!(
                pid,
                port,
                pid_file = %self.pid_file.path().display(),
                "Recorded companion is alive but its port is free; it may be listening on a previous port"
            ),
            (true, true) => {}
        }
    }

    async fn take_over(&self, port: u16, holders: &[u32]) -> Result<()> {
        if holders.is_empty() {
            warn!(port, "Port is bound by a process that cannot be inspected");
        }
        for &pid in holders {
            kill_holder(pid);
        }

        let deadline = tokio::time::Instant::now() + RELEASE_TIMEOUT;
        while self.probe.is_bound(port).await {
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Startup(format!(
                    "port {} still bound after killing {:?}",
                    port, holders
                )));
            }
            tokio::time::sleep(RELEASE_POLL).await;
        }

        if let Err(e) = self.pid_file.clear() {
            warn!(error = %e, "Could not clear PID file of the replaced companion");
        }
        Ok(())
    }

    async fn start(&self) -> Result<u32> {
        let SpawnedProcess { mut child, pid } = spawn(&self.config)?;
        info!(
            pid,
            command = %self.config.command,
            log = %self.config.log_file.display(),
            "Started companion"
        );

        tokio::time::sleep(self.config.startup_wait).await;

        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                return Err(Error::Startup(format!(
                    "companion exited during startup ({})",
                    status
                )));
            }
            Err(e) => return Err(Error::Startup(e.to_string())),
        }
        if !self.probe.pid_alive(pid) {
            return Err(Error::Startup(format!("companion {} is no longer running", pid)));
        }

        match self.pid_file.write(pid) {
            Ok(()) => {
                info!(pid, pid_file = %self.pid_file.path().display(), "Companion running")
            }
            Err(e) => warn!(pid, error = %e, "Companion running but its PID was not recorded"),
        }
        Ok(pid)
    }

    fn startup_failed(&self, port: u16, error: Error) -> EnsureOutcome {
        let tail = spawner::log_tail(&self.config.log_file, LOG_TAIL_LINES);
        warn!(
            port,
            error = %error,
            log = %self.config.log_file.display(),
            log_tail = %tail,
            "Companion failed to start"
        );
        if let Err(e) = self.pid_file.clear() {
            debug!(error = %e, "Could not clear PID file");
        }
        EnsureOutcome::StartupFailed {
            port,
            reason: error.to_string(),
        }
    }
}

/// SIGKILL a port holder. The launcher never kills itself.
fn kill_holder(pid: u32) {
    if pid == std::process::id() {
        warn!(pid, "Refusing to kill the launcher itself");
        return;
    }
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match signal::kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => info!(pid, "Sent SIGKILL to port holder"),
        Err(nix::errno::Errno::ESRCH) => debug!(pid, "Port holder already dead (ESRCH)"),
        Err(e) => warn!(pid, error = %e, "Failed to send SIGKILL to port holder"),
    }
}
