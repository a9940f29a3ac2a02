// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker CLI runtime implementation.
//!
//! Shells out to `docker` (or a CLI-compatible binary such as `podman`).
//! Every call blocks until the CLI exits.

use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, warn};

use super::traits::{ContainerRuntime, Result, RunSpec, RuntimeError, Teardown};

/// Messages the docker and podman CLIs print for unknown containers.
const MISSING_CONTAINER_MARKERS: &[&str] = &["No such container", "no container with name"];

/// Container runtime backed by the docker CLI.
pub struct DockerRuntime {
    bin: String,
}

impl DockerRuntime {
    /// Create a runtime that invokes `bin`.
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    /// The CLI binary this runtime invokes.
    pub fn bin(&self) -> &str {
        &self.bin
    }

    /// Command line for logs and errors, with environment values masked.
    fn render(&self, args: &[String]) -> String {
        let mut rendered = self.bin.clone();
        for arg in redact_env_args(args) {
            rendered.push(' ');
            rendered.push_str(&arg);
        }
        rendered
    }

    async fn exec(&self, args: &[String]) -> Result<Output> {
        debug!(command = %self.render(args), "Invoking container runtime");
        let output = Command::new(&self.bin).args(args).output().await?;
        Ok(output)
    }

    fn failure(&self, args: &[String], output: &Output) -> RuntimeError {
        RuntimeError::CommandFailed {
            command: self.render(args),
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }

    async fn teardown_step(&self, verb: &str, name: &str) -> Result<Teardown> {
        let args = vec![verb.to_string(), name.to_string()];
        let output = self.exec(&args).await?;
        if output.status.success() {
            return Ok(Teardown::Removed);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing_container(&stderr) {
            debug!(container = %name, step = verb, "Container absent");
            return Ok(Teardown::Absent);
        }
        Err(self.failure(&args, &output))
    }
}

/// Whether runtime stderr says the container does not exist.
fn is_missing_container(stderr: &str) -> bool {
    MISSING_CONTAINER_MARKERS
        .iter()
        .any(|marker| stderr.contains(marker))
}

/// Extract the image reference from `docker load` output.
///
/// Handles both `Loaded image: name:tag` and `Loaded image ID: sha256:...`.
/// When several images are loaded, the last one wins.
pub(crate) fn parse_loaded_image(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            line.strip_prefix("Loaded image ID:")
                .or_else(|| line.strip_prefix("Loaded image:"))
                .map(|rest| rest.trim().to_string())
        })
        .filter(|reference| !reference.is_empty())
        .last()
}

/// Mask the value of every argument following `-e`.
///
/// The `run` arguments carry the emergency password; it must not reach logs.
fn redact_env_args(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut mask_next = false;
    for arg in args {
        if mask_next {
            let key = arg.split_once('=').map_or(arg.as_str(), |(key, _)| key);
            out.push(format!("{}=***", key));
            mask_next = false;
        } else {
            mask_next = arg == "-e";
            out.push(arg.clone());
        }
    }
    out
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn runtime_type(&self) -> &'static str {
        "docker"
    }

    async fn stop(&self, name: &str) -> Result<Teardown> {
        self.teardown_step("stop", name).await
    }

    async fn remove(&self, name: &str) -> Result<Teardown> {
        self.teardown_step("rm", name).await
    }

    async fn run(&self, spec: &RunSpec) -> Result<()> {
        let args = spec.to_args();
        let output = self.exec(&args).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("is already in use") {
            return Err(RuntimeError::NameConflict(spec.name.clone()));
        }
        Err(self.failure(&args, &output))
    }

    async fn is_running(&self, name: &str) -> bool {
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{json .State}}".to_string(),
            name.to_string(),
        ];
        let output = match self.exec(&args).await {
            Ok(output) if output.status.success() => output,
            Ok(_) => return false,
            Err(e) => {
                warn!(container = %name, error = %e, "Failed to inspect container");
                return false;
            }
        };

        match serde_json::from_slice::<serde_json::Value>(&output.stdout) {
            Ok(state) => state
                .get("Running")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            Err(e) => {
                warn!(container = %name, error = %e, "Unparseable container state");
                false
            }
        }
    }

    async fn load_image(&self, archive: &Path) -> Result<String> {
        let args = vec![
            "load".to_string(),
            "-i".to_string(),
            archive.display().to_string(),
        ];
        let output = self.exec(&args).await?;
        if !output.status.success() {
            return Err(self.failure(&args, &output));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_loaded_image(&stdout).ok_or_else(|| RuntimeError::UnexpectedOutput(stdout.to_string()))
    }

    async fn tag_image(&self, source: &str, target: &str) -> Result<()> {
        let args = vec!["tag".to_string(), source.to_string(), target.to_string()];
        let output = self.exec(&args).await?;
        if !output.status.success() {
            return Err(self.failure(&args, &output));
        }
        Ok(())
    }
}
