// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container runtime trait definitions.
//!
//! Defines the abstract interface the launcher uses to talk to a container
//! runtime. Implementations are pure execution: no policy, no retries.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Errors from runtime operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// Runtime command exited with a failure status.
    #[error("`{command}` failed with exit code {exit_code:?}: {stderr}")]
    CommandFailed {
        /// Rendered command line.
        command: String,
        /// Exit code, if the command exited normally.
        exit_code: Option<i32>,
        /// Standard error output.
        stderr: String,
    },

    /// A container with this name already exists.
    #[error("Container name already in use: {0}")]
    NameConflict(String),

    /// Runtime produced output the launcher could not interpret.
    #[error("Unexpected runtime output: {0}")]
    UnexpectedOutput(String),

    /// I/O operation failed (typically: runtime binary not found).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Outcome of an idempotent teardown step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// The container existed and the step acted on it.
    Removed,
    /// There was nothing to act on.
    Absent,
}

/// A volume or bind mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Named volume or absolute host path.
    pub source: String,
    /// Path inside the container.
    pub target: String,
    /// Mount read-only.
    pub read_only: bool,
}

impl Mount {
    /// Render as a `-v` argument.
    pub fn to_arg(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}

/// Everything needed to create and start the managed container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Volumes and bind mounts.
    pub mounts: Vec<Mount>,
    /// Network mode.
    pub network: String,
    /// Restart policy.
    pub restart: String,
    /// Environment pairs in the order they are passed.
    pub env: Vec<(String, String)>,
}

impl RunSpec {
    /// Render the arguments of `<runtime> run`.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
        ];
        for mount in &self.mounts {
            args.push("-v".to_string());
            args.push(mount.to_arg());
        }
        args.push(format!("--network={}", self.network));
        args.push(format!("--restart={}", self.restart));
        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(self.image.clone());
        args
    }

    /// Look up an environment value by key.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Trait for container runtimes.
///
/// All operations address containers by name; the runtime itself enforces
/// that at most one container carries a given name.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Runtime type identifier (e.g., "docker", "mock").
    fn runtime_type(&self) -> &'static str;

    /// Stop a container. A missing container is [`Teardown::Absent`].
    async fn stop(&self, name: &str) -> Result<Teardown>;

    /// Remove a container. A missing container is [`Teardown::Absent`].
    async fn remove(&self, name: &str) -> Result<Teardown>;

    /// Create and start a detached container.
    async fn run(&self, spec: &RunSpec) -> Result<()>;

    /// Check whether the named container is running.
    async fn is_running(&self, name: &str) -> bool;

    /// Load an image archive, returning the reference the runtime assigned.
    async fn load_image(&self, archive: &Path) -> Result<String>;

    /// Point `target` at the image `source`.
    async fn tag_image(&self, source: &str, target: &str) -> Result<()>;
}
