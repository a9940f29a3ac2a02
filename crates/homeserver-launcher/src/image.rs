// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Image Builder
//!
//! Pulls the homeserver checkout, runs the reproducible build, loads the
//! resulting archive into the container runtime and moves the stable local
//! tag onto it. The previous image under that tag is superseded; no rollback
//! tag is kept.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{CommandLine, ImageConfig};
use crate::error::{Error, Result};
use crate::runtime::ContainerRuntime;

/// Max bytes of tool stderr carried in an error.
const STDERR_TAIL_BYTES: usize = 2000;

/// Image reference the container is created from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef(String);

impl ImageRef {
    /// Wrap an image reference.
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// The reference string passed to the runtime.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A freshly built and tagged image.
#[derive(Debug, Clone)]
pub struct ArtifactRef {
    /// Archive the build symlink resolved to.
    pub archive: PathBuf,
    /// Reference the runtime assigned on load.
    pub loaded_ref: String,
    /// Stable local tag now pointing at the image.
    pub tag: ImageRef,
    /// Source revision that was built, when it could be determined.
    pub revision: Option<String>,
    /// When the tag was moved.
    pub built_at: DateTime<Utc>,
}

/// Builds the homeserver image from source.
pub struct ImageBuilder {
    config: ImageConfig,
    runtime: Arc<dyn ContainerRuntime>,
}

impl ImageBuilder {
    /// Create an image builder.
    pub fn new(config: ImageConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { config, runtime }
    }

    /// Stable tag the container is created from, whether or not a build ran.
    pub fn tag(&self) -> ImageRef {
        ImageRef::new(&self.config.tag)
    }

    /// Pull, build, load and tag. Every step is fatal on failure.
    pub async fn build_and_tag(&self) -> Result<ArtifactRef> {
        let repo = &self.config.repo_dir;
        if !repo.is_dir() {
            return Err(Error::SourceSync(format!(
                "source checkout not found: {}",
                repo.display()
            )));
        }

        info!(repo = %repo.display(), command = %self.config.pull_command, "Pulling latest source");
        let output = run_in(repo, &self.config.pull_command)
            .await
            .map_err(|e| Error::SourceSync(format!("{}: {}", self.config.pull_command, e)))?;
        if !output.status.success() {
            return Err(Error::SourceSync(stderr_tail(&output)));
        }

        let revision = current_revision(repo).await;
        info!(
            repo = %repo.display(),
            revision = revision.as_deref().unwrap_or("unknown"),
            command = %self.config.build_command,
            "Building image"
        );
        let output = run_in(repo, &self.config.build_command)
            .await
            .map_err(|e| Error::Build {
                exit_code: None,
                stderr: format!("{}: {}", self.config.build_command, e),
            })?;
        if !output.status.success() {
            return Err(Error::Build {
                exit_code: output.status.code(),
                stderr: stderr_tail(&output),
            });
        }

        let link = repo.join(&self.config.artifact_link);
        let archive = std::fs::canonicalize(&link).map_err(|_| Error::ArtifactMissing(link.clone()))?;
        if !archive.is_file() {
            return Err(Error::ArtifactMissing(link));
        }
        debug!(archive = %archive.display(), "Resolved build artifact");

        let loaded_ref = self
            .runtime
            .load_image(&archive)
            .await
            .map_err(|e| Error::Load(e.to_string()))?;
        self.runtime
            .tag_image(&loaded_ref, &self.config.tag)
            .await
            .map_err(|e| Error::Load(e.to_string()))?;

        info!(loaded = %loaded_ref, tag = %self.config.tag, "Image loaded and tagged");

        Ok(ArtifactRef {
            archive,
            loaded_ref,
            tag: self.tag(),
            revision,
            built_at: Utc::now(),
        })
    }
}

async fn run_in(dir: &Path, command: &CommandLine) -> std::io::Result<Output> {
    Command::new(&command.program)
        .args(&command.args)
        .current_dir(dir)
        .output()
        .await
}

/// Best-effort `git rev-parse HEAD` of the checkout.
async fn current_revision(repo: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let revision = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!revision.is_empty()).then_some(revision)
}

fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.len() <= STDERR_TAIL_BYTES {
        return stderr.to_string();
    }
    let mut start = stderr.len() - STDERR_TAIL_BYTES;
    while !stderr.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &stderr[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntime, RuntimeCall};
    use tempfile::TempDir;

    fn config(repo: &Path, pull: &str, build: &str) -> ImageConfig {
        ImageConfig {
            repo_dir: repo.to_path_buf(),
            tag: "tuwunel:latest".to_string(),
            pull_command: CommandLine::parse(pull).unwrap(),
            build_command: CommandLine::parse(build).unwrap(),
            artifact_link: PathBuf::from("result"),
        }
    }

    fn with_artifact(dir: &TempDir) {
        let archive = dir.path().join("image.tar.gz");
        std::fs::write(&archive, b"archive").unwrap();
        std::os::unix::fs::symlink(&archive, dir.path().join("result")).unwrap();
    }

    #[tokio::test]
    async fn test_build_and_tag_moves_stable_tag() {
        let dir = TempDir::new().unwrap();
        with_artifact(&dir);
        let runtime = Arc::new(MockRuntime::new());
        let builder = ImageBuilder::new(config(dir.path(), "true", "true"), runtime.clone());

        let artifact = builder.build_and_tag().await.unwrap();

        assert_eq!(artifact.tag.as_str(), "tuwunel:latest");
        assert_eq!(artifact.archive.file_name().unwrap(), "image.tar.gz");
        assert_eq!(
            runtime.tag_target("tuwunel:latest").await.as_deref(),
            Some(artifact.loaded_ref.as_str())
        );
    }

    #[tokio::test]
    async fn test_pull_failure_is_source_sync_error() {
        let dir = TempDir::new().unwrap();
        with_artifact(&dir);
        let runtime = Arc::new(MockRuntime::new());
        let builder = ImageBuilder::new(config(dir.path(), "false", "true"), runtime.clone());

        let err = builder.build_and_tag().await.unwrap_err();

        assert!(matches!(err, Error::SourceSync(_)));
        assert!(runtime.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_checkout_is_source_sync_error() {
        let dir = TempDir::new().unwrap();
        let builder = ImageBuilder::new(
            config(&dir.path().join("nope"), "true", "true"),
            Arc::new(MockRuntime::new()),
        );
        assert!(matches!(
            builder.build_and_tag().await.unwrap_err(),
            Error::SourceSync(_)
        ));
    }

    #[tokio::test]
    async fn test_build_failure_surfaces_exit_code() {
        let dir = TempDir::new().unwrap();
        let config = ImageConfig {
            build_command: CommandLine::new("sh", ["-c", "echo boom >&2; exit 3"]),
            ..config(dir.path(), "true", "true")
        };
        let builder = ImageBuilder::new(config, Arc::new(MockRuntime::new()));

        match builder.build_and_tag().await.unwrap_err() {
            Error::Build { exit_code, stderr } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_symlink_is_artifact_missing() {
        let dir = TempDir::new().unwrap();
        let builder = ImageBuilder::new(
            config(dir.path(), "true", "true"),
            Arc::new(MockRuntime::new()),
        );
        assert!(matches!(
            builder.build_and_tag().await.unwrap_err(),
            Error::ArtifactMissing(_)
        ));
    }

    #[tokio::test]
    async fn test_load_failure_is_load_error() {
        let dir = TempDir::new().unwrap();
        with_artifact(&dir);
        let runtime = Arc::new(MockRuntime::failing_load());
        let builder = ImageBuilder::new(config(dir.path(), "true", "true"), runtime.clone());

        assert!(matches!(
            builder.build_and_tag().await.unwrap_err(),
            Error::Load(_)
        ));
        assert!(matches!(runtime.calls().await.as_slice(), [RuntimeCall::Load(_)]));
    }

    #[test]
    fn test_stderr_tail_truncates_from_front() {
        let output = std::process::Command::new("sh")
            .args(["-c", "head -c 5000 /dev/zero | tr '\\0' 'x' >&2; printf END >&2"])
            .output()
            .unwrap();
        let tail = stderr_tail(&output);
        assert!(tail.starts_with("..."));
        assert!(tail.ends_with("END"));
        assert_eq!(tail.len(), STDERR_TAIL_BYTES + 3);
    }
}
