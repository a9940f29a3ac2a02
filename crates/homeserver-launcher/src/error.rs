// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for homeserver-launcher.

use std::path::PathBuf;

use thiserror::Error;

/// Launcher errors.
///
/// Every variant except [`Error::Startup`] aborts the invocation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A credential or log file could not be written.
    #[error("Failed to persist {}: {source}", path.display())]
    Persistence {
        /// File that could not be written.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Pulling the latest source revision failed.
    #[error("Source sync failed: {0}")]
    SourceSync(String),

    /// The reproducible build exited unsuccessfully.
    #[error("Build failed with exit code {exit_code:?}: {stderr}")]
    Build {
        /// Exit code of the build tool, if it exited normally.
        exit_code: Option<i32>,
        /// Tail of the build tool's standard error.
        stderr: String,
    },

    /// The build's output symlink did not resolve to an archive.
    #[error("Build artifact missing: {}", .0.display())]
    ArtifactMissing(PathBuf),

    /// Loading or re-tagging the image failed.
    #[error("Image load failed: {0}")]
    Load(String),

    /// A required configuration file is absent.
    #[error("Required configuration file missing: {}", .0.display())]
    ConfigMissing(PathBuf),

    /// A configuration file exists but cannot be used.
    #[error("Invalid configuration file {}: {reason}", path.display())]
    ConfigInvalid {
        /// Offending file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The container runtime refused to create or start the container.
    #[error("Container start failed: {0}")]
    ContainerStart(String),

    /// The companion process did not stay alive through the startup window.
    #[error("Companion startup failed: {0}")]
    Startup(String),

    /// Container runtime call failed outside of the start step.
    #[error("Runtime error: {0}")]
    Runtime(#[from] crate::runtime::RuntimeError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error must abort the whole invocation.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Startup(_))
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Persistence {
            path: path.into(),
            source,
        }
    }
}

/// Result type using launcher Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_is_the_only_non_fatal_error() {
        assert!(!Error::Startup("exited".into()).is_fatal());
        assert!(Error::SourceSync("conflict".into()).is_fatal());
        assert!(Error::ConfigMissing(PathBuf::from("/x/.env")).is_fatal());
        assert!(Error::ContainerStart("rejected".into()).is_fatal());
    }

    #[test]
    fn test_persistence_message_names_path() {
        let err = Error::persistence(
            "/srv/.registration_token",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        let msg = err.to_string();
        assert!(msg.contains("/srv/.registration_token"));
    }

    #[test]
    fn test_build_error_includes_exit_code() {
        let err = Error::Build {
            exit_code: Some(100),
            stderr: "error: builder failed".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("builder failed"));
    }
}
