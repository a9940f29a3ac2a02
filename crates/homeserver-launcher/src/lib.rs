// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Homeserver Launcher - Homeserver Lifecycle Orchestration
//!
//! One invocation brings a single-host deployment to its desired state:
//! optionally rebuild the homeserver image from source, optionally rotate the
//! registration token, always recreate the homeserver container, and always
//! make sure the registration companion is serving on its port.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 Scheduler / operator (CLI flags)                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Orchestrator                                    │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │   Image     │─►│   Token     │─►│  Container  │─►│  Companion  │     │
//! │  │   Builder   │  │   Manager   │  │  Supervisor │  │  Supervisor │     │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!        │                  │                 │                 │
//!        │ git / nix        │ token file      │ docker CLI      │ /proc, signals
//!        ▼                  ▼                 ▼                 ▼
//!   source checkout    read-only mount   managed container   companion process
//! ```
//!
//! # Failure Policy
//!
//! Every error aborts the invocation at the step that raised it, except a
//! companion that fails to start: the container is already serving by then,
//! so that failure is logged with the companion's own log tail and the
//! invocation still succeeds.
//!
//! | Exit code | Meaning |
//! |-----------|---------|
//! | `0` | All stages completed (companion start may have failed, see log) |
//! | `1` | A stage failed; the reason is the last line in the log |
//! | `2` | Unknown or malformed flag, nothing was done |
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables, after reading
//! `launcher.env` (or the file named by `LAUNCHER_CONFIG`) if present:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `LAUNCHER_BASE_DIR` | `.` | Root the other defaults hang off |
//! | `LAUNCHER_TOKEN_FILE` | `<base>/.registration_token` | Registration token file |
//! | `LAUNCHER_TOKEN_BYTES` | `3` | Random bytes per token |
//! | `LAUNCHER_REPO_DIR` | `<base>/tuwunel` | Homeserver source checkout |
//! | `LAUNCHER_IMAGE_TAG` | `tuwunel:latest` | Stable local image tag |
//! | `LAUNCHER_PULL_COMMAND` | `git pull --ff-only` | Source sync command |
//! | `LAUNCHER_BUILD_COMMAND` | `nix build .#oci-image` | Image build command |
//! | `LAUNCHER_ARTIFACT_LINK` | `result` | Build output symlink |
//! | `LAUNCHER_RUNTIME` | `docker` | Container runtime CLI |
//! | `LAUNCHER_CONTAINER_NAME` | `tuwunel` | Managed container name |
//! | `LAUNCHER_ENV_FILE` | `<base>/.env` | Homeserver env file |
//! | `LAUNCHER_ENV_PREFIX` | `CONDUWUIT_` | Comma separated key allowlist |
//! | `LAUNCHER_COMPANION_DIR` | `<base>/sw1tch` | Companion working directory |
//! | `LAUNCHER_COMPANION_CONFIG` | `<dir>/config/config.yaml` | Companion config with `port` |
//! | `LAUNCHER_COMPANION_COMMAND` | `python3 -m sw1tch` | Companion start command |
//! | `LAUNCHER_PID_FILE` | `<base>/data/sw1tch.pid` | Companion PID file |
//! | `LAUNCHER_STARTUP_WAIT_MS` | `3000` | Companion startup window |
//! | `LAUNCHER_LOG_FILE` | `<base>/logs/launcher.log` | Launcher log |
//!
//! See [`config`] for the remaining mount and network settings.
//!
//! # Modules
//!
//! - [`cli`]: Command line flags
//! - [`config`]: Configuration from environment variables
//! - [`container`]: Managed container recreation
//! - [`env_file`]: Homeserver env file parsing and allowlisting
//! - [`error`]: Error types and the fatal/non-fatal split
//! - [`image`]: Source pull, image build, load and tag
//! - [`logging`]: Subscriber setup
//! - [`orchestrator`]: The ordered invocation pipeline
//! - [`process`]: Companion supervision by port liveness
//! - [`runtime`]: Container runtime backends
//! - [`token`]: Registration token rotation

#![deny(missing_docs)]

/// Command line flags.
pub mod cli;

/// Configuration loaded from environment variables.
pub mod config;

/// Managed container recreation.
pub mod container;

/// Homeserver env file.
pub mod env_file;

/// Error types for launcher operations.
pub mod error;

/// Image build pipeline.
pub mod image;

/// Log setup.
pub mod logging;

/// Invocation pipeline.
pub mod orchestrator;

/// Companion process supervision.
pub mod process;

/// Container runtime backends (Docker CLI, mock).
pub mod runtime;

/// Registration token rotation.
pub mod token;

mod persist;

pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::{Directives, InvocationReport, Orchestrator};
