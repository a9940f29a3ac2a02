// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for homeserver-launcher.
//!
//! All paths, names and commands are resolved once at startup and handed to
//! each component through its own sub-struct. Components never read the
//! process environment themselves.

use std::path::PathBuf;
use std::time::Duration;

/// Default file loaded with dotenvy before reading `LAUNCHER_*` variables.
pub const DEFAULT_CONFIG_FILE: &str = "launcher.env";

/// A program plus its arguments, parsed from a whitespace separated string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Executable name or path.
    pub program: String,
    /// Arguments passed verbatim.
    pub args: Vec<String>,
}

impl CommandLine {
    /// Build a command line from a program and arguments.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split `raw` on whitespace. Returns `None` for a blank string.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Registration token settings.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// File holding the hex-encoded token.
    pub path: PathBuf,
    /// Number of random bytes; the file holds twice as many hex characters.
    pub byte_len: usize,
}

/// Source checkout and image build settings.
#[derive(Debug, Clone)]
pub struct ImageConfig {
    /// Checkout of the homeserver source.
    pub repo_dir: PathBuf,
    /// Stable local tag the container is created from.
    pub tag: String,
    /// Command that fast-forwards the checkout.
    pub pull_command: CommandLine,
    /// Command that produces the image archive.
    pub build_command: CommandLine,
    /// Output symlink written by the build, relative to `repo_dir`.
    pub artifact_link: PathBuf,
}

/// Managed container settings.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Name of the single managed container.
    pub name: String,
    /// Key=value file the container environment is drawn from.
    pub env_file: PathBuf,
    /// Only keys starting with one of these prefixes are forwarded.
    pub env_prefixes: Vec<String>,
    /// Named volume for the homeserver database.
    pub data_volume: String,
    /// Mount point of the data volume inside the container.
    pub data_mount: String,
    /// In-container path of the read-only token mount.
    pub token_mount: String,
    /// Host directory for backups.
    pub backup_dir: PathBuf,
    /// Mount point of the backup directory inside the container.
    pub backup_mount: String,
    /// Network mode passed to the runtime.
    pub network: String,
    /// Restart policy passed to the runtime.
    pub restart_policy: String,
    /// Overrides appended after the allowlisted environment pairs.
    pub diagnostic_env: Vec<(String, String)>,
}

/// Registration companion process settings.
#[derive(Debug, Clone)]
pub struct CompanionConfig {
    /// Working directory the companion is started in.
    pub work_dir: PathBuf,
    /// The companion's own YAML config, which declares its `port`.
    pub config_file: PathBuf,
    /// Command that starts the companion.
    pub command: CommandLine,
    /// PID file written after a successful start.
    pub pid_file: PathBuf,
    /// File the companion's stdout and stderr are appended to.
    pub log_file: PathBuf,
    /// How long to wait before checking that the companion survived startup.
    pub startup_wait: Duration,
}

/// Launcher log settings.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Append-only log file.
    pub file: PathBuf,
}

/// Launcher configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Container runtime CLI (`docker` or a compatible binary).
    pub runtime_bin: String,
    /// Registration token settings.
    pub token: TokenConfig,
    /// Image build settings.
    pub image: ImageConfig,
    /// Managed container settings.
    pub container: ContainerConfig,
    /// Companion process settings.
    pub companion: CompanionConfig,
    /// Log settings.
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `launcher.env` (or the file named by `LAUNCHER_CONFIG`) is loaded first
    /// if present; variables already set in the environment win.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config_file =
            std::env::var("LAUNCHER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        if let Err(e) = dotenvy::from_filename(&config_file) {
            tracing::debug!(file = %config_file, error = %e, "No launcher config file loaded");
        }
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let path_or = |var: &str, default: PathBuf| get(var).map(PathBuf::from).unwrap_or(default);

        let base_dir = path_or("LAUNCHER_BASE_DIR", PathBuf::from("."));
        let companion_dir = path_or("LAUNCHER_COMPANION_DIR", base_dir.join("sw1tch"));

        let byte_len: usize = parse_number(&get, "LAUNCHER_TOKEN_BYTES", 3)?;
        if byte_len == 0 {
            return Err(ConfigError::ZeroTokenLength);
        }
        let token = TokenConfig {
            path: path_or("LAUNCHER_TOKEN_FILE", base_dir.join(".registration_token")),
            byte_len,
        };

        let image = ImageConfig {
            repo_dir: path_or("LAUNCHER_REPO_DIR", base_dir.join("tuwunel")),
            tag: get("LAUNCHER_IMAGE_TAG").unwrap_or_else(|| "tuwunel:latest".to_string()),
            pull_command: parse_command(&get, "LAUNCHER_PULL_COMMAND", "git pull --ff-only")?,
            build_command: parse_command(&get, "LAUNCHER_BUILD_COMMAND", "nix build .#oci-image")?,
            artifact_link: path_or("LAUNCHER_ARTIFACT_LINK", PathBuf::from("result")),
        };

        let env_prefixes: Vec<String> = get("LAUNCHER_ENV_PREFIX")
            .unwrap_or_else(|| "CONDUWUIT_".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let container = ContainerConfig {
            name: get("LAUNCHER_CONTAINER_NAME").unwrap_or_else(|| "tuwunel".to_string()),
            env_file: path_or("LAUNCHER_ENV_FILE", base_dir.join(".env")),
            env_prefixes,
            data_volume: get("LAUNCHER_DATA_VOLUME").unwrap_or_else(|| "tuwunel-db".to_string()),
            data_mount: get("LAUNCHER_DATA_MOUNT")
                .unwrap_or_else(|| "/var/lib/conduwuit".to_string()),
            token_mount: get("LAUNCHER_TOKEN_MOUNT")
                .unwrap_or_else(|| "/.registration_token".to_string()),
            backup_dir: path_or("LAUNCHER_BACKUP_DIR", base_dir.join("backup")),
            backup_mount: get("LAUNCHER_BACKUP_MOUNT").unwrap_or_else(|| "/backup".to_string()),
            network: get("LAUNCHER_NETWORK").unwrap_or_else(|| "host".to_string()),
            restart_policy: get("LAUNCHER_RESTART_POLICY")
                .unwrap_or_else(|| "unless-stopped".to_string()),
            diagnostic_env: default_diagnostic_env(),
        };

        let companion = CompanionConfig {
            config_file: path_or(
                "LAUNCHER_COMPANION_CONFIG",
                companion_dir.join("config").join("config.yaml"),
            ),
            command: parse_command(&get, "LAUNCHER_COMPANION_COMMAND", "python3 -m sw1tch")?,
            pid_file: path_or("LAUNCHER_PID_FILE", base_dir.join("data").join("sw1tch.pid")),
            log_file: path_or("LAUNCHER_COMPANION_LOG", base_dir.join("logs").join("sw1tch.log")),
            startup_wait: Duration::from_millis(parse_number(
                &get,
                "LAUNCHER_STARTUP_WAIT_MS",
                3000,
            )?),
            work_dir: companion_dir,
        };

        let log = LogConfig {
            file: path_or("LAUNCHER_LOG_FILE", base_dir.join("logs").join("launcher.log")),
        };

        Ok(Self {
            runtime_bin: get("LAUNCHER_RUNTIME").unwrap_or_else(|| "docker".to_string()),
            token,
            image,
            container,
            companion,
            log,
        })
    }
}

fn default_diagnostic_env() -> Vec<(String, String)> {
    vec![
        ("CONDUWUIT_LOG".to_string(), "info".to_string()),
        ("CONDUWUIT_LOG_COLORS".to_string(), "false".to_string()),
        ("RUST_BACKTRACE".to_string(), "1".to_string()),
    ]
}

fn parse_number<F, T>(get: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { var, value: raw }),
        None => Ok(default),
    }
}

fn parse_command<F>(get: &F, var: &'static str, default: &str) -> Result<CommandLine, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = get(var).unwrap_or_else(|| default.to_string());
    CommandLine::parse(&raw).ok_or(ConfigError::EmptyCommand(var))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A numeric variable did not parse.
    #[error("Invalid number in {var}: {value:?}")]
    InvalidNumber {
        /// Variable name.
        var: &'static str,
        /// Raw value found.
        value: String,
    },
    /// A command variable was empty.
    #[error("Empty command in {0}")]
    EmptyCommand(&'static str),
    /// `LAUNCHER_TOKEN_BYTES` was zero, which would yield an empty token.
    #[error("LAUNCHER_TOKEN_BYTES must be at least 1")]
    ZeroTokenLength,
}
