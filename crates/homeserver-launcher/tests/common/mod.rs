// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for homeserver-launcher tests.
//!
//! Provides a Fixture with a throwaway deployment directory: homeserver env
//! file, companion config, and a fake source checkout whose build "output"
//! is already in place.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use homeserver_launcher::Config;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tempfile::TempDir;

/// A throwaway deployment layout.
pub struct Fixture {
    pub config: Config,
    pub port: u16,
    _temp_dir: TempDir,
}

impl Fixture {
    /// Create a fixture whose companion listens on `port`.
    pub fn new(port: u16) -> Self {
        Self::with_overrides(port, &[])
    }

    /// Create a fixture with extra `LAUNCHER_*` overrides.
    pub fn with_overrides(port: u16, overrides: &[(&str, &str)]) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        std::fs::write(
            base.join(".env"),
            "# homeserver\nCONDUWUIT_SERVER_NAME=example.org\nCONDUWUIT_ALLOW_REGISTRATION=true\nDATABASE_PASSWORD=hunter2\n",
        )
        .unwrap();

        let companion_dir = base.join("sw1tch");
        std::fs::create_dir_all(companion_dir.join("config")).unwrap();
        std::fs::write(
            companion_dir.join("config").join("config.yaml"),
            format!("port: {}\nbase_url: https://example.org\n", port),
        )
        .unwrap();

        let repo = base.join("tuwunel");
        std::fs::create_dir_all(&repo).unwrap();
        let archive = repo.join("image.tar.gz");
        std::fs::write(&archive, b"archive").unwrap();
        std::os::unix::fs::symlink(&archive, repo.join("result")).unwrap();

        let mut vars: HashMap<String, String> = HashMap::new();
        vars.insert("LAUNCHER_BASE_DIR".into(), base.display().to_string());
        vars.insert("LAUNCHER_PULL_COMMAND".into(), "true".into());
        vars.insert("LAUNCHER_BUILD_COMMAND".into(), "true".into());
        vars.insert("LAUNCHER_COMPANION_COMMAND".into(), "sleep 30".into());
        vars.insert("LAUNCHER_STARTUP_WAIT_MS".into(), "200".into());
        for (key, value) in overrides {
            vars.insert(key.to_string(), value.to_string());
        }

        let config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();
        Self {
            config,
            port,
            _temp_dir: temp_dir,
        }
    }

    pub fn base(&self) -> &Path {
        self._temp_dir.path()
    }

    pub fn env_file(&self) -> PathBuf {
        self.config.container.env_file.clone()
    }

    pub fn token_file(&self) -> PathBuf {
        self.config.token.path.clone()
    }

    pub fn pid_file(&self) -> PathBuf {
        self.config.companion.pid_file.clone()
    }
}

/// SIGKILL a process started during a test. Already gone is fine.
pub fn kill(pid: u32) {
    let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}
