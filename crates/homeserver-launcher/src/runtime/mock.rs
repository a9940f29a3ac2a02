// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock runtime for testing.
//!
//! Simulates a container runtime in memory: containers are kept in a map
//! keyed by name, so name uniqueness behaves as it does on a real daemon.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::traits::*;

/// A call recorded by [`MockRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    /// `stop(name)`
    Stop(String),
    /// `remove(name)`
    Remove(String),
    /// `run(spec)`
    Run(String),
    /// `load_image(archive)`
    Load(PathBuf),
    /// `tag_image(source, target)`
    Tag(String, String),
}

/// Mock container state.
#[derive(Debug, Clone)]
struct MockContainer {
    spec: RunSpec,
    running: bool,
}

#[derive(Debug, Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    tags: HashMap<String, String>,
    calls: Vec<RuntimeCall>,
}

/// Mock runtime for testing.
pub struct MockRuntime {
    state: Arc<Mutex<MockState>>,
    /// If true, `run` fails as if the daemon rejected the `RunSpec`.
    pub fail_run: bool,
    /// If true, `load_image` fails.
    pub fail_load: bool,
    /// If true, containers are created but report as not running.
    pub exit_immediately: bool,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    /// Create an empty mock runtime.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            fail_run: false,
            fail_load: false,
            exit_immediately: false,
        }
    }

    /// Create a mock runtime whose `run` always fails.
    pub fn failing_run() -> Self {
        Self {
            fail_run: true,
            ..Self::new()
        }
    }

    /// Create a mock runtime whose `load_image` always fails.
    pub fn failing_load() -> Self {
        Self {
            fail_load: true,
            ..Self::new()
        }
    }

    /// Create a mock runtime whose containers exit right after creation.
    pub fn exiting() -> Self {
        Self {
            exit_immediately: true,
            ..Self::new()
        }
    }

    /// Seed a running container, as if left over from a previous invocation.
    pub async fn seed_container(&self, spec: RunSpec) {
        let mut state = self.state.lock().await;
        state.containers.insert(
            spec.name.clone(),
            MockContainer {
                spec,
                running: true,
            },
        );
    }

    /// Spec of the container currently holding `name`.
    pub async fn container(&self, name: &str) -> Option<RunSpec> {
        let state = self.state.lock().await;
        state.containers.get(name).map(|c| c.spec.clone())
    }

    /// Number of containers that exist (running or not).
    pub async fn container_count(&self) -> usize {
        self.state.lock().await.containers.len()
    }

    /// Image a tag currently points at.
    pub async fn tag_target(&self, tag: &str) -> Option<String> {
        self.state.lock().await.tags.get(tag).cloned()
    }

    /// All calls made so far, in order.
    pub async fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().await.calls.clone()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn runtime_type(&self) -> &'static str {
        "mock"
    }

    async fn stop(&self, name: &str) -> Result<Teardown> {
        let mut state = self.state.lock().await;
        state.calls.push(RuntimeCall::Stop(name.to_string()));
        match state.containers.get_mut(name) {
            Some(container) => {
                container.running = false;
                Ok(Teardown::Removed)
            }
            None => Ok(Teardown::Absent),
        }
    }

    async fn remove(&self, name: &str) -> Result<Teardown> {
        let mut state = self.state.lock().await;
        state.calls.push(RuntimeCall::Remove(name.to_string()));
        match state.containers.remove(name) {
            Some(_) => Ok(Teardown::Removed),
            None => Ok(Teardown::Absent),
        }
    }

    async fn run(&self, spec: &RunSpec) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(RuntimeCall::Run(spec.name.clone()));

        if self.fail_run {
            return Err(RuntimeError::CommandFailed {
                command: "mock run".to_string(),
                exit_code: Some(125),
                stderr: "Mock failure".to_string(),
            });
        }
        if state.containers.contains_key(&spec.name) {
            return Err(RuntimeError::NameConflict(spec.name.clone()));
        }

        state.containers.insert(
            spec.name.clone(),
            MockContainer {
                spec: spec.clone(),
                running: !self.exit_immediately,
            },
        );
        Ok(())
    }

    async fn is_running(&self, name: &str) -> bool {
        let state = self.state.lock().await;
        state.containers.get(name).is_some_and(|c| c.running)
    }

    async fn load_image(&self, archive: &Path) -> Result<String> {
        let mut state = self.state.lock().await;
        state.calls.push(RuntimeCall::Load(archive.to_path_buf()));

        if self.fail_load {
            return Err(RuntimeError::CommandFailed {
                command: "mock load".to_string(),
                exit_code: Some(1),
                stderr: "Mock failure".to_string(),
            });
        }
        let stem = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string());
        Ok(format!("mock/{}:loaded", stem))
    }

    async fn tag_image(&self, source: &str, target: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(RuntimeCall::Tag(source.to_string(), target.to_string()));
        state.tags.insert(target.to_string(), source.to_string());
        Ok(())
    }
}
