// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Managed container recreation.
//!
//! There is no in-place update path: every call stops and removes whatever
//! holds the managed name, then creates a fresh container from the current
//! env file, credential and image tag.

use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ContainerConfig;
use crate::env_file::EnvConfig;
use crate::error::{Error, Result};
use crate::image::ImageRef;
use crate::runtime::{ContainerRuntime, Mount, RunSpec, RuntimeError, Teardown};
use crate::token::Credential;

/// Environment variable carrying the one-time administrative password.
pub const EMERGENCY_PASSWORD_VAR: &str = "CONDUWUIT_EMERGENCY_PASSWORD";

/// Environment variable holding the homeserver's public name.
pub const SERVER_NAME_VAR: &str = "CONDUWUIT_SERVER_NAME";

/// Local part of the homeserver's built-in administrative account.
const EMERGENCY_LOCALPART: &str = "conduit";

/// Length of the generated emergency password.
const EMERGENCY_PASSWORD_LEN: usize = 32;

/// Whether to inject a one-time administrative password.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmergencyAccess {
    /// Normal start.
    #[default]
    Disabled,
    /// Generate a password and inject it.
    Enabled,
}

/// Login for the administrative account, valid for this container only.
#[derive(Clone)]
pub struct EmergencyLogin {
    /// Fully qualified user id.
    pub user_id: String,
    /// Generated password.
    pub password: String,
}

impl std::fmt::Debug for EmergencyLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmergencyLogin")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

/// What a recreation did.
#[derive(Debug, Clone)]
pub struct RecreateOutcome {
    /// Whether a previous container was removed.
    pub teardown: Teardown,
    /// Spec the new container was created with.
    pub spec: RunSpec,
    /// Emergency login, when requested.
    pub emergency: Option<EmergencyLogin>,
}

/// Brings the managed container to a single running instance.
pub struct ContainerSupervisor {
    config: ContainerConfig,
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerSupervisor {
    /// Create a container supervisor.
    pub fn new(config: ContainerConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { config, runtime }
    }

    /// Managed container name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Destroy and recreate the managed container.
    ///
    /// Safe to call repeatedly; each call fully supersedes the previous
    /// container.
    pub async fn recreate(
        &self,
        image: &ImageRef,
        credential: &Credential,
        emergency: EmergencyAccess,
    ) -> Result<RecreateOutcome> {
        let teardown = self.teardown().await?;

        let env = EnvConfig::load(&self.config.env_file)?;
        let (spec, login) = self.build_spec(image, credential, &env, emergency)?;

        if let Some(login) = &login {
            // The password cannot be recovered once the container is up.
            warn!(
                user_id = %login.user_id,
                password = %login.password,
                "Emergency access enabled for this container"
            );
        }

        self.runtime.run(&spec).await.map_err(|e| match e {
            RuntimeError::NameConflict(name) => {
                Error::ContainerStart(format!("container name {} still in use", name))
            }
            other => Error::ContainerStart(other.to_string()),
        })?;

        if !self.runtime.is_running(&spec.name).await {
            return Err(Error::ContainerStart(format!(
                "container {} exited right after start",
                spec.name
            )));
        }

        info!(
            container = %spec.name,
            image = %spec.image,
            env_vars = spec.env.len(),
            runtime = self.runtime.runtime_type(),
            "Container created and running"
        );

        Ok(RecreateOutcome {
            teardown,
            spec,
            emergency: login,
        })
    }

    /// Stop then remove the managed container. Absence is not an error.
    async fn teardown(&self) -> Result<Teardown> {
        let name = &self.config.name;
        let stopped = self.runtime.stop(name).await?;
        let removed = self.runtime.remove(name).await?;

        match (stopped, removed) {
            (_, Teardown::Removed) | (Teardown::Removed, _) => {
                info!(container = %name, "Stopped and removed existing container");
                Ok(Teardown::Removed)
            }
            (Teardown::Absent, Teardown::Absent) => {
                debug!(container = %name, "No existing container to remove");
                Ok(Teardown::Absent)
            }
        }
    }

    fn build_spec(
        &self,
        image: &ImageRef,
        credential: &Credential,
        env: &EnvConfig,
        emergency: EmergencyAccess,
    ) -> Result<(RunSpec, Option<EmergencyLogin>)> {
        let token_source = std::path::absolute(credential.path())?;
        std::fs::create_dir_all(&self.config.backup_dir)?;
        let backup_source = std::path::absolute(&self.config.backup_dir)?;

        let mounts = vec![
            Mount {
                source: self.config.data_volume.clone(),
                target: self.config.data_mount.clone(),
                read_only: false,
            },
            Mount {
                source: token_source.display().to_string(),
                target: self.config.token_mount.clone(),
                read_only: true,
            },
            Mount {
                source: backup_source.display().to_string(),
                target: self.config.backup_mount.clone(),
                read_only: false,
            },
        ];

        let mut pairs = env.filtered(&self.config.env_prefixes);
        debug!(
            forwarded = pairs.len(),
            ignored = env.len() - pairs.len(),
            "Filtered homeserver environment"
        );
        pairs.extend(self.config.diagnostic_env.iter().cloned());

        let login = match emergency {
            EmergencyAccess::Disabled => None,
            EmergencyAccess::Enabled => {
                let server_name = env.get(SERVER_NAME_VAR).unwrap_or("localhost");
                let login = EmergencyLogin {
                    user_id: format!("@{}:{}", EMERGENCY_LOCALPART, server_name),
                    password: generate_emergency_password(),
                };
                pairs.push((EMERGENCY_PASSWORD_VAR.to_string(), login.password.clone()));
                Some(login)
            }
        };

        let spec = RunSpec {
            name: self.config.name.clone(),
            image: image.as_str().to_string(),
            mounts,
            network: self.config.network.clone(),
            restart: self.config.restart_policy.clone(),
            env: pairs,
        };
        Ok((spec, login))
    }
}

/// High-entropy password for the administrative account.
///
/// Independent from the registration token: this one protects an account.
fn generate_emergency_password() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(EMERGENCY_PASSWORD_LEN)
        .map(char::from)
        .collect()
}
