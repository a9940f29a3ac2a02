// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Invocation pipeline.
//!
//! One invocation runs four stages in a fixed order:
//!
//! ```text
//! image (rebuild?)     ──► ImageRef   ──┐
//!                                        ├──► container ──► ContainerReady ──► companion
//! credential (rotate?) ──► Credential ──┘
//! ```
//!
//! The ordering is carried by the types: the container stage needs the
//! [`ImageRef`] and [`Credential`] the earlier stages produce, and the
//! companion stage needs a [`ContainerReady`], which only the container
//! stage can create. Any fatal error ends the invocation at the stage that
//! raised it.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::container::{ContainerSupervisor, EmergencyAccess, RecreateOutcome};
use crate::error::Result;
use crate::image::{ArtifactRef, ImageBuilder, ImageRef};
use crate::process::{EnsureOutcome, PortProbe, ProcessSupervisor};
use crate::runtime::ContainerRuntime;
use crate::token::{Credential, TokenManager};

/// Independent switches for one invocation. All off is a valid invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Directives {
    /// Pull, build and re-tag the image before recreating the container.
    pub rebuild: bool,
    /// Replace the registration token before recreating the container.
    pub rotate_token: bool,
    /// Inject a one-time administrative password into the new container.
    pub emergency_access: bool,
    /// Replace the companion even if it is already serving.
    pub force_companion: bool,
}

/// Proof that the managed container was recreated in this invocation.
#[derive(Debug)]
pub struct ContainerReady {
    outcome: RecreateOutcome,
}

impl ContainerReady {
    /// Details of the recreation.
    pub fn outcome(&self) -> &RecreateOutcome {
        &self.outcome
    }
}

/// Everything one invocation did.
#[derive(Debug)]
pub struct InvocationReport {
    /// Build result, when a rebuild was requested.
    pub artifact: Option<ArtifactRef>,
    /// Whether the token was rotated.
    pub rotated: bool,
    /// Container recreation details.
    pub container: RecreateOutcome,
    /// Companion state after the ensure step.
    pub companion: EnsureOutcome,
}

/// Runs the invocation pipeline.
pub struct Orchestrator {
    images: ImageBuilder,
    tokens: TokenManager,
    containers: ContainerSupervisor,
    companion: ProcessSupervisor,
}

impl Orchestrator {
    /// Wire all components from one configuration.
    pub fn new(
        config: Config,
        runtime: Arc<dyn ContainerRuntime>,
        probe: Arc<dyn PortProbe>,
    ) -> Self {
        Self {
            images: ImageBuilder::new(config.image, runtime.clone()),
            tokens: TokenManager::new(config.token),
            containers: ContainerSupervisor::new(config.container, runtime),
            companion: ProcessSupervisor::new(config.companion, probe),
        }
    }

    /// Run all stages in order.
    pub async fn run(&self, directives: Directives) -> Result<InvocationReport> {
        info!(?directives, "Starting invocation");

        let (image, artifact) = self.image_stage(directives.rebuild).await?;
        let (credential, rotated) = self.credential_stage(directives.rotate_token)?;
        let emergency = if directives.emergency_access {
            EmergencyAccess::Enabled
        } else {
            EmergencyAccess::Disabled
        };
        let ready = self.container_stage(&image, &credential, emergency).await?;
        let companion = self
            .companion_stage(&ready, directives.force_companion)
            .await?;

        info!("Invocation complete");
        Ok(InvocationReport {
            artifact,
            rotated,
            container: ready.outcome,
            companion,
        })
    }

    async fn image_stage(&self, rebuild: bool) -> Result<(ImageRef, Option<ArtifactRef>)> {
        if !rebuild {
            return Ok((self.images.tag(), None));
        }
        info!("Stage: image rebuild");
        let artifact = self.images.build_and_tag().await?;
        Ok((artifact.tag.clone(), Some(artifact)))
    }

    fn credential_stage(&self, rotate: bool) -> Result<(Credential, bool)> {
        if rotate {
            info!("Stage: token rotation");
            return Ok((self.tokens.rotate()?, true));
        }
        Ok((self.tokens.ensure()?, false))
    }

    async fn container_stage(
        &self,
        image: &ImageRef,
        credential: &Credential,
        emergency: EmergencyAccess,
    ) -> Result<ContainerReady> {
        info!(container = %self.containers.name(), image = %image, "Stage: container recreation");
        let outcome = self.containers.recreate(image, credential, emergency).await?;
        Ok(ContainerReady { outcome })
    }

    async fn companion_stage(&self, ready: &ContainerReady, forced: bool) -> Result<EnsureOutcome> {
        info!(
            container = %ready.outcome.spec.name,
            forced,
            "Stage: companion ensure"
        );
        let outcome = self.companion.ensure_running(forced).await?;
        if let EnsureOutcome::StartupFailed { reason, .. } = &outcome {
            warn!(reason = %reason, "Continuing without a running companion");
        }
        Ok(outcome)
    }
}
