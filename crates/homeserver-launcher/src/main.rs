// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Homeserver Launcher
//!
//! Rebuilds, rotates and restarts a containerised homeserver and its
//! registration companion. Meant to be run by a scheduler or by hand.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use homeserver_launcher::cli::Cli;
use homeserver_launcher::process::ProcFsProbe;
use homeserver_launcher::runtime::{ContainerRuntime, DockerRuntime};
use homeserver_launcher::{Config, Orchestrator, logging};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    // Exits with status 2 on unknown flags, before anything else happens.
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => return Ok(fail_before_logging(&e)),
    };
    if let Err(e) = logging::init(&config.log) {
        return Ok(fail_before_logging(&e));
    }

    let runtime = Arc::new(DockerRuntime::new(&config.runtime_bin));
    info!(
        runtime = runtime.runtime_type(),
        bin = %config.runtime_bin,
        container = %config.container.name,
        "Homeserver launcher starting"
    );

    let orchestrator = Orchestrator::new(config, runtime, Arc::new(ProcFsProbe::new()));
    match orchestrator.run(cli.directives()).await {
        Ok(report) => {
            info!(
                rebuilt = report.artifact.is_some(),
                rotated = report.rotated,
                companion = ?report.companion,
                "Homeserver launcher finished"
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(error = %e, "Homeserver launcher failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Report a failure that happened before the log file could be opened.
fn fail_before_logging(error: &dyn std::fmt::Display) -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .try_init();
    error!(error = %error, "Homeserver launcher failed");
    ExitCode::FAILURE
}
