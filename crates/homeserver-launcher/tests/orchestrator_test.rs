// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end invocation tests against the mock runtime and mock probe.

mod common;

use std::sync::Arc;

use common::{Fixture, kill};
use homeserver_launcher::container::EMERGENCY_PASSWORD_VAR;
use homeserver_launcher::process::{EnsureOutcome, MockProbe};
use homeserver_launcher::runtime::{
    ContainerRuntime, MockRuntime, Mount, RunSpec, RuntimeCall, Teardown,
};
use homeserver_launcher::{Directives, Error, Orchestrator};

fn previous_container() -> RunSpec {
    RunSpec {
        name: "tuwunel".to_string(),
        image: "tuwunel:previous".to_string(),
        mounts: vec![Mount {
            source: "tuwunel-db".to_string(),
            target: "/var/lib/conduwuit".to_string(),
            read_only: false,
        }],
        network: "host".to_string(),
        restart: "unless-stopped".to_string(),
        env: vec![],
    }
}

fn orchestrator(fixture: &Fixture, runtime: &Arc<MockRuntime>, probe: &Arc<MockProbe>) -> Orchestrator {
    Orchestrator::new(fixture.config.clone(), runtime.clone(), probe.clone())
}

#[tokio::test]
async fn test_no_flags_recreates_container_and_finds_companion_running() {
    let fixture = Fixture::new(5100);
    let runtime = Arc::new(MockRuntime::new());
    runtime.seed_container(previous_container()).await;
    let probe = Arc::new(MockProbe::new());
    probe.bind(fixture.port, vec![]);

    let report = orchestrator(&fixture, &runtime, &probe)
        .run(Directives::default())
        .await
        .unwrap();

    assert!(report.artifact.is_none());
    assert!(!report.rotated);
    assert_eq!(report.container.teardown, Teardown::Removed);
    assert!(matches!(report.companion, EnsureOutcome::AlreadyRunning { port: 5100, .. }));

    assert_eq!(runtime.container_count().await, 1);
    let spec = runtime.container("tuwunel").await.unwrap();
    assert_eq!(spec.image, "tuwunel:latest");
    assert_eq!(spec.env_value("CONDUWUIT_SERVER_NAME"), Some("example.org"));
    assert_eq!(spec.env_value("DATABASE_PASSWORD"), None);
    assert_eq!(spec.env_value(EMERGENCY_PASSWORD_VAR), None);

    // A token is bootstrapped when none exists yet.
    let token = std::fs::read_to_string(fixture.token_file()).unwrap();
    assert_eq!(token.len(), 6);
    assert!(!fixture.pid_file().exists());
}

#[tokio::test]
async fn test_failed_pull_aborts_before_teardown() {
    let fixture = Fixture::with_overrides(5101, &[("LAUNCHER_PULL_COMMAND", "false")]);
    let runtime = Arc::new(MockRuntime::new());
    runtime.seed_container(previous_container()).await;
    let probe = Arc::new(MockProbe::new());

    let err = orchestrator(&fixture, &runtime, &probe)
        .run(Directives {
            rebuild: true,
            rotate_token: true,
            ..Directives::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SourceSync(_)));
    assert!(err.is_fatal());
    assert!(runtime.calls().await.is_empty());
    assert_eq!(
        runtime.container("tuwunel").await.unwrap().image,
        "tuwunel:previous"
    );
    assert!(!fixture.token_file().exists());
}

#[tokio::test]
async fn test_rebuild_loads_and_tags_before_recreating() {
    let fixture = Fixture::new(5102);
    let runtime = Arc::new(MockRuntime::new());
    let probe = Arc::new(MockProbe::new());
    probe.bind(fixture.port, vec![]);

    let report = orchestrator(&fixture, &runtime, &probe)
        .run(Directives {
            rebuild: true,
            ..Directives::default()
        })
        .await
        .unwrap();

    let artifact = report.artifact.unwrap();
    let calls = runtime.calls().await;
    assert!(matches!(calls[0], RuntimeCall::Load(_)));
    assert_eq!(
        calls[1],
        RuntimeCall::Tag(artifact.loaded_ref.clone(), "tuwunel:latest".to_string())
    );
    assert_eq!(calls.last(), Some(&RuntimeCall::Run("tuwunel".to_string())));
    assert_eq!(report.container.teardown, Teardown::Absent);
}

#[tokio::test]
async fn test_rotation_is_mounted_into_new_container() {
    let fixture = Fixture::with_overrides(5103, &[("LAUNCHER_TOKEN_BYTES", "16")]);
    let runtime = Arc::new(MockRuntime::new());
    let probe = Arc::new(MockProbe::new());
    probe.bind(fixture.port, vec![]);
    let orchestrator = orchestrator(&fixture, &runtime, &probe);

    let first = orchestrator
        .run(Directives {
            rotate_token: true,
            ..Directives::default()
        })
        .await
        .unwrap();
    let first_token = std::fs::read_to_string(fixture.token_file()).unwrap();
    assert!(first.rotated);
    assert_eq!(first_token.len(), 32);

    let second = orchestrator
        .run(Directives {
            rotate_token: true,
            ..Directives::default()
        })
        .await
        .unwrap();
    let second_token = std::fs::read_to_string(fixture.token_file()).unwrap();
    assert!(second.rotated);
    assert_ne!(first_token, second_token);

    let token_mount = second
        .container
        .spec
        .mounts
        .iter()
        .find(|m| m.target == "/.registration_token")
        .unwrap();
    assert!(token_mount.read_only);
    assert_eq!(
        std::fs::read_to_string(&token_mount.source).unwrap(),
        second_token
    );

    // Without the flag the token is left alone.
    orchestrator.run(Directives::default()).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(fixture.token_file()).unwrap(),
        second_token
    );
}

#[tokio::test]
async fn test_second_recreation_reflects_second_env_file() {
    let fixture = Fixture::new(5104);
    let runtime = Arc::new(MockRuntime::new());
    let probe = Arc::new(MockProbe::new());
    probe.bind(fixture.port, vec![]);
    let orchestrator = orchestrator(&fixture, &runtime, &probe);

    orchestrator.run(Directives::default()).await.unwrap();
    std::fs::write(
        fixture.env_file(),
        "CONDUWUIT_SERVER_NAME=  second.example.org  \n",
    )
    .unwrap();
    let report = orchestrator.run(Directives::default()).await.unwrap();

    assert_eq!(report.container.teardown, Teardown::Removed);
    assert_eq!(runtime.container_count().await, 1);
    let spec = runtime.container("tuwunel").await.unwrap();
    assert_eq!(
        spec.env_value("CONDUWUIT_SERVER_NAME"),
        Some("second.example.org")
    );
    assert_eq!(spec.env_value("CONDUWUIT_ALLOW_REGISTRATION"), None);
}

#[tokio::test]
async fn test_missing_env_file_is_fatal_after_teardown() {
    let fixture = Fixture::new(5105);
    std::fs::remove_file(fixture.env_file()).unwrap();
    let runtime = Arc::new(MockRuntime::new());
    runtime.seed_container(previous_container()).await;
    let probe = Arc::new(MockProbe::new());

    let err = orchestrator(&fixture, &runtime, &probe)
        .run(Directives::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ConfigMissing(_)));
    assert_eq!(
        runtime.calls().await,
        vec![
            RuntimeCall::Stop("tuwunel".to_string()),
            RuntimeCall::Remove("tuwunel".to_string()),
        ]
    );
    assert!(!fixture.pid_file().exists());
}

#[tokio::test]
async fn test_emergency_access_reaches_container_env() {
    let fixture = Fixture::new(5106);
    let runtime = Arc::new(MockRuntime::new());
    let probe = Arc::new(MockProbe::new());
    probe.bind(fixture.port, vec![]);

    let report = orchestrator(&fixture, &runtime, &probe)
        .run(Directives {
            emergency_access: true,
            ..Directives::default()
        })
        .await
        .unwrap();

    let login = report.container.emergency.unwrap();
    assert_eq!(login.user_id, "@conduit:example.org");
    let spec = runtime.container("tuwunel").await.unwrap();
    assert_eq!(
        spec.env_value(EMERGENCY_PASSWORD_VAR),
        Some(login.password.as_str())
    );
}

#[tokio::test]
async fn test_free_port_starts_companion_after_container() {
    let fixture = Fixture::new(5107);
    let runtime = Arc::new(MockRuntime::new());
    let probe = Arc::new(MockProbe::new());

    let report = orchestrator(&fixture, &runtime, &probe)
        .run(Directives::default())
        .await
        .unwrap();

    let EnsureOutcome::Started { pid, .. } = report.companion else {
        panic!("companion was not started");
    };
    let recorded = std::fs::read_to_string(fixture.pid_file()).unwrap();
    assert_eq!(recorded, pid.to_string());
    assert!(fixture.base().join("logs").join("sw1tch.log").exists());

    kill(pid);
}

#[tokio::test]
async fn test_companion_startup_failure_is_not_fatal() {
    let fixture = Fixture::with_overrides(5108, &[("LAUNCHER_COMPANION_COMMAND", "false")]);
    let runtime = Arc::new(MockRuntime::new());
    let probe = Arc::new(MockProbe::new());

    let report = orchestrator(&fixture, &runtime, &probe)
        .run(Directives::default())
        .await
        .unwrap();

    assert!(matches!(report.companion, EnsureOutcome::StartupFailed { .. }));
    assert!(runtime.is_running("tuwunel").await);
    assert!(!fixture.pid_file().exists());
}

#[tokio::test]
async fn test_missing_companion_config_is_fatal() {
    let fixture = Fixture::new(5109);
    std::fs::remove_file(&fixture.config.companion.config_file).unwrap();
    let runtime = Arc::new(MockRuntime::new());
    let probe = Arc::new(MockProbe::new());

    let err = orchestrator(&fixture, &runtime, &probe)
        .run(Directives::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ConfigMissing(_)));
    // The container stage had already completed.
    assert_eq!(runtime.container_count().await, 1);
}

#[tokio::test]
async fn test_container_start_failure_skips_companion() {
    let fixture = Fixture::new(5110);
    let runtime = Arc::new(MockRuntime::failing_run());
    let probe = Arc::new(MockProbe::new());

    let err = orchestrator(&fixture, &runtime, &probe)
        .run(Directives::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ContainerStart(_)));
    assert!(!fixture.pid_file().exists());
    assert!(!fixture.base().join("logs").join("sw1tch.log").exists());
}
