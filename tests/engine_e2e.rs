//! End-to-end tests for the execution engine.
//!
//! These tests drive real containers through Docker/Podman and are skipped
//! when no runtime is available or SKIP_CONTAINER_TESTS=1. Each test uses
//! its own engine with a unique container-name prefix so assertions about
//! leftover containers stay precise.

use codebox::container::ContainerManagerConfig;
use codebox::{
    ContainerConfig, EngineConfig, EngineError, ExecutionEngine, ExecutionOptions, MountSpec,
    PlacementStrategy, SessionConfig, WorkspaceSharing,
};
use serial_test::serial;
use std::collections::HashMap;
use std::time::Duration;
use test_tag::tag;

/// Check if container tests should run.
fn should_run_container_tests() -> bool {
    if let Ok(value) = std::env::var("SKIP_CONTAINER_TESTS") {
        if value == "1" || value.eq_ignore_ascii_case("true") {
            return false;
        }
    }

    std::process::Command::new("docker")
        .arg("info")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
        || std::process::Command::new("podman")
            .arg("info")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
}

/// Engine with a unique name prefix for leak-free assertions.
async fn test_engine(tag: &str) -> ExecutionEngine {
    let config = EngineConfig {
        manager: ContainerManagerConfig {
            name_prefix: format!("cbxtest-{}", tag),
            ..Default::default()
        },
    };
    ExecutionEngine::with_config(config)
        .await
        .expect("failed to connect to container runtime")
}

/// Count containers (running or not) whose names carry the prefix.
async fn containers_with_prefix(prefix: &str) -> usize {
    let docker = bollard::Docker::connect_with_local_defaults().unwrap();
    let mut filters = HashMap::new();
    filters.insert("name".to_string(), vec![format!("{}-", prefix)]);
    docker
        .list_containers(Some(bollard::container::ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        }))
        .await
        .unwrap()
        .len()
}

async fn inspect_exists(container_id: &str) -> bool {
    let docker = bollard::Docker::connect_with_local_defaults().unwrap();
    docker
        .inspect_container(
            container_id,
            None::<bollard::query_parameters::InspectContainerOptions>,
        )
        .await
        .is_ok()
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_shell_happy_path_leaves_no_container() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let engine = test_engine("shell").await;
    let session = engine
        .create_session(SessionConfig::new(PlacementStrategy::PerExecution))
        .unwrap();

    let result = engine
        .execute_code(
            &session,
            ExecutionOptions::new("shell").with_code("echo hello"),
        )
        .await
        .unwrap();

    assert_eq!(result.stdout, "hello\n");
    assert_eq!(result.stderr, "");
    assert_eq!(result.exit_code, 0);
    assert!(result.generated_files.is_empty());
    assert!(result.execution_time_ms > 0);

    // One-shot containers die with the call, and the session goes with them.
    assert_eq!(containers_with_prefix("cbxtest-shell").await, 0);
    assert!(engine.get_session_info(&session).is_err());
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_dependency_cache_hit_on_second_run() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let engine = test_engine("pydeps").await;
    let session = engine
        .create_session(SessionConfig::new(PlacementStrategy::PerSession))
        .unwrap();

    let options = || {
        ExecutionOptions::new("python")
            .with_code("import requests; print(requests.__name__)")
            .with_dependencies(["requests"])
    };

    let first = engine.execute_code(&session, options()).await.unwrap();
    assert_eq!(first.exit_code, 0, "stderr: {}", first.stderr);
    assert!(
        !first.dependency_stdout.is_empty(),
        "first run must actually install"
    );

    let second = engine.execute_code(&session, options()).await.unwrap();
    assert_eq!(second.exit_code, 0);
    assert_eq!(second.dependency_stdout, "", "cache hit skips the installer");
    assert!(
        second.execution_time_ms < first.execution_time_ms,
        "second run skips the install phase ({} ms vs {} ms)",
        second.execution_time_ms,
        first.execution_time_ms
    );

    engine.cleanup_session(&session, false).await.unwrap();
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_generated_file_detection() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let engine = test_engine("gen").await;
    let session = engine
        .create_session(SessionConfig::new(PlacementStrategy::PerSession))
        .unwrap();

    let result = engine
        .execute_code(
            &session,
            ExecutionOptions::new("python")
                .with_code("open('report.txt', 'w').write('done')"),
        )
        .await
        .unwrap();

    assert_eq!(result.exit_code, 0, "stderr: {}", result.stderr);
    let report = result.workspace_dir.join("report.txt");
    assert!(
        result.generated_files.contains(&report),
        "generated: {:?}",
        result.generated_files
    );
    assert_eq!(std::fs::read_to_string(&report).unwrap(), "done");

    // The snippet file itself was part of the baseline.
    assert!(!result
        .generated_files
        .contains(&result.workspace_dir.join("code.py")));

    engine.cleanup_session(&session, false).await.unwrap();
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_run_app_mode_with_directory_mount() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let project = tempfile::TempDir::new().unwrap();
    std::fs::write(
        project.path().join("server.js"),
        "console.log('app running');",
    )
    .unwrap();

    let engine = test_engine("app").await;
    let mut config = SessionConfig::new(PlacementStrategy::PerSession);
    config.container = ContainerConfig {
        mounts: vec![MountSpec::Directory {
            source: project.path().to_path_buf(),
            target: "/project".to_string(),
        }],
        ..Default::default()
    };
    let session = engine.create_session(config).unwrap();

    let result = engine
        .execute_code(
            &session,
            ExecutionOptions::new("javascript").with_run_app("server.js", "/project"),
        )
        .await
        .unwrap();

    assert_eq!(result.exit_code, 0, "stderr: {}", result.stderr);
    assert_eq!(result.stdout, "app running\n");

    engine.cleanup_session(&session, false).await.unwrap();
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_run_app_cwd_must_match_a_mount() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let engine = test_engine("appbad").await;
    let session = engine
        .create_session(SessionConfig::new(PlacementStrategy::PerSession))
        .unwrap();

    let err = engine
        .execute_code(
            &session,
            ExecutionOptions::new("javascript").with_run_app("server.js", "/project"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::InvalidConfiguration(_)));
    // Config errors surface before any container is provisioned.
    assert_eq!(containers_with_prefix("cbxtest-appbad").await, 0);
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_shell_dependency_installs_os_package() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let engine = test_engine("apk").await;
    let session = engine
        .create_session(SessionConfig::new(PlacementStrategy::PerSession))
        .unwrap();

    let result = engine
        .execute_code(
            &session,
            ExecutionOptions::new("shell")
                .with_code("echo '{\"a\":1}' | jq .a")
                .with_dependencies(["jq"]),
        )
        .await
        .unwrap();

    assert_eq!(result.exit_code, 0, "stderr: {}", result.stderr);
    assert_eq!(result.stdout, "1\n");
    assert!(
        result.dependency_stdout.contains("fetch"),
        "apk update output mentions the index refresh: {}",
        result.dependency_stdout
    );

    engine.cleanup_session(&session, false).await.unwrap();
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_image_switch_replaces_container_on_isolated_session() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let engine = test_engine("switch").await;
    let session = engine
        .create_session(SessionConfig::new(PlacementStrategy::PerSession))
        .unwrap();

    engine
        .execute_code(&session, ExecutionOptions::new("python").with_code("print('py')"))
        .await
        .unwrap();

    let first = engine
        .get_session_info(&session)
        .unwrap()
        .container
        .unwrap();

    engine
        .execute_code(&session, ExecutionOptions::new("shell").with_code("echo sh"))
        .await
        .unwrap();

    let info = engine.get_session_info(&session).unwrap();
    let current = info.container.unwrap();

    assert!(current.image.contains("alpine"), "image: {}", current.image);
    assert_eq!(info.container_history.len(), 2);
    assert_ne!(current.container_id, first.container_id);
    assert!(
        !inspect_exists(&first.container_id).await,
        "mismatched container must be removed"
    );

    engine.cleanup_session(&session, false).await.unwrap();
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_shared_workspace_persists_across_image_switch() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let engine = test_engine("shared").await;
    let session = engine
        .create_session(SessionConfig::new(PlacementStrategy::PerSession))
        .unwrap();

    let first = engine
        .execute_code(
            &session,
            ExecutionOptions::new("python")
                .with_code("open('carry.txt', 'w').write('kept')")
                .with_workspace_sharing(WorkspaceSharing::Shared),
        )
        .await
        .unwrap();

    // Different language, same shared workspace directory.
    let second = engine
        .execute_code(
            &session,
            ExecutionOptions::new("shell")
                .with_code("cat carry.txt")
                .with_workspace_sharing(WorkspaceSharing::Shared),
        )
        .await
        .unwrap();

    assert_eq!(first.workspace_dir, second.workspace_dir);
    assert_eq!(second.stdout, "kept");
    assert_eq!(second.exit_code, 0);

    let info = engine.get_session_info(&session).unwrap();
    assert_eq!(
        info.idle_retained.len(),
        1,
        "the python container is parked for reuse"
    );

    engine.cleanup_session(&session, false).await.unwrap();
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_pool_sharing_combination_rejected() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let engine = test_engine("poolshared").await;
    let session = engine
        .create_session(SessionConfig::new(PlacementStrategy::Pool))
        .unwrap();

    let err = engine
        .execute_code(
            &session,
            ExecutionOptions::new("shell")
                .with_code("echo nope")
                .with_workspace_sharing(WorkspaceSharing::Shared),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::InvalidConfiguration(_)));
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_pool_release_cleans_workspace() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let engine = test_engine("pool").await;

    let first_session = engine
        .create_session(SessionConfig::new(PlacementStrategy::Pool))
        .unwrap();
    let first = engine
        .execute_code(
            &first_session,
            ExecutionOptions::new("shell").with_code("echo residue > residue.txt"),
        )
        .await
        .unwrap();
    assert_eq!(first.exit_code, 0);

    engine.cleanup_session(&first_session, false).await.unwrap();

    let status = engine.pool_status();
    assert!(status.size >= 1);
    assert!(status.free >= 1, "released container is free in the pool");

    // A new session borrowing from the pool sees an empty workspace.
    let second_session = engine
        .create_session(SessionConfig::new(PlacementStrategy::Pool))
        .unwrap();
    let second = engine
        .execute_code(
            &second_session,
            ExecutionOptions::new("shell").with_code("ls /workspace"),
        )
        .await
        .unwrap();

    assert!(
        !second.stdout.contains("residue.txt"),
        "workspace was cleaned on release: {}",
        second.stdout
    );

    engine.cleanup_session(&second_session, false).await.unwrap();
    engine.cleanup(false).await.unwrap();
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_resource_overrides_visible_on_container() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let engine = test_engine("limits").await;
    let session = engine
        .create_session(SessionConfig::new(PlacementStrategy::PerSession))
        .unwrap();

    engine
        .execute_code(
            &session,
            ExecutionOptions::new("shell")
                .with_code("echo limited")
                .with_memory_limit("256m")
                .with_cpu_limit(0.25),
        )
        .await
        .unwrap();

    let meta = engine
        .get_session_info(&session)
        .unwrap()
        .container
        .unwrap();

    let docker = bollard::Docker::connect_with_local_defaults().unwrap();
    let inspect = docker
        .inspect_container(
            &meta.container_id,
            None::<bollard::query_parameters::InspectContainerOptions>,
        )
        .await
        .unwrap();
    let host_config = inspect.host_config.unwrap();

    assert_eq!(host_config.memory, Some(256 * 1024 * 1024));
    assert_eq!(host_config.cpu_quota, Some(25_000));

    engine.cleanup_session(&session, false).await.unwrap();
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_base64_round_trip_through_workspace() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let engine = test_engine("b64").await;
    let session = engine
        .create_session(SessionConfig::new(PlacementStrategy::PerSession))
        .unwrap();

    // First run provisions the container and its workspace.
    engine
        .execute_code(&session, ExecutionOptions::new("shell").with_code("true"))
        .await
        .unwrap();

    let payload = {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(b"round trip \x00\xff bytes")
    };

    engine
        .add_file_from_base64(&session, "input/data.bin", &payload)
        .await
        .unwrap();
    let back = engine
        .read_file_base64(&session, "input/data.bin")
        .await
        .unwrap();
    assert_eq!(back, payload);

    let listed = engine.list_workspace_files(&session, false).await.unwrap();
    assert!(listed.iter().any(|p| p.ends_with("input/data.bin")));

    engine.cleanup_session(&session, false).await.unwrap();
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_cleanup_keep_generated_prunes_everything_else() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let engine = test_engine("keep").await;
    let session = engine
        .create_session(SessionConfig::new(PlacementStrategy::PerSession))
        .unwrap();

    let result = engine
        .execute_code(
            &session,
            ExecutionOptions::new("python").with_code("open('out.txt', 'w').write('kept')"),
        )
        .await
        .unwrap();
    assert_eq!(result.exit_code, 0);

    let workspace_dir = result.workspace_dir.clone();
    engine.cleanup_session(&session, true).await.unwrap();

    assert!(workspace_dir.exists(), "workspace survives keep-generated");
    assert!(workspace_dir.join("out.txt").exists());
    assert!(
        !workspace_dir.join("code.py").exists(),
        "non-generated files are pruned"
    );

    std::fs::remove_dir_all(&workspace_dir).unwrap();
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_timeout_kills_execution() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let engine = test_engine("timeout").await;
    let session = engine
        .create_session(SessionConfig::new(PlacementStrategy::PerSession))
        .unwrap();

    let err = engine
        .execute_code(
            &session,
            ExecutionOptions::new("shell")
                .with_code("sleep 30")
                .with_timeout(Duration::from_secs(2)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Timeout(_)));

    // The session keeps its container; cleanup still works.
    assert!(engine.get_session_info(&session).is_ok());
    engine.cleanup_session(&session, false).await.unwrap();
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_unknown_language_and_missing_session_errors() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let engine = test_engine("errors").await;
    let session = engine
        .create_session(SessionConfig::new(PlacementStrategy::PerSession))
        .unwrap();

    let err = engine
        .execute_code(&session, ExecutionOptions::new("cobol").with_code("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownLanguage(_)));

    let err = engine
        .execute_code(&session, ExecutionOptions::new("shell"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfiguration(_)));

    let err = engine
        .execute_code("no-such-session", ExecutionOptions::new("shell").with_code("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SessionNotFound(_)));

    engine.cleanup_session(&session, false).await.unwrap();
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_session_id_reuse_and_enforcement() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let engine = test_engine("ids").await;

    let mut config = SessionConfig::new(PlacementStrategy::PerSession);
    config.session_id = Some("fixed-id".to_string());
    let first = engine.create_session(config.clone()).unwrap();
    assert_eq!(first, "fixed-id");

    // Same id without enforcement returns the existing session.
    let second = engine.create_session(config.clone()).unwrap();
    assert_eq!(second, "fixed-id");

    config.enforce_new_session = true;
    let err = engine.create_session(config).unwrap_err();
    assert!(matches!(err, EngineError::SessionExists(_)));

    engine.cleanup_session("fixed-id", false).await.unwrap();
}
