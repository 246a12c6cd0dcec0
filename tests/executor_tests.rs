//! Integration tests for the executor.
//!
//! Readiness probing runs against a local stub instance bound on the one
//! port the executor's (narrowed) allocation range can pick.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::any;
use axum::Router;
use wharfgate::engine::{ContainerEngine, RunOptions};
use wharfgate::error::{Error, Result};
use wharfgate::executor::{Executor, Launcher};
use wharfgate::schedule::SchedulePolicy;

// =============================================================================
// Test Helpers
// =============================================================================

#[derive(Default)]
struct FakeEngine {
    runs: Mutex<Vec<RunOptions>>,
    removed: Mutex<Vec<String>>,
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn version(&self) -> Result<()> {
        Ok(())
    }

    async fn pull(&self, _image: &str) -> Result<()> {
        Ok(())
    }

    async fn tag(&self, _source: &str, _target: &str) -> Result<()> {
        Ok(())
    }

    async fn push(&self, _image: &str) -> Result<()> {
        Ok(())
    }

    async fn login(&self, _username: &str, _password: &str, _registry: &str) -> Result<()> {
        Ok(())
    }

    async fn run(&self, opts: RunOptions) -> Result<String> {
        self.runs.lock().unwrap().push(opts);
        Ok("container-1".to_string())
    }

    async fn remove_container(&self, container: &str) -> Result<()> {
        self.removed.lock().unwrap().push(container.to_string());
        Ok(())
    }

    async fn remove_image(&self, _image: &str) -> Result<()> {
        Ok(())
    }

    async fn commit(&self, _container: &str, _image: &str, _tag: &str) -> Result<()> {
        Ok(())
    }
}

/// Binds a stub instance whose probe endpoint returns 503 for the first
/// `failures` requests, then 200. Returns the bound port.
async fn spawn_probe_target(failures: usize) -> u16 {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new().route(
        "/",
        any(move || {
            let hits = Arc::clone(&hits);
            async move {
                if hits.fetch_add(1, Ordering::SeqCst) < failures {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::OK
                }
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

fn executor_on(engine: Arc<FakeEngine>, port: u16) -> Executor {
    Executor::with_port_range(
        engine,
        "127.0.0.1".to_string(),
        "harbor.local".to_string(),
        port..port + 1,
    )
}

fn policy(image: &str, tag: &str, use_hub: bool) -> SchedulePolicy {
    SchedulePolicy {
        image: image.to_string(),
        tag: tag.to_string(),
        use_hub,
        bound_ports: vec![80],
        namespace: "npm".to_string(),
        ..Default::default()
    }
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_exec_rejects_empty_image() {
    let engine = Arc::new(FakeEngine::default());
    let executor = executor_on(Arc::clone(&engine), 30000);

    let err = executor.exec(&policy("", "latest", true)).await.unwrap_err();
    assert!(matches!(err, Error::InvalidPolicy(_)));
    assert!(engine.runs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_exec_rejects_missing_ports() {
    let engine = Arc::new(FakeEngine::default());
    let executor = executor_on(Arc::clone(&engine), 30000);

    let mut no_ports = policy("registry", "latest", true);
    no_ports.bound_ports.clear();

    assert!(executor.exec(&no_ports).await.is_err());
    assert!(engine.runs.lock().unwrap().is_empty());
}

// =============================================================================
// Launch and Readiness
// =============================================================================

#[tokio::test]
async fn test_exec_launches_and_probes_ready_instance() {
    let port = spawn_probe_target(0).await;
    let engine = Arc::new(FakeEngine::default());
    let executor = executor_on(Arc::clone(&engine), port);

    let env = executor
        .exec(&policy("verdaccio/verdaccio", "5", true))
        .await
        .unwrap();

    assert_eq!(env.target, format!("127.0.0.1:{}", port));
    assert_eq!(env.runtime_id, "container-1");

    let runs = engine.runs.lock().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].image, "verdaccio/verdaccio:5");
    assert!(runs[0].detach);
    assert!(runs[0].interactive);
    assert_eq!(runs[0].port_bindings.len(), 1);
    assert_eq!(runs[0].port_bindings[0].host, port);
    assert_eq!(runs[0].port_bindings[0].container, 80);
}

#[tokio::test]
async fn test_exec_empty_tag_defaults_to_latest() {
    let port = spawn_probe_target(0).await;
    let engine = Arc::new(FakeEngine::default());
    let executor = executor_on(Arc::clone(&engine), port);

    executor.exec(&policy("registry", "", true)).await.unwrap();

    let runs = engine.runs.lock().unwrap();
    assert_eq!(runs[0].image, "registry:latest");
}

#[tokio::test]
async fn test_exec_namespaced_reference_for_backing_registry() {
    let port = spawn_probe_target(0).await;
    let engine = Arc::new(FakeEngine::default());
    let executor = executor_on(Arc::clone(&engine), port);

    executor
        .exec(&policy("express", "4.18.2", false))
        .await
        .unwrap();

    let runs = engine.runs.lock().unwrap();
    assert_eq!(runs[0].image, "harbor.local/npm/express:4.18.2");
}

#[tokio::test]
async fn test_exec_tolerates_initial_probe_failures() {
    // 503 three times, then 200: still within the probe deadline.
    let port = spawn_probe_target(3).await;
    let engine = Arc::new(FakeEngine::default());
    let executor = executor_on(Arc::clone(&engine), port);

    let env = executor.exec(&policy("registry", "2", true)).await.unwrap();
    assert_eq!(env.target, format!("127.0.0.1:{}", port));
    assert!(engine.removed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_exec_times_out_and_removes_unready_container() {
    // Never answers 200 within the deadline.
    let port = spawn_probe_target(usize::MAX).await;
    let engine = Arc::new(FakeEngine::default());
    let executor = executor_on(Arc::clone(&engine), port);

    let err = executor.exec(&policy("registry", "2", true)).await.unwrap_err();
    assert!(matches!(err, Error::ReadinessTimeout { .. }));

    // The unpooled container is removed rather than leaked.
    assert_eq!(*engine.removed.lock().unwrap(), vec!["container-1"]);
}

// =============================================================================
// Destroy
// =============================================================================

#[tokio::test]
async fn test_destroy_forwards_to_engine() {
    let engine = Arc::new(FakeEngine::default());
    let executor = executor_on(Arc::clone(&engine), 30000);

    executor.destroy("container-9").await.unwrap();
    assert_eq!(*engine.removed.lock().unwrap(), vec!["container-9"]);

    assert!(executor.destroy("").await.is_err());
}
