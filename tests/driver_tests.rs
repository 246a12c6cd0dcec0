//! Integration tests for the schedule drivers.
//!
//! The npm driver's upstream tag-existence queries run against a local
//! stub registry that answers 200 for a configured set of tag paths.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::Router;
use wharfgate::drivers::{NpmScheduleDriver, PipScheduleDriver};
use wharfgate::parser::{
    RegistryType, RequestMeta, META_BASIC_AUTH, META_COMMAND, META_EXTRA, META_PACKAGE, META_PATH,
    META_SESSION,
};
use wharfgate::schedule::ScheduleDriver;

// =============================================================================
// Stub Registry
// =============================================================================

async fn tag_handler(
    State(existing): State<Arc<HashSet<String>>>,
    req: Request<Body>,
) -> StatusCode {
    if existing.contains(req.uri().path()) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Serves 200 for the given paths and 404 otherwise; returns the API base.
async fn spawn_stub_registry(existing: &[&str]) -> String {
    let set: Arc<HashSet<String>> = Arc::new(existing.iter().map(|s| s.to_string()).collect());
    let app = Router::new().fallback(tag_handler).with_state(set);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}/api", addr)
}

// =============================================================================
// Test Helpers
// =============================================================================

fn meta(registry_type: RegistryType, pairs: &[(&str, &str)]) -> RequestMeta {
    RequestMeta {
        registry_type,
        has_hit: true,
        metadata: pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

fn npm_driver(api: String) -> NpmScheduleDriver {
    NpmScheduleDriver::new(
        api,
        "library".to_string(),
        "verdaccio/verdaccio".to_string(),
        "5".to_string(),
    )
}

// =============================================================================
// npm Driver
// =============================================================================

#[tokio::test]
async fn test_npm_default_policy_with_session() {
    let api = spawn_stub_registry(&[]).await;
    let driver = npm_driver(api);

    let meta = meta(
        RegistryType::Npm,
        &[(META_COMMAND, "whoami"), (META_SESSION, "s1")],
    );
    let policy = driver.schedule(&meta).await.unwrap();

    assert_eq!(policy.image, "verdaccio/verdaccio");
    assert_eq!(policy.tag, "5");
    assert!(policy.use_hub);
    assert_eq!(policy.reuse_identity, "s1");
    assert_eq!(policy.bound_ports, vec![80]);
    assert_eq!(policy.namespace, "library");

    // Default rebuild mirrors the base image and neither pushes nor stores.
    let rebuild = policy.rebuild.unwrap();
    assert_eq!(rebuild.image, "verdaccio/verdaccio");
    assert_eq!(rebuild.tag, "5");
    assert!(!rebuild.need_push);
    assert!(!rebuild.need_store);
}

#[tokio::test]
async fn test_npm_install_adopts_published_image() {
    let api = spawn_stub_registry(&["/api/repositories/library/express/tags/4.18.2"]).await;
    let driver = npm_driver(api);

    let meta = meta(
        RegistryType::Npm,
        &[
            (META_COMMAND, "install"),
            (META_PATH, "/express"),
            (META_EXTRA, "express@4.18.2"),
        ],
    );
    let policy = driver.schedule(&meta).await.unwrap();

    assert_eq!(policy.image, "express");
    assert_eq!(policy.tag, "4.18.2");
    assert!(!policy.use_hub);
    // Read-only path never rebuilds.
    assert!(policy.rebuild.is_none());
}

#[tokio::test]
async fn test_npm_install_unpublished_falls_back_to_base() {
    let api = spawn_stub_registry(&[]).await;
    let driver = npm_driver(api);

    let meta = meta(
        RegistryType::Npm,
        &[
            (META_COMMAND, "install"),
            (META_PATH, "/leftpad"),
            (META_EXTRA, "leftpad@1.0.0"),
        ],
    );
    let policy = driver.schedule(&meta).await.unwrap();

    assert_eq!(policy.image, "verdaccio/verdaccio");
    assert_eq!(policy.tag, "5");
    assert!(policy.use_hub);
    assert!(policy.rebuild.is_none());
}

#[tokio::test]
async fn test_npm_adduser_credential_path() {
    let api = spawn_stub_registry(&[]).await;
    let driver = npm_driver(api);

    let meta = meta(
        RegistryType::Npm,
        &[
            (META_COMMAND, "adduser"),
            (META_PATH, "/-/user/org.couchdb.user:alice"),
            (META_BASIC_AUTH, "6a6b6c"),
        ],
    );
    let policy = driver.schedule(&meta).await.unwrap();

    // The capture is tagged with the auth fingerprint and remembered.
    let rebuild = policy.rebuild.unwrap();
    assert_eq!(rebuild.image, "verdaccio/verdaccio");
    assert_eq!(rebuild.tag, "6a6b6c");
    assert!(rebuild.need_store);
    assert!(!rebuild.need_push);
}

#[tokio::test]
async fn test_npm_adduser_revision_update_is_not_credential_path() {
    let api = spawn_stub_registry(&[]).await;
    let driver = npm_driver(api);

    let meta = meta(
        RegistryType::Npm,
        &[
            (META_COMMAND, "adduser"),
            (META_PATH, "/-/user/org.couchdb.user:alice/-rev/1-abc"),
            (META_BASIC_AUTH, "6a6b6c"),
        ],
    );
    let policy = driver.schedule(&meta).await.unwrap();

    let rebuild = policy.rebuild.unwrap();
    assert_eq!(rebuild.tag, "5");
    assert!(!rebuild.need_store);
}

#[tokio::test]
async fn test_npm_publish_of_published_package_reuses_image() {
    let api = spawn_stub_registry(&["/api/repositories/library/express/tags/4.18.2"]).await;
    let driver = npm_driver(api);

    let meta = meta(
        RegistryType::Npm,
        &[
            (META_COMMAND, "publish"),
            (META_PATH, "/express"),
            (META_EXTRA, "4.18.2"),
            (META_BASIC_AUTH, "6a6b6c"),
        ],
    );
    let policy = driver.schedule(&meta).await.unwrap();

    assert_eq!(policy.image, "express");
    assert_eq!(policy.tag, "4.18.2");
    assert!(!policy.use_hub);
    assert!(policy.session_tag.is_none());

    let rebuild = policy.rebuild.unwrap();
    assert_eq!(rebuild.image, "express");
    assert_eq!(rebuild.tag, "4.18.2");
    assert!(rebuild.need_push);
}

#[tokio::test]
async fn test_npm_first_publish_prefers_session_image() {
    let api = spawn_stub_registry(&[]).await;
    let driver = npm_driver(api);

    let meta = meta(
        RegistryType::Npm,
        &[
            (META_COMMAND, "publish"),
            (META_PATH, "/newpkg"),
            (META_EXTRA, "1.0.0"),
            (META_BASIC_AUTH, "6a6b6c"),
        ],
    );
    let policy = driver.schedule(&meta).await.unwrap();

    assert_eq!(policy.image, "verdaccio/verdaccio");
    assert!(policy.use_hub);
    assert_eq!(policy.session_tag.as_deref(), Some("6a6b6c"));

    let rebuild = policy.rebuild.unwrap();
    assert_eq!(rebuild.image, "newpkg");
    assert_eq!(rebuild.tag, "1.0.0");
    assert!(rebuild.need_push);
}

#[tokio::test]
async fn test_npm_driver_declines_foreign_meta() {
    let api = spawn_stub_registry(&[]).await;
    let driver = npm_driver(api);

    let pip = meta(RegistryType::Pip, &[(META_COMMAND, "install")]);
    assert!(driver.schedule(&pip).await.is_none());

    let miss = RequestMeta::miss();
    assert!(driver.schedule(&miss).await.is_none());
}

// =============================================================================
// pip Driver
// =============================================================================

#[tokio::test]
async fn test_pip_install_policy() {
    let driver = PipScheduleDriver::new("pip".to_string());

    let meta = meta(
        RegistryType::Pip,
        &[(META_COMMAND, "install"), (META_PACKAGE, "requests")],
    );
    let policy = driver.schedule(&meta).await.unwrap();

    assert_eq!(policy.image, "pip-project/pypi-requests");
    assert_eq!(policy.tag, "dev");
    assert_eq!(policy.bound_ports, vec![80]);
    assert_eq!(policy.reuse_identity, "requests");
    assert_eq!(policy.namespace, "pip");
    assert!(policy.rebuild.is_none());

    let expected_env: HashMap<String, String> = [
        ("PYPI_EXTRA".to_string(), "--disable-fallback".to_string()),
        ("PYPI_ROOT".to_string(), "/pypi".to_string()),
    ]
    .into_iter()
    .collect();
    assert_eq!(policy.env_vars, expected_env);
}

#[tokio::test]
async fn test_pip_declines_other_commands() {
    let driver = PipScheduleDriver::new("pip".to_string());

    let meta = meta(RegistryType::Pip, &[(META_COMMAND, "search")]);
    assert!(driver.schedule(&meta).await.is_none());
}
