//! Reverse proxy router.
//!
//! Intercepts every inbound request, classifies it through the parser
//! chain, asks the scheduler for a serving instance when a package
//! registry claims it, rewrites the target URL, forwards, and triggers
//! the post-response work: delayed idle marking and the fire-and-forget
//! rebuild of the serving container's state.
//!
//! ## Tunneling Headers
//!
//! The rebuild plan and the pool key travel on the outbound request as
//! `registry-factory` (base64 JSON) and `instance-key` headers, so the
//! response phase can act statelessly on what the request phase decided —
//! no side table keyed by request identity.
//!
//! ## Failure Surface
//!
//! A request the scheduler cannot place gets 502 Bad Gateway. Rebuild
//! failures never delay nor fail the client response; they are logged.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use tracing::{debug, error, info, warn};

use crate::api;
use crate::config::Config;
use crate::constants::{
    INSTANCE_KEY_HEADER, PROXY_DIAL_TIMEOUT, PROXY_IDLE_CONN_TIMEOUT, REBUILD_HEADER,
    RESPONSE_IDLE_DELAY,
};
use crate::engine::{ContainerEngine, DockerCli};
use crate::error::Result;
use crate::executor::Executor;
use crate::history::CommandHistory;
use crate::packer::Packer;
use crate::parser::{ParserChain, RegistryType, RequestMeta};
use crate::schedule::BuildPolicy;
use crate::scheduler::Scheduler;

// =============================================================================
// Shared State
// =============================================================================

/// State shared by the proxy handler and the management API.
#[derive(Clone)]
pub struct AppState {
    /// The scheduler; exclusively owns pool, image store, and packer.
    pub scheduler: Arc<Scheduler>,
    /// Request classification chain.
    pub chain: Arc<ParserChain>,
    /// Command history backing `/api/v1/commands`.
    pub history: Arc<CommandHistory>,
    /// Upstream HTTP client used for forwarding.
    pub client: reqwest::Client,
    /// Default target for traffic no driver claims.
    pub default_target: String,
}

/// Builds the upstream client with the proxy transport settings.
fn proxy_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(PROXY_DIAL_TIMEOUT)
        .pool_idle_timeout(PROXY_IDLE_CONN_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap_or_default()
}

/// Builds the full router: management routes plus the proxy fallback.
///
/// Every path under the management prefix is served locally; unknown
/// management paths are acknowledged empty rather than proxied.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/stats", get(api::stats))
        .route("/api/v1/commands", get(api::commands))
        .route("/api/v1/{*rest}", any(api::unknown))
        .fallback(proxy_handler)
        .with_state(state)
}

// =============================================================================
// Proxy Server
// =============================================================================

/// The proxy server: wires engine, executor, packer, scheduler, and the
/// parser chain, and serves the router.
pub struct ProxyServer {
    config: Config,
    engine: Arc<dyn ContainerEngine>,
    state: AppState,
}

impl ProxyServer {
    /// Assembles the full pipeline from configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let engine: Arc<dyn ContainerEngine> = Arc::new(DockerCli::new(config.dockerd_endpoint()));

        let executor = Executor::new(
            Arc::clone(&engine),
            config.dockerd.host.clone(),
            config.harbor.host.clone(),
        );
        let packer = Packer::new(
            Arc::clone(&engine),
            config.harbor.host.clone(),
            config.dockerd.admin.clone(),
            config.dockerd.password.clone(),
        );
        let scheduler = Arc::new(Scheduler::new(&config, Arc::new(executor), packer));

        let history = Arc::new(CommandHistory::new());
        let mut chain = ParserChain::new(Arc::clone(&history));
        chain.init();

        let state = AppState {
            scheduler,
            chain: Arc::new(chain),
            history,
            client: proxy_client(),
            default_target: config.harbor_target(),
        };

        Self {
            config,
            engine,
            state,
        }
    }

    /// The scheduler handle.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.state.scheduler
    }

    /// Checks the container daemon is reachable.
    pub async fn engine_status(&self) -> Result<()> {
        self.engine.version().await
    }

    /// Runs the server until `shutdown` fires, then stops the scheduler.
    pub async fn serve(&self, shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        self.state.scheduler.start(shutdown.clone());

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(addr = %addr, "proxy server listening");

        let mut shutdown_rx = shutdown;
        axum::serve(listener, router(self.state.clone()))
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await?;

        self.state.scheduler.stop().await;
        Ok(())
    }
}

// =============================================================================
// Request Phase
// =============================================================================

/// Classifies, schedules, rewrites, and forwards one request.
async fn proxy_handler(State(state): State<AppState>, mut req: Request<Body>) -> Response {
    log_diagnostics(&req);

    let meta = match state.chain.parse(&mut req).await {
        Ok(meta) => meta,
        Err(e) => {
            warn!("parse error: {}", e);
            RequestMeta::miss()
        }
    };

    let raw_target = if meta.has_hit
        && matches!(meta.registry_type, RegistryType::Npm | RegistryType::Pip)
    {
        let env = match state.scheduler.schedule(&meta).await {
            Ok(env) => env,
            Err(e) => {
                error!("schedule error: {}", e);
                return bad_gateway();
            }
        };

        if let Some(rebuild) = &env.rebuild {
            match rebuild.encode() {
                Ok(encoded) => match HeaderValue::from_str(&encoded) {
                    Ok(value) => {
                        req.headers_mut().insert(REBUILD_HEADER, value);
                    }
                    Err(e) => {
                        error!("set rebuild header failed: {}", e);
                        return bad_gateway();
                    }
                },
                Err(e) => {
                    error!("set rebuild header failed: {}", e);
                    return bad_gateway();
                }
            }
        }

        if !env.instance_key.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&env.instance_key) {
                req.headers_mut().insert(INSTANCE_KEY_HEADER, value);
            }
        }

        format!("http://{}", env.target)
    } else {
        state.default_target.clone()
    };

    forward(&state, req, &raw_target).await
}

/// Logs the diagnostics the director records for every request.
fn log_diagnostics(req: &Request<Body>) {
    debug!(method = %req.method(), uri = %req.uri(), "incoming request");

    let mut session = Vec::new();
    if let Some(cookies) = req.headers().get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        session.push(cookies.to_string());
    }
    if let Some(npm_session) = req.headers().get("npm-session").and_then(|v| v.to_str().ok()) {
        if !npm_session.is_empty() {
            session.push(format!("Npm-Session:{}", npm_session));
        }
    }
    if !session.is_empty() {
        debug!(session = %session.join("; "), "request session");
    }
    debug!(headers = ?req.headers(), "request headers");
}

// =============================================================================
// Forwarding
// =============================================================================

/// Rewrites the request URL onto `raw_target` and forwards it upstream.
async fn forward(state: &AppState, req: Request<Body>, raw_target: &str) -> Response {
    let (parts, body) = req.into_parts();

    let target: reqwest::Url = match raw_target.parse() {
        Ok(target) => target,
        Err(e) => {
            error!(target = %raw_target, "url parse error: {}", e);
            return bad_gateway();
        }
    };

    let path = single_joining_slash(target.path(), parts.uri.path());
    let mut url = format!("{}://{}{}", target.scheme(), target.authority(), path);
    if let Some(query) = join_queries(target.query(), parts.uri.query()) {
        url.push('?');
        url.push_str(&query);
    }

    // The parser has already buffered any body it inspected; buffering
    // here keeps the forwarded Content-Length exact.
    let body_bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("failed to read request body: {}", e);
            return bad_gateway();
        }
    };

    let mut headers = parts.headers.clone();
    headers.remove(header::HOST);
    let hop_by_hop: Vec<_> = headers
        .keys()
        .filter(|name| is_hop_by_hop(name.as_str()))
        .cloned()
        .collect();
    for name in hop_by_hop {
        headers.remove(name);
    }
    if !headers.contains_key(header::USER_AGENT) {
        // Explicitly empty so the client library does not supply its own.
        headers.insert(header::USER_AGENT, HeaderValue::from_static(""));
    }

    debug!(url = %url, "proxy to");

    let mut request = state
        .client
        .request(parts.method.clone(), url)
        .headers(headers);
    if !body_bytes.is_empty() {
        request = request.body(body_bytes);
    }

    let upstream = match request.send().await {
        Ok(upstream) => upstream,
        Err(e) => {
            error!(target = %raw_target, "upstream request failed: {}", e);
            return bad_gateway();
        }
    };

    debug!(status = %upstream.status(), "upstream response");
    handle_response_side_effects(state, &parts.headers, upstream.status());

    let mut builder = Response::builder().status(upstream.status());
    if let Some(response_headers) = builder.headers_mut() {
        for (name, value) in upstream.headers() {
            if !is_hop_by_hop(name.as_str()) {
                response_headers.append(name.clone(), value.clone());
            }
        }
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .unwrap_or_else(|_| bad_gateway())
}

// =============================================================================
// Response Phase
// =============================================================================

/// Launches the detached post-response tasks: delayed idle marking and
/// the rebuild of the serving container's state.
///
/// Both read the tunneling headers back off the request that was
/// forwarded; neither delays the client response.
fn handle_response_side_effects(
    state: &AppState,
    request_headers: &HeaderMap,
    status: StatusCode,
) {
    let instance_key = request_headers
        .get(INSTANCE_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !instance_key.is_empty() {
        let scheduler = Arc::clone(&state.scheduler);
        let key = instance_key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(RESPONSE_IDLE_DELAY).await;
            scheduler.free_runtime(&key);
        });
    }

    // Rebuild only on success; idle marking happens regardless.
    if status.as_u16() < 200 || status.as_u16() > 202 {
        return;
    }

    let encoded = request_headers
        .get(REBUILD_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if encoded.is_empty() {
        return;
    }

    let encoded = encoded.to_string();
    let scheduler = Arc::clone(&state.scheduler);
    tokio::spawn(async move {
        let policy = match BuildPolicy::decode(&encoded) {
            Ok(policy) => policy,
            Err(e) => {
                error!("failed to decode rebuild policy: {}", e);
                return;
            }
        };

        info!(
            image = %policy.image,
            tag = %policy.tag,
            base = %policy.base_container,
            "rebuild image from serving container"
        );

        if let Err(e) = scheduler.rebuild(&policy).await {
            error!(
                image = %policy.image,
                tag = %policy.tag,
                "failed to rebuild image: {}", e
            );
        }

        if policy.need_store {
            scheduler.store_image(&policy.image, &policy.tag);
            info!(image = %policy.image, tag = %policy.tag, "stored session image");
        }
    });
}

// =============================================================================
// URL Helpers
// =============================================================================

/// Joins two URL path segments with exactly one slash between them.
fn single_joining_slash(a: &str, b: &str) -> String {
    let a_slash = a.ends_with('/');
    let b_slash = b.starts_with('/');
    match (a_slash, b_slash) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => format!("{}/{}", a, b),
        _ => format!("{}{}", a, b),
    }
}

/// Target-first query concatenation; `None` when both are empty.
fn join_queries(target: Option<&str>, incoming: Option<&str>) -> Option<String> {
    let target = target.unwrap_or("");
    let incoming = incoming.unwrap_or("");
    if target.is_empty() && incoming.is_empty() {
        return None;
    }
    Some(format!("{}{}", target, incoming))
}

/// Hop-by-hop headers never copied onto the client response.
fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn bad_gateway() -> Response {
    StatusCode::BAD_GATEWAY.into_response()
}
