//! Request classification.
//!
//! An ordered chain of classifiers inspects each inbound HTTP request and
//! produces a [`RequestMeta`]: which registry kind should serve it and the
//! request-derived fields the schedule drivers need. Registration order is
//! npm, pip, then a catch-all that claims everything for the default
//! upstream — so the chain always returns a hit.
//!
//! ## Parser Contract
//!
//! A parser inspects the request (`User-Agent`, `Referer`, method, URL
//! path, and for selected npm commands the body) and returns a miss to
//! defer, a hit with populated metadata, or an error. Errors are collected
//! but never abort the chain.
//!
//! Parsers that consume the body (npm `publish`/`adduser`) must restore
//! it: downstream proxying still sees the original bytes and an exact
//! `Content-Length`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request};
use base64::Engine;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::history::CommandHistory;

// =============================================================================
// Registry Type
// =============================================================================

/// Which registry family a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryType {
    /// npm client traffic.
    Npm,
    /// pip client traffic.
    Pip,
    /// Everything else; proxied unchanged to the default upstream.
    #[serde(rename = "image")]
    ImageDefault,
}

impl std::fmt::Display for RegistryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Npm => write!(f, "npm"),
            Self::Pip => write!(f, "pip"),
            Self::ImageDefault => write!(f, "image"),
        }
    }
}

// =============================================================================
// Request Metadata
// =============================================================================

/// Recognized metadata keys.
pub const META_COMMAND: &str = "command";
pub const META_PATH: &str = "path";
pub const META_EXTRA: &str = "extra";
pub const META_SESSION: &str = "session";
pub const META_BASIC_AUTH: &str = "basic_auth";
pub const META_PACKAGE: &str = "package";
pub const META_FULL_COMMAND: &str = "full_command";

/// Classification output for one request.
///
/// Produced per request, consumed by the schedule drivers, and discarded
/// after scheduling.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    /// Registry family that should serve the request.
    pub registry_type: RegistryType,
    /// Whether any parser claimed the request.
    pub has_hit: bool,
    /// Extracted fields; see the `META_*` keys.
    pub metadata: HashMap<String, String>,
}

impl RequestMeta {
    /// A non-hit placeholder.
    #[must_use]
    pub fn miss() -> Self {
        Self {
            registry_type: RegistryType::ImageDefault,
            has_hit: false,
            metadata: HashMap::new(),
        }
    }

    /// Returns the metadata value for `key`, or `""` when absent.
    #[must_use]
    pub fn field(&self, key: &str) -> &str {
        self.metadata.get(key).map(String::as_str).unwrap_or("")
    }
}

// =============================================================================
// Parser Contract
// =============================================================================

/// A single request classifier.
#[async_trait]
pub trait RequestParser: Send + Sync {
    /// Inspects the request. Returns a miss to defer to later parsers.
    ///
    /// Implementations that read the body must restore it, including a
    /// correct `Content-Length` header.
    async fn parse(&self, req: &mut Request<Body>) -> Result<RequestMeta>;
}

// =============================================================================
// npm Parser
// =============================================================================

#[derive(Debug, Deserialize)]
struct NpmPackMeta {
    #[serde(rename = "dist-tags", default)]
    tags: NpmDistTags,
}

#[derive(Debug, Default, Deserialize)]
struct NpmDistTags {
    #[serde(default)]
    latest: String,
}

#[derive(Debug, Deserialize)]
struct NpmLoginMeta {
    #[serde(rename = "name")]
    username: String,
    password: String,
}

/// Classifies npm client requests.
///
/// Qualifies only when `User-Agent` contains `npm` and `Referer` is
/// non-empty; npm encodes the invoking command in the `Referer` header.
pub struct NpmParser;

#[async_trait]
impl RequestParser for NpmParser {
    async fn parse(&self, req: &mut Request<Body>) -> Result<RequestMeta> {
        let user_agent = header_str(req, header::USER_AGENT);
        if !user_agent.contains("npm") {
            return Ok(RequestMeta::miss());
        }

        let npm_cmd = header_str(req, header::REFERER);
        if npm_cmd.is_empty() {
            return Ok(RequestMeta::miss());
        }

        let command = npm_cmd
            .split(' ')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        let extra = npm_cmd
            .strip_prefix(&command)
            .unwrap_or("")
            .trim()
            .to_string();

        let authorization = header_str(req, header::AUTHORIZATION);
        let basic_payload = authorization
            .strip_prefix("Basic ")
            .unwrap_or(&authorization);

        let mut metadata = HashMap::new();
        metadata.insert(META_COMMAND.to_string(), command.clone());
        metadata.insert(META_PATH.to_string(), req.uri().to_string());
        metadata.insert(META_EXTRA.to_string(), extra);
        metadata.insert(
            META_SESSION.to_string(),
            header_value(req, "npm-session").to_string(),
        );
        metadata.insert(
            META_BASIC_AUTH.to_string(),
            hex::encode(basic_payload.as_bytes()),
        );
        metadata.insert(META_FULL_COMMAND.to_string(), format!("npm {}", npm_cmd));

        // publish and adduser carry request bodies worth mining.
        if command == "publish" || command == "adduser" {
            if let Some(body) = take_body(req) {
                let bytes = to_bytes(body, usize::MAX)
                    .await
                    .map_err(|e| Error::Classify(format!("failed to read npm body: {}", e)))?;

                let parsed = parse_npm_body(&command, &bytes);

                // Restore the body before judging the parse result so the
                // request stays forwardable either way.
                *req.body_mut() = Body::from(bytes.clone());
                req.headers_mut().insert(
                    header::CONTENT_LENGTH,
                    axum::http::HeaderValue::from(bytes.len()),
                );

                match parsed {
                    Ok(Some((key, value))) => {
                        metadata.insert(key.to_string(), value);
                    }
                    Ok(None) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(RequestMeta {
            registry_type: RegistryType::Npm,
            has_hit: true,
            metadata,
        })
    }
}

/// Extracts the field of interest from a publish/adduser body.
fn parse_npm_body(command: &str, bytes: &[u8]) -> Result<Option<(&'static str, String)>> {
    match command {
        "publish" => {
            let pack: NpmPackMeta = serde_json::from_slice(bytes)
                .map_err(|e| Error::Classify(format!("invalid npm publish body: {}", e)))?;
            Ok(Some((META_EXTRA, pack.tags.latest)))
        }
        "adduser" => {
            let login: NpmLoginMeta = serde_json::from_slice(bytes)
                .map_err(|e| Error::Classify(format!("invalid npm adduser body: {}", e)))?;
            let credential = format!("{}:{}", login.username, login.password);
            let encoded = base64::engine::general_purpose::STANDARD.encode(credential);
            Ok(Some((META_BASIC_AUTH, hex::encode(encoded.as_bytes()))))
        }
        _ => Ok(None),
    }
}

// =============================================================================
// pip Parser
// =============================================================================

/// Classifies pip client requests.
///
/// Requires a `pip` `User-Agent` and method GET; the package name is
/// derived from the URL shape.
pub struct PipParser;

#[async_trait]
impl RequestParser for PipParser {
    async fn parse(&self, req: &mut Request<Body>) -> Result<RequestMeta> {
        let user_agent = header_str(req, header::USER_AGENT);
        if !user_agent.contains("pip") || req.method() != axum::http::Method::GET {
            return Ok(RequestMeta::miss());
        }

        let path = req.uri().path();
        let package = extract_pip_package(path);
        debug!(package = %package, "pip install classified");

        let mut metadata = HashMap::new();
        metadata.insert(META_PACKAGE.to_string(), package.clone());
        metadata.insert(META_COMMAND.to_string(), "install".to_string());
        metadata.insert(
            META_FULL_COMMAND.to_string(),
            format!("pip install {}", package),
        );

        Ok(RequestMeta {
            registry_type: RegistryType::Pip,
            has_hit: true,
            metadata,
        })
    }
}

/// Derives the package name from a pip request path.
///
/// Two shapes are recognized: `/packages/<pkg>-…` takes the segment before
/// the first dash; anything else strips a leading `/simple` and trims
/// slashes.
fn extract_pip_package(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("/packages/") {
        if !rest.is_empty() {
            return rest.split('-').next().unwrap_or_default().to_string();
        }
    }

    let path = match path.strip_prefix("/simple") {
        Some(rest) if path != "/simple/" => rest,
        _ => path,
    };
    path.trim_start_matches('/').trim_end_matches('/').to_string()
}

// =============================================================================
// Catch-All Parser
// =============================================================================

/// Terminal parser: claims every request for the default upstream.
pub struct DefaultParser;

#[async_trait]
impl RequestParser for DefaultParser {
    async fn parse(&self, _req: &mut Request<Body>) -> Result<RequestMeta> {
        Ok(RequestMeta {
            registry_type: RegistryType::ImageDefault,
            has_hit: true,
            metadata: HashMap::new(),
        })
    }
}

// =============================================================================
// Parser Chain
// =============================================================================

/// Ordered sequence of classifiers; the first hit wins.
pub struct ParserChain {
    parsers: Vec<Box<dyn RequestParser>>,
    history: Arc<CommandHistory>,
}

impl ParserChain {
    /// Creates an empty chain that records commands into `history`.
    #[must_use]
    pub fn new(history: Arc<CommandHistory>) -> Self {
        Self {
            parsers: Vec::new(),
            history,
        }
    }

    /// Registers the standard parsers: npm, pip, catch-all.
    pub fn init(&mut self) {
        self.register(Box::new(NpmParser));
        self.register(Box::new(PipParser));
        self.register(Box::new(DefaultParser));
    }

    /// Appends a parser to the chain.
    pub fn register(&mut self, parser: Box<dyn RequestParser>) {
        self.parsers.push(parser);
    }

    /// Classifies the request with the first parser that claims it.
    ///
    /// Individual parser errors are collected and the chain continues;
    /// only a final no-hit state raises an error (unreachable with the
    /// catch-all registered).
    pub async fn parse(&self, req: &mut Request<Body>) -> Result<RequestMeta> {
        if self.parsers.is_empty() {
            return Err(Error::NoParserHit("no parsers".to_string()));
        }

        let mut errors = Vec::new();
        for parser in &self.parsers {
            match parser.parse(req).await {
                Err(e) => errors.push(e.to_string()),
                Ok(meta) if meta.has_hit => {
                    let full_command = meta.field(META_FULL_COMMAND);
                    if !full_command.is_empty() {
                        self.history.log(full_command);
                    }
                    return Ok(meta);
                }
                Ok(_) => {}
            }
        }

        Err(Error::NoParserHit(errors.join("; ")))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn header_str(req: &Request<Body>, name: header::HeaderName) -> String {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

fn header_value<'a>(req: &'a Request<Body>, name: &str) -> &'a str {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Takes the body out of the request when it carries declared content.
fn take_body(req: &mut Request<Body>) -> Option<Body> {
    let content_length = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    if content_length == 0 {
        return None;
    }

    Some(std::mem::replace(req.body_mut(), Body::empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pip_package_shapes() {
        assert_eq!(extract_pip_package("/packages/flask-2.0.tar.gz"), "flask");
        assert_eq!(extract_pip_package("/simple/requests/"), "requests");
        assert_eq!(extract_pip_package("/requests/"), "requests");
        assert_eq!(extract_pip_package("/simple/"), "simple");
    }
}
