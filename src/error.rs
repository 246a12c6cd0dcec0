//! Error types for the runtime proxy.

use std::path::PathBuf;
use std::time::Duration;

use crate::parser::RegistryType;

/// Result type alias for runtime proxy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the runtime proxy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file could not be read or parsed.
    #[error("failed to load configuration from {path}: {reason}")]
    ConfigLoad { path: PathBuf, reason: String },

    /// Configuration field failed validation.
    #[error("invalid configuration: {field}: {reason}")]
    ConfigInvalid { field: &'static str, reason: String },

    // =========================================================================
    // Classification Errors
    // =========================================================================
    /// No parser in the chain claimed the request.
    #[error("no parser hit: {0}")]
    NoParserHit(String),

    /// A parser failed while inspecting a request.
    #[error("failed to classify request: {0}")]
    Classify(String),

    // =========================================================================
    // Scheduling Errors
    // =========================================================================
    /// No driver is registered for the registry kind.
    #[error("registry type '{0}' not supported")]
    UnsupportedRegistry(RegistryType),

    /// The registered driver declined to produce a policy.
    #[error("driver for '{registry}' declined the request")]
    DriverDeclined { registry: RegistryType },

    /// A schedule policy is not executable.
    #[error("invalid schedule policy: {0}")]
    InvalidPolicy(String),

    /// A build policy is missing required fields.
    #[error("invalid build policy: {0}")]
    InvalidBuildPolicy(String),

    // =========================================================================
    // Runtime Pool Errors
    // =========================================================================
    /// A live pool entry already holds the key.
    #[error("runtime '{key}' already exists in pool")]
    RuntimeExists { key: String },

    /// No live pool entry holds the key.
    #[error("runtime '{key}' not found in pool")]
    RuntimeNotFound { key: String },

    // =========================================================================
    // Container Engine Errors
    // =========================================================================
    /// An engine subcommand exited non-zero.
    #[error("engine command '{command}' failed: {reason}")]
    EngineCommand { command: String, reason: String },

    /// The engine binary could not be invoked at all.
    #[error("failed to spawn engine command '{command}': {reason}")]
    EngineSpawn { command: String, reason: String },

    // =========================================================================
    // Executor Errors
    // =========================================================================
    /// The launched container never answered its readiness probe.
    #[error("readiness check for {target} timed out after {duration:?}")]
    ReadinessTimeout { target: String, duration: Duration },

    // =========================================================================
    // Wire Errors
    // =========================================================================
    /// A build policy could not be serialized for the rebuild header.
    #[error("failed to encode build policy: {0}")]
    PolicyEncode(String),

    /// A rebuild header could not be decoded back into a build policy.
    #[error("failed to decode build policy: {0}")]
    PolicyDecode(String),

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Upstream HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}
