//! YAML configuration for the runtime proxy.
//!
//! The configuration selects the listening address, the container daemon
//! the executor drives, the backing image registry, and the per-registry
//! namespaces. Parsing is strict: unknown registry protocols, missing
//! required fields, and reserved ports are rejected at boot.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level configuration, loaded from a YAML file at boot.
///
/// ## Example
///
/// ```yaml
/// host: 0.0.0.0
/// port: 7878
/// dockerd:
///   host: 127.0.0.1
///   port: 2375
///   admin: admin
///   password: secret
/// harbor:
///   host: harbor.local
///   protocol: https
/// npm_registry:
///   namespace: npm
///   base_image: verdaccio/verdaccio
///   base_image_tag: latest
/// pip_registry:
///   namespace: pip
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the proxy listens on.
    pub host: String,
    /// Port the proxy listens on. Must be above the reserved range.
    pub port: u16,
    /// Container daemon the executor and packer drive.
    pub dockerd: DockerdConfig,
    /// Backing image registry.
    pub harbor: HarborConfig,
    /// npm registry scheduling defaults.
    pub npm_registry: NpmRegistryConfig,
    /// pip registry scheduling defaults.
    pub pip_registry: PipRegistryConfig,
}

/// Container daemon endpoint and registry credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct DockerdConfig {
    /// Host the daemon (and its published container ports) is reachable on.
    pub host: String,
    /// Daemon TCP port. Zero means the local default socket.
    #[serde(default)]
    pub port: u16,
    /// Admin account used to log in to the backing registry before a push.
    #[serde(default)]
    pub admin: String,
    /// Password for the admin account.
    #[serde(default)]
    pub password: String,
}

/// Backing image registry endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HarborConfig {
    /// Registry host, without protocol.
    pub host: String,
    /// `http` or `https`.
    pub protocol: String,
}

/// npm scheduling defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct NpmRegistryConfig {
    /// Namespace (project) in the backing registry for npm images.
    pub namespace: String,
    /// Image launched when no package- or session-specific image applies.
    pub base_image: String,
    /// Tag of the base image.
    pub base_image_tag: String,
}

/// pip scheduling defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct PipRegistryConfig {
    /// Namespace (project) in the backing registry for pip images.
    pub namespace: String,
}

impl Config {
    /// Loads and validates configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|e| Error::ConfigLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Config = serde_yaml::from_slice(&raw).map_err(|e| Error::ConfigLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validates field-level constraints.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::ConfigInvalid {
                field: "host",
                reason: "must not be empty".to_string(),
            });
        }

        if self.port <= 256 {
            return Err(Error::ConfigInvalid {
                field: "port",
                reason: format!("{} is within the reserved range (must be > 256)", self.port),
            });
        }

        if self.dockerd.host.trim().is_empty() {
            return Err(Error::ConfigInvalid {
                field: "dockerd.host",
                reason: "must not be empty".to_string(),
            });
        }

        if self.harbor.host.trim().is_empty() {
            return Err(Error::ConfigInvalid {
                field: "harbor.host",
                reason: "must not be empty".to_string(),
            });
        }

        match self.harbor.protocol.as_str() {
            "http" | "https" => {}
            other => {
                return Err(Error::ConfigInvalid {
                    field: "harbor.protocol",
                    reason: format!("'{}' is not one of http, https", other),
                });
            }
        }

        if self.npm_registry.namespace.trim().is_empty() {
            return Err(Error::ConfigInvalid {
                field: "npm_registry.namespace",
                reason: "must not be empty".to_string(),
            });
        }

        if self.npm_registry.base_image.trim().is_empty() {
            return Err(Error::ConfigInvalid {
                field: "npm_registry.base_image",
                reason: "must not be empty".to_string(),
            });
        }

        if self.npm_registry.base_image_tag.trim().is_empty() {
            return Err(Error::ConfigInvalid {
                field: "npm_registry.base_image_tag",
                reason: "must not be empty".to_string(),
            });
        }

        if self.pip_registry.namespace.trim().is_empty() {
            return Err(Error::ConfigInvalid {
                field: "pip_registry.namespace",
                reason: "must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Daemon endpoint in `tcp://host:port` form, or `None` for the
    /// local default socket.
    pub fn dockerd_endpoint(&self) -> Option<String> {
        if self.dockerd.port > 0 {
            Some(format!("tcp://{}:{}", self.dockerd.host, self.dockerd.port))
        } else {
            None
        }
    }

    /// Base URL of the backing registry REST API.
    pub fn registry_api(&self) -> String {
        format!("{}://{}/api", self.harbor.protocol, self.harbor.host)
    }

    /// Default proxy target for traffic no driver claims.
    pub fn harbor_target(&self) -> String {
        format!("{}://{}", self.harbor.protocol, self.harbor.host)
    }
}
