//! Container engine adapter.
//!
//! A thin command surface over a local `docker`-compatible daemon, driven
//! through its CLI. The daemon may live behind a TCP endpoint (`-H
//! tcp://host:port`) or the default local socket.
//!
//! The [`ContainerEngine`] trait is the seam the executor, packer, and
//! scheduler tests hook into; [`DockerCli`] is the production
//! implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Engine binary invoked for every operation.
const ENGINE_CMD: &str = "docker";

// =============================================================================
// Run Options
// =============================================================================

/// A single `host:container` port publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    /// Port bound on the host.
    pub host: u16,
    /// Port inside the container.
    pub container: u16,
}

impl PortBinding {
    /// Returns the CLI argument form: `host:container`.
    #[must_use]
    pub fn as_arg(self) -> String {
        format!("{}:{}", self.host, self.container)
    }
}

/// Options for launching a container.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Image reference to run.
    pub image: String,
    /// Container name. Generated when empty.
    pub name: Option<String>,
    /// Optional command override.
    pub command: Option<String>,
    /// Allocate an interactive TTY.
    pub interactive: bool,
    /// Run detached.
    pub detach: bool,
    /// Host-to-container port publications.
    pub port_bindings: Vec<PortBinding>,
    /// Environment variables injected into the container.
    pub env: HashMap<String, String>,
}

// =============================================================================
// ContainerEngine Trait
// =============================================================================

/// Command surface of a container daemon.
///
/// Every method maps to exactly one CLI subcommand. Implementations must
/// be safe to share across tasks; the scheduler, executor, and packer all
/// hold the same engine handle.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Checks the daemon is reachable (`version`).
    async fn version(&self) -> Result<()>;

    /// Pulls an image.
    async fn pull(&self, image: &str) -> Result<()>;

    /// Tags `source` as `target`.
    async fn tag(&self, source: &str, target: &str) -> Result<()>;

    /// Pushes an image.
    async fn push(&self, image: &str) -> Result<()>;

    /// Logs in to a registry.
    async fn login(&self, username: &str, password: &str, registry: &str) -> Result<()>;

    /// Runs a container, returning the engine-assigned container ID.
    async fn run(&self, opts: RunOptions) -> Result<String>;

    /// Force-removes a container.
    async fn remove_container(&self, container: &str) -> Result<()>;

    /// Force-removes an image.
    async fn remove_image(&self, image: &str) -> Result<()>;

    /// Commits a container's filesystem as `image:tag`.
    async fn commit(&self, container: &str, image: &str, tag: &str) -> Result<()>;
}

// =============================================================================
// Docker CLI Implementation
// =============================================================================

/// Drives a `docker`-compatible CLI.
pub struct DockerCli {
    /// Daemon endpoint passed via `-H`, e.g. `tcp://127.0.0.1:2375`.
    /// `None` uses the CLI's default socket.
    endpoint: Option<String>,
}

impl DockerCli {
    /// Creates a client for the given daemon endpoint.
    pub fn new(endpoint: Option<String>) -> Self {
        Self { endpoint }
    }

    /// Prefixes arguments with the `-H <endpoint>` selector when configured.
    fn arguments(&self, args: Vec<String>) -> Vec<String> {
        match &self.endpoint {
            Some(endpoint) => {
                let mut full = vec!["-H".to_string(), endpoint.clone()];
                full.extend(args);
                full
            }
            None => args,
        }
    }

    /// Runs a subcommand, logging stdout/stderr, and returns trimmed stdout.
    async fn run_command(&self, args: Vec<String>) -> Result<String> {
        let subcommand = args.first().cloned().unwrap_or_default();
        let args = self.arguments(args);
        debug!(command = ENGINE_CMD, ?args, "engine command");

        let output = Command::new(ENGINE_CMD)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::EngineSpawn {
                command: subcommand.clone(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.is_empty() {
            debug!(command = %subcommand, "engine stdout: {}", stdout.trim_end());
        }
        if !stderr.is_empty() {
            debug!(command = %subcommand, "engine stderr: {}", stderr.trim_end());
        }

        if !output.status.success() {
            let reason = if stderr.trim().is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr.trim().to_string()
            };
            return Err(Error::EngineCommand {
                command: subcommand,
                reason,
            });
        }

        Ok(stdout.trim_end_matches('\n').to_string())
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn version(&self) -> Result<()> {
        self.run_command(vec!["version".to_string()]).await?;
        Ok(())
    }

    async fn pull(&self, image: &str) -> Result<()> {
        if image.trim().is_empty() {
            return Err(Error::InvalidPolicy("empty image".to_string()));
        }
        self.run_command(vec!["pull".to_string(), image.to_string()])
            .await?;
        Ok(())
    }

    async fn tag(&self, source: &str, target: &str) -> Result<()> {
        if source.trim().is_empty() || target.trim().is_empty() {
            return Err(Error::InvalidPolicy("empty images".to_string()));
        }
        self.run_command(vec![
            "tag".to_string(),
            source.to_string(),
            target.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn push(&self, image: &str) -> Result<()> {
        if image.trim().is_empty() {
            return Err(Error::InvalidPolicy("empty image".to_string()));
        }
        self.run_command(vec!["push".to_string(), image.to_string()])
            .await?;
        Ok(())
    }

    async fn login(&self, username: &str, password: &str, registry: &str) -> Result<()> {
        if username.trim().is_empty() || password.trim().is_empty() {
            return Err(Error::InvalidPolicy("invalid credential".to_string()));
        }
        self.run_command(vec![
            "login".to_string(),
            "-u".to_string(),
            username.to_string(),
            "-p".to_string(),
            password.to_string(),
            registry.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn run(&self, opts: RunOptions) -> Result<String> {
        if opts.image.trim().is_empty() {
            return Err(Error::InvalidPolicy(
                "image must be specified".to_string(),
            ));
        }

        let args = run_args(&opts);
        let container_id = self.run_command(args).await?;
        if container_id.is_empty() {
            warn!(image = %opts.image, "engine returned no container id");
        }
        Ok(container_id)
    }

    async fn remove_container(&self, container: &str) -> Result<()> {
        if container.trim().is_empty() {
            return Err(Error::InvalidPolicy("empty container".to_string()));
        }
        self.run_command(vec![
            "rm".to_string(),
            "-f".to_string(),
            container.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        if image.trim().is_empty() {
            return Err(Error::InvalidPolicy("empty image name".to_string()));
        }
        self.run_command(vec![
            "rmi".to_string(),
            "-f".to_string(),
            image.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn commit(&self, container: &str, image: &str, tag: &str) -> Result<()> {
        if container.trim().is_empty() {
            return Err(Error::InvalidPolicy("empty container".to_string()));
        }
        if image.is_empty() {
            return Err(Error::InvalidPolicy("empty image name".to_string()));
        }

        let tag = if tag.is_empty() {
            crate::constants::DEFAULT_IMAGE_TAG
        } else {
            tag
        };
        self.run_command(vec![
            "commit".to_string(),
            container.to_string(),
            format!("{}:{}", image, tag),
        ])
        .await?;
        Ok(())
    }
}

/// Assembles the `run` argument vector for the given options.
///
/// Environment variables are emitted in sorted key order so the produced
/// command line is deterministic.
fn run_args(opts: &RunOptions) -> Vec<String> {
    let name = match &opts.name {
        Some(name) if !name.trim().is_empty() => name.clone(),
        _ => format!("wharfgate-{}", uuid::Uuid::now_v7()),
    };

    let mut args = vec!["run".to_string(), "--name".to_string(), name];

    if opts.interactive {
        args.push("-it".to_string());
    }

    for binding in &opts.port_bindings {
        args.push("-p".to_string());
        args.push(binding.as_arg());
    }

    if opts.detach {
        args.push("-d".to_string());
    }

    let mut env: Vec<_> = opts.env.iter().collect();
    env.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push(opts.image.clone());
    if let Some(command) = &opts.command {
        if !command.trim().is_empty() {
            args.push(command.clone());
        }
    }

    args
}
