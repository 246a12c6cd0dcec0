//! Container executor.
//!
//! Launches a container per schedule policy: allocates host ports, forms
//! the image reference, asks the engine for a detached run, and polls the
//! instance until it answers HTTP on its first published port.
//!
//! The [`Launcher`] trait is the scheduler's seam; tests substitute a
//! fake that skips the engine and the probe.

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::constants::{
    HOST_PORT_RANGE, READINESS_POLL_INTERVAL, READINESS_TIMEOUT, READINESS_WARMUP_GRACE,
};
use crate::engine::{ContainerEngine, PortBinding, RunOptions};
use crate::error::{Error, Result};
use crate::schedule::SchedulePolicy;

/// Location of a launched instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// `host:port` the instance serves on.
    pub target: String,
    /// Engine-assigned container ID.
    pub runtime_id: String,
}

/// Launches and destroys runtime instances.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Runs a container per policy and waits for readiness.
    async fn exec(&self, policy: &SchedulePolicy) -> Result<Environment>;

    /// Force-removes a container.
    async fn destroy(&self, runtime_id: &str) -> Result<()>;
}

/// Engine-backed launcher with HTTP readiness probing.
pub struct Executor {
    engine: Arc<dyn ContainerEngine>,
    /// Host where the engine publishes container ports.
    docker_host: String,
    /// Backing registry host for non-hub pulls.
    harbor_host: String,
    port_range: Range<u16>,
    probe_client: reqwest::Client,
}

impl Executor {
    /// Creates an executor with the default host-port range.
    #[must_use]
    pub fn new(engine: Arc<dyn ContainerEngine>, docker_host: String, harbor_host: String) -> Self {
        Self::with_port_range(engine, docker_host, harbor_host, HOST_PORT_RANGE)
    }

    /// Creates an executor allocating host ports from a custom range.
    #[must_use]
    pub fn with_port_range(
        engine: Arc<dyn ContainerEngine>,
        docker_host: String,
        harbor_host: String,
        port_range: Range<u16>,
    ) -> Self {
        Self {
            engine,
            docker_host,
            harbor_host,
            port_range,
            probe_client: reqwest::Client::builder()
                .timeout(READINESS_POLL_INTERVAL)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Picks a host port uniformly at random from the configured range.
    ///
    /// No collision check: a bind failure surfaces as an engine run error.
    fn pick_host_port(&self) -> u16 {
        rand::thread_rng().gen_range(self.port_range.clone())
    }

    /// Polls the probe port until it answers 200, then waits out the
    /// warm-up grace.
    async fn await_readiness(&self, probe_port: u16) -> Result<()> {
        let url = format!("http://{}:{}/", self.docker_host, probe_port);

        let probe = async {
            loop {
                tokio::time::sleep(READINESS_POLL_INTERVAL).await;
                match self.probe_client.get(&url).send().await {
                    Ok(res) => {
                        debug!(url = %url, status = %res.status(), "readiness probe");
                        if res.status() == reqwest::StatusCode::OK {
                            return;
                        }
                    }
                    Err(e) => {
                        debug!(url = %url, "readiness probe failed: {}", e);
                    }
                }
            }
        };

        tokio::time::timeout(READINESS_TIMEOUT, probe)
            .await
            .map_err(|_| Error::ReadinessTimeout {
                target: format!("{}:{}", self.docker_host, probe_port),
                duration: READINESS_TIMEOUT,
            })?;

        tokio::time::sleep(READINESS_WARMUP_GRACE).await;
        Ok(())
    }
}

#[async_trait]
impl Launcher for Executor {
    async fn exec(&self, policy: &SchedulePolicy) -> Result<Environment> {
        if policy.image.is_empty() {
            return Err(Error::InvalidPolicy("empty image".to_string()));
        }
        if policy.bound_ports.is_empty() {
            return Err(Error::InvalidPolicy("no bound ports".to_string()));
        }

        let tag = policy.launch_tag();

        // The first allocated host port is the readiness probe target.
        let mut bindings = Vec::with_capacity(policy.bound_ports.len());
        for &container_port in &policy.bound_ports {
            bindings.push(PortBinding {
                host: self.pick_host_port(),
                container: container_port,
            });
        }
        let probe_port = bindings[0].host;

        let image = if policy.use_hub {
            format!("{}:{}", policy.image, tag)
        } else {
            format!(
                "{}/{}/{}:{}",
                self.harbor_host, policy.namespace, policy.image, tag
            )
        };

        let runtime_id = self
            .engine
            .run(RunOptions {
                image: image.clone(),
                interactive: true,
                detach: true,
                port_bindings: bindings,
                env: policy.env_vars.clone(),
                ..Default::default()
            })
            .await?;

        info!(image = %image, runtime = %runtime_id, port = probe_port, "container launched");

        if let Err(e) = self.await_readiness(probe_port).await {
            // The instance never becomes pooled, so nothing else would
            // ever reap it; remove it here instead of leaking it.
            if let Err(destroy_err) = self.engine.remove_container(&runtime_id).await {
                warn!(
                    runtime = %runtime_id,
                    "failed to remove unready container: {}", destroy_err
                );
            }
            return Err(e);
        }

        Ok(Environment {
            target: format!("{}:{}", self.docker_host, probe_port),
            runtime_id,
        })
    }

    async fn destroy(&self, runtime_id: &str) -> Result<()> {
        if runtime_id.is_empty() {
            return Err(Error::InvalidPolicy("empty runtime ID".to_string()));
        }
        self.engine.remove_container(runtime_id).await
    }
}
