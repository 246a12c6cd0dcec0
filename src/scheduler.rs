//! Runtime scheduler.
//!
//! Orchestrates the pool, image store, executor, and packer: resolves a
//! schedule policy for each classified request, reuses a live instance
//! when one exists for the policy's identity, otherwise launches and
//! pools a new one, and runs the background sweepers that idle-evict
//! runtimes and expire cached session images.
//!
//! ## Reuse
//!
//! Live instances are keyed `"<registry-type>:<identity>"`. The fast path
//! refreshes and returns an existing entry. Concurrent cold requests for
//! one identity may both launch; the later pool insertion fails and is
//! logged — that caller still serves from its fresh container, which
//! remains a transient orphan until the sweeper can reach it.
//!
//! ## Shutdown
//!
//! Each sweeper listens on its tick source, the process-wide shutdown
//! signal, and a private exit channel. [`Scheduler::stop`] sends one exit
//! token per sweeper and awaits one acknowledgement per sweeper, so no
//! background work outlives it even when the shutdown signal has not yet
//! fired.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::constants::{FREE_RUNTIME_DELAY, SWEEP_INTERVAL};
use crate::drivers::{NpmScheduleDriver, PipScheduleDriver};
use crate::error::{Error, Result};
use crate::executor::Launcher;
use crate::image_store::ImageStore;
use crate::packer::Packer;
use crate::parser::{RegistryType, RequestMeta};
use crate::pool::{pool_key, Runtime, RuntimePool};
use crate::schedule::{BuildPolicy, ScheduleDriver};

// =============================================================================
// Serve Environment
// =============================================================================

/// Result of scheduling one request.
#[derive(Debug, Clone)]
pub struct ServeEnvironment {
    /// `host:port` the request should be proxied to.
    pub target: String,
    /// Capture instruction for the response path, if any.
    pub rebuild: Option<BuildPolicy>,
    /// Pool key for response-side idle marking.
    pub instance_key: String,
}

// =============================================================================
// Scheduler
// =============================================================================

struct SweeperControl {
    exits: Vec<oneshot::Sender<()>>,
    acks: Vec<oneshot::Receiver<()>>,
}

/// The on-demand runtime scheduler.
pub struct Scheduler {
    pool: RuntimePool,
    images: ImageStore,
    launcher: Arc<dyn Launcher>,
    packer: Packer,
    drivers: HashMap<RegistryType, Box<dyn ScheduleDriver>>,
    sweepers: Mutex<Option<SweeperControl>>,
}

impl Scheduler {
    /// Creates a scheduler with the standard npm and pip drivers.
    #[must_use]
    pub fn new(config: &Config, launcher: Arc<dyn Launcher>, packer: Packer) -> Self {
        let registry_api = config.registry_api();

        let mut drivers: HashMap<RegistryType, Box<dyn ScheduleDriver>> = HashMap::new();
        drivers.insert(
            RegistryType::Npm,
            Box::new(NpmScheduleDriver::new(
                registry_api,
                config.npm_registry.namespace.clone(),
                config.npm_registry.base_image.clone(),
                config.npm_registry.base_image_tag.clone(),
            )),
        );
        drivers.insert(
            RegistryType::Pip,
            Box::new(PipScheduleDriver::new(config.pip_registry.namespace.clone())),
        );

        Self::with_drivers(launcher, packer, drivers)
    }

    /// Creates a scheduler with an explicit driver set.
    #[must_use]
    pub fn with_drivers(
        launcher: Arc<dyn Launcher>,
        packer: Packer,
        drivers: HashMap<RegistryType, Box<dyn ScheduleDriver>>,
    ) -> Self {
        Self {
            pool: RuntimePool::new(),
            images: ImageStore::new(),
            launcher,
            packer,
            drivers,
            sweepers: Mutex::new(None),
        }
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Resolves where `meta`'s request should be served.
    ///
    /// Reuses a live instance for the policy's identity when one exists;
    /// otherwise prefers a stored session image over the base tag,
    /// launches a fresh container, and records it in the pool.
    pub async fn schedule(&self, meta: &RequestMeta) -> Result<ServeEnvironment> {
        let driver = self
            .drivers
            .get(&meta.registry_type)
            .ok_or(Error::UnsupportedRegistry(meta.registry_type))?;

        let mut policy = driver.schedule(meta).await.ok_or(Error::DriverDeclined {
            registry: meta.registry_type,
        })?;

        // Fast path: an equivalent instance is already live.
        if !policy.reuse_identity.is_empty() {
            let key = pool_key(meta.registry_type, &policy.reuse_identity);
            if self.pool.index(&key) {
                let runtime = self.pool.use_runtime(&key)?;
                info!(runtime = %runtime.id, target = %runtime.target, "reuse instance");
                if let Some(rebuild) = policy.rebuild.as_mut() {
                    rebuild.base_container = runtime.id.clone();
                }
                return Ok(ServeEnvironment {
                    target: runtime.target,
                    rebuild: policy.rebuild,
                    instance_key: key,
                });
            }
        }

        // Prefer a stored session image for this auth fingerprint.
        if let Some(session_tag) = policy.session_tag.clone() {
            if !session_tag.is_empty() {
                let key = format!("{}:{}", policy.image, session_tag);
                if self.images.get(&key).is_some() {
                    debug!(image = %key, "launching stored session image");
                    policy.tag = session_tag;
                }
            }
        }

        let env = self.launcher.exec(&policy).await?;
        info!(runtime = %env.runtime_id, "start new service instance");

        let identity = if policy.reuse_identity.is_empty() {
            // No reuse identity: keyed by container ID just so the
            // sweeper can reach it.
            env.runtime_id.clone()
        } else {
            policy.reuse_identity.clone()
        };
        let key = pool_key(meta.registry_type, &identity);

        let runtime = Runtime::serving(
            env.runtime_id.clone(),
            env.target.clone(),
            format!("{}:{}", policy.image, policy.launch_tag()),
        );
        if let Err(e) = self.pool.put(&key, runtime) {
            // Concurrent request for the same identity won the insert;
            // this caller still serves from its fresh container.
            warn!(key = %key, "pool error: {}", e);
        }

        if let Some(rebuild) = policy.rebuild.as_mut() {
            rebuild.base_container = env.runtime_id.clone();
        }

        Ok(ServeEnvironment {
            target: env.target,
            rebuild: policy.rebuild,
            instance_key: key,
        })
    }

    /// Executes a rebuild plan: commit the base container and, when the
    /// plan asks for it, push the result to the backing registry.
    pub async fn rebuild(&self, policy: &BuildPolicy) -> Result<()> {
        if policy.image.is_empty() || policy.tag.is_empty() {
            return Err(Error::InvalidBuildPolicy(
                "target image or tag is invalid".to_string(),
            ));
        }
        if policy.base_container.is_empty() {
            return Err(Error::InvalidBuildPolicy(
                "no base container for build".to_string(),
            ));
        }

        if policy.need_push {
            self.packer
                .build(
                    &policy.base_container,
                    &policy.image,
                    &policy.tag,
                    &policy.namespace,
                )
                .await
        } else {
            self.packer
                .build_local(&policy.base_container, &policy.image, &policy.tag)
                .await
        }
    }

    /// Marks the pool entry at `key` idle after a short delay.
    ///
    /// The delay absorbs close-coupled follow-up requests from the same
    /// client; it never blocks the caller.
    pub fn free_runtime(self: &Arc<Self>, key: &str) {
        let scheduler = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(FREE_RUNTIME_DELAY).await;
            if let Err(e) = scheduler.pool.set_idle(&key) {
                debug!(key = %key, "free runtime skipped: {}", e);
            }
        });
    }

    /// Records a committed session image for future reuse.
    pub fn store_image(&self, image: &str, tag: &str) {
        self.images.put(image, tag);
    }

    /// Snapshot of live and destroyed runtimes for the management API.
    pub fn get_runtimes(&self) -> Result<Vec<Runtime>> {
        self.pool.get_all()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts the runtime and image sweepers.
    ///
    /// Each terminates at its next wake after `shutdown` fires or its
    /// private exit token arrives, acknowledging on a completion channel.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) {
        let mut control = match self.sweepers.lock() {
            Ok(guard) => guard,
            Err(e) => {
                error!("sweeper state poisoned: {}", e);
                return;
            }
        };
        if control.is_some() {
            warn!("scheduler already started");
            return;
        }

        let (runtime_exit_tx, runtime_exit_rx) = oneshot::channel();
        let (runtime_ack_tx, runtime_ack_rx) = oneshot::channel();
        let (image_exit_tx, image_exit_rx) = oneshot::channel();
        let (image_ack_tx, image_ack_rx) = oneshot::channel();

        tokio::spawn(Self::runtime_sweeper(
            Arc::clone(self),
            shutdown.clone(),
            runtime_exit_rx,
            runtime_ack_tx,
        ));
        tokio::spawn(Self::image_sweeper(
            Arc::clone(self),
            shutdown,
            image_exit_rx,
            image_ack_tx,
        ));

        *control = Some(SweeperControl {
            exits: vec![runtime_exit_tx, image_exit_tx],
            acks: vec![runtime_ack_rx, image_ack_rx],
        });

        info!("scheduler started");
    }

    /// Stops both sweepers and waits for their acknowledgements.
    pub async fn stop(&self) {
        let control = match self.sweepers.lock() {
            Ok(mut guard) => guard.take(),
            Err(e) => {
                error!("sweeper state poisoned: {}", e);
                None
            }
        };

        let Some(control) = control else {
            return;
        };

        for exit in control.exits {
            let _ = exit.send(());
        }
        for ack in control.acks {
            if ack.await.is_err() {
                warn!("sweeper exited without acknowledgement");
            }
        }

        info!("scheduler stopped");
    }

    /// Reaps idle runtimes that outlived the idle threshold.
    async fn runtime_sweeper(
        scheduler: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        mut exit: oneshot::Receiver<()>,
        ack: oneshot::Sender<()>,
    ) {
        let start = tokio::time::Instant::now() + SWEEP_INTERVAL;
        let mut tick = tokio::time::interval_at(start, SWEEP_INTERVAL);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let garbages = match scheduler.pool.garbages() {
                        Ok(garbages) => garbages,
                        Err(e) => {
                            error!("runtime sweep failed: {}", e);
                            continue;
                        }
                    };
                    for runtime in garbages {
                        match scheduler.launcher.destroy(&runtime.id).await {
                            Ok(()) => info!(runtime = %runtime.id, "destroyed idle instance"),
                            Err(e) => error!(runtime = %runtime.id, "garbage collection error: {}", e),
                        }
                    }
                }
                _ = shutdown.changed() => break,
                _ = &mut exit => break,
            }
        }

        let _ = ack.send(());
        debug!("runtime sweeper stopped");
    }

    /// Evicts session images that outlived the expiry threshold.
    async fn image_sweeper(
        scheduler: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        mut exit: oneshot::Receiver<()>,
        ack: oneshot::Sender<()>,
    ) {
        let start = tokio::time::Instant::now() + SWEEP_INTERVAL;
        let mut tick = tokio::time::interval_at(start, SWEEP_INTERVAL);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let outdated = match scheduler.images.garbage() {
                        Ok(outdated) => outdated,
                        Err(e) => {
                            error!("image sweep failed: {}", e);
                            continue;
                        }
                    };
                    for image in outdated {
                        let image_ref = format!("{}:{}", image.name, image.tag);
                        match scheduler.packer.rm_image(&image_ref).await {
                            Ok(()) => info!(image = %image_ref, "removed expired session image"),
                            Err(e) => warn!(image = %image_ref, "failed to remove expired image: {}", e),
                        }
                    }
                }
                _ = shutdown.changed() => break,
                _ = &mut exit => break,
            }
        }

        let _ = ack.send(());
        debug!("image sweeper stopped");
    }
}
