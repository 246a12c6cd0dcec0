//! Runtime pool.
//!
//! In-memory registry of live and recently-destroyed container instances,
//! keyed by a composite identity `"<registry-type>:<identity>"` where the
//! identity is either a request-derived reuse key (npm session, pip
//! package) or, failing that, the engine-assigned container ID.
//!
//! ## Status Machine
//!
//! ```text
//!   (nonexistent) ──put/use──▶ Serving ──set_idle──▶ Idle ──sweep──▶ Destroyed
//! ```
//!
//! No other transitions exist. Destroyed runtimes leave the live map and
//! enter a bounded ring (capacity 100) whose oldest entry is overwritten
//! on overflow. Serving entries are never swept.
//!
//! ## Locking
//!
//! One reader-writer lock guards both backing containers. Lookups take a
//! read lease; put/use/set-idle/garbage take a write lease (`use`
//! refreshes the active time, so it writes). Callers receive clones,
//! never references into the pool, and perform engine-side destruction
//! without holding the lease.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::constants::{DESTROYED_RING_CAPACITY, IDLE_THRESHOLD_SECS};
use crate::error::{Error, Result};
use crate::parser::RegistryType;

// =============================================================================
// Runtime
// =============================================================================

/// Lifecycle status of a pooled instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    /// Actively serving a request (or recently reused).
    Serving,
    /// Released by the response handler; eligible for sweeping once stale.
    Idle,
    /// Reaped by the sweeper; retained only in the destroyed ring.
    Destroyed,
}

impl std::fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serving => write!(f, "serving"),
            Self::Idle => write!(f, "idle"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// A live or recently-destroyed container instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runtime {
    /// Engine-assigned container ID.
    pub id: String,
    /// `host:port` where the container is reachable on the host.
    pub target: String,
    /// Unix seconds of last use.
    pub active_time: i64,
    /// Lifecycle status.
    pub status: RuntimeStatus,
    /// `name:tag` that was launched.
    pub image: String,
}

impl Runtime {
    /// Creates a serving runtime stamped with the current time.
    #[must_use]
    pub fn serving(id: String, target: String, image: String) -> Self {
        Self {
            id,
            target,
            active_time: chrono::Utc::now().timestamp(),
            status: RuntimeStatus::Serving,
            image,
        }
    }
}

/// Builds the composite pool key for a registry kind and identity.
#[must_use]
pub fn pool_key(registry: RegistryType, identity: &str) -> String {
    format!("{}:{}", registry, identity)
}

// =============================================================================
// Runtime Pool
// =============================================================================

struct PoolInner {
    live: HashMap<String, Runtime>,
    destroyed: VecDeque<Runtime>,
}

/// Registry of live instances plus a bounded ring of destroyed ones.
pub struct RuntimePool {
    inner: RwLock<PoolInner>,
    idle_threshold: i64,
}

impl RuntimePool {
    /// Creates a pool with the default idle threshold.
    #[must_use]
    pub fn new() -> Self {
        Self::with_idle_threshold(IDLE_THRESHOLD_SECS)
    }

    /// Creates a pool whose sweeper eligibility uses a custom threshold.
    #[must_use]
    pub fn with_idle_threshold(idle_threshold: i64) -> Self {
        Self {
            inner: RwLock::new(PoolInner {
                live: HashMap::new(),
                destroyed: VecDeque::with_capacity(DESTROYED_RING_CAPACITY),
            }),
            idle_threshold,
        }
    }

    /// Inserts a fresh runtime under `key`.
    ///
    /// The entry enters the pool serving with a refreshed active time.
    /// Fails with [`Error::RuntimeExists`] if a live entry already holds
    /// the key; the caller decides whether that is fatal (the scheduler
    /// logs and continues, accepting a transient orphan).
    pub fn put(&self, key: &str, mut runtime: Runtime) -> Result<()> {
        if key.is_empty() {
            return Err(Error::Internal("empty pool key".to_string()));
        }

        let mut inner = self.write()?;
        if inner.live.contains_key(key) {
            return Err(Error::RuntimeExists {
                key: key.to_string(),
            });
        }

        runtime.status = RuntimeStatus::Serving;
        runtime.active_time = chrono::Utc::now().timestamp();
        inner.live.insert(key.to_string(), runtime);
        Ok(())
    }

    /// Returns whether a live entry holds `key`.
    #[must_use]
    pub fn index(&self, key: &str) -> bool {
        self.inner
            .read()
            .map(|inner| inner.live.contains_key(key))
            .unwrap_or(false)
    }

    /// Marks the entry at `key` as serving again and returns a snapshot.
    ///
    /// Refreshes the active time; this is the reuse fast path.
    pub fn use_runtime(&self, key: &str) -> Result<Runtime> {
        if key.is_empty() {
            return Err(Error::Internal("empty pool key".to_string()));
        }

        let mut inner = self.write()?;
        let runtime = inner
            .live
            .get_mut(key)
            .ok_or_else(|| Error::RuntimeNotFound {
                key: key.to_string(),
            })?;

        runtime.status = RuntimeStatus::Serving;
        runtime.active_time = chrono::Utc::now().timestamp();
        Ok(runtime.clone())
    }

    /// Flips the entry at `key` to idle with a fresh active time.
    ///
    /// The entry becomes sweeper-eligible once the idle threshold elapses
    /// with no further use.
    pub fn set_idle(&self, key: &str) -> Result<()> {
        let mut inner = self.write()?;
        let runtime = inner
            .live
            .get_mut(key)
            .ok_or_else(|| Error::RuntimeNotFound {
                key: key.to_string(),
            })?;

        runtime.status = RuntimeStatus::Idle;
        runtime.active_time = chrono::Utc::now().timestamp();
        Ok(())
    }

    /// Atomically moves every stale idle entry to the destroyed ring and
    /// returns snapshots for engine-side destruction.
    ///
    /// An entry qualifies when its status is idle and its active time is
    /// at least the idle threshold in the past. Serving entries are never
    /// collected. Callers destroy the returned containers without holding
    /// the lease.
    pub fn garbages(&self) -> Result<Vec<Runtime>> {
        let now = chrono::Utc::now().timestamp();
        let mut inner = self.write()?;

        let expired: Vec<String> = inner
            .live
            .iter()
            .filter(|(_, r)| {
                r.status == RuntimeStatus::Idle && now >= r.active_time + self.idle_threshold
            })
            .map(|(k, _)| k.clone())
            .collect();

        let mut collected = Vec::with_capacity(expired.len());
        for key in expired {
            if let Some(mut runtime) = inner.live.remove(&key) {
                runtime.status = RuntimeStatus::Destroyed;
                collected.push(runtime.clone());
                if inner.destroyed.len() >= DESTROYED_RING_CAPACITY {
                    inner.destroyed.pop_front();
                }
                inner.destroyed.push_back(runtime);
            }
        }

        Ok(collected)
    }

    /// Snapshot of every live runtime followed by every destroyed runtime
    /// in the order stored.
    pub fn get_all(&self) -> Result<Vec<Runtime>> {
        let inner = self.read()?;
        let mut all: Vec<Runtime> = inner.live.values().cloned().collect();
        all.extend(inner.destroyed.iter().cloned());
        Ok(all)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, PoolInner>> {
        self.inner
            .read()
            .map_err(|e| Error::Internal(format!("pool lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, PoolInner>> {
        self.inner
            .write()
            .map_err(|e| Error::Internal(format!("pool lock poisoned: {}", e)))
    }
}

impl Default for RuntimePool {
    fn default() -> Self {
        Self::new()
    }
}
