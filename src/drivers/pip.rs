//! pip schedule driver.

use async_trait::async_trait;
use tracing::warn;

use crate::parser::{RegistryType, RequestMeta, META_COMMAND, META_PACKAGE};
use crate::schedule::{SchedulePolicy, ScheduleDriver};

/// Maps pip request metadata to schedule policies.
///
/// Only `install` is handled: each package maps to a namespaced
/// `pip-project/pypi-<package>` image serving a single-package index.
pub struct PipScheduleDriver {
    registry_namespace: String,
}

impl PipScheduleDriver {
    /// Creates a driver for the configured namespace.
    #[must_use]
    pub fn new(registry_namespace: String) -> Self {
        Self { registry_namespace }
    }
}

#[async_trait]
impl ScheduleDriver for PipScheduleDriver {
    async fn schedule(&self, meta: &RequestMeta) -> Option<SchedulePolicy> {
        if !meta.has_hit || meta.registry_type != RegistryType::Pip {
            return None;
        }

        let command = meta.field(META_COMMAND);
        if command != "install" {
            warn!(command = %command, "unknown command for pip package");
            return None;
        }

        let package = meta.field(META_PACKAGE);
        Some(SchedulePolicy {
            image: format!("pip-project/pypi-{}", package),
            tag: "dev".to_string(),
            bound_ports: vec![80],
            reuse_identity: package.to_string(),
            env_vars: [
                ("PYPI_EXTRA".to_string(), "--disable-fallback".to_string()),
                ("PYPI_ROOT".to_string(), "/pypi".to_string()),
            ]
            .into_iter()
            .collect(),
            namespace: self.registry_namespace.clone(),
            ..Default::default()
        })
    }
}
