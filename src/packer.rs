//! Image packer.
//!
//! Captures a serving container's mutated filesystem as a new image:
//! commit against the backing-registry reference, log in with the
//! configured admin credentials, push, then best-effort removal of the
//! local copy. A local-only variant commits without publishing.

use std::sync::Arc;

use tracing::{info, warn};

use crate::constants::DEFAULT_IMAGE_TAG;
use crate::engine::ContainerEngine;
use crate::error::{Error, Result};

/// Commits and publishes container state.
pub struct Packer {
    engine: Arc<dyn ContainerEngine>,
    /// Backing registry host.
    harbor_host: String,
    /// Registry admin account for push logins.
    admin: String,
    password: String,
}

impl Packer {
    /// Creates a packer pushing to `harbor_host` as `admin`.
    #[must_use]
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        harbor_host: String,
        admin: String,
        password: String,
    ) -> Self {
        Self {
            engine,
            harbor_host,
            admin,
            password,
        }
    }

    /// Commits `base_container` as `<harbor>/<namespace>/<image>:<tag>`
    /// and pushes it to the backing registry.
    ///
    /// The local copy is removed afterwards on a best-effort basis; a
    /// removal failure is logged, not surfaced.
    pub async fn build(
        &self,
        base_container: &str,
        image: &str,
        tag: &str,
        namespace: &str,
    ) -> Result<()> {
        if base_container.is_empty() {
            return Err(Error::InvalidBuildPolicy(
                "empty base container".to_string(),
            ));
        }

        let tag = if tag.is_empty() { DEFAULT_IMAGE_TAG } else { tag };
        let full_name = format!("{}/{}/{}", self.harbor_host, namespace, image);

        self.engine.commit(base_container, &full_name, tag).await?;
        self.engine
            .login(&self.admin, &self.password, &self.harbor_host)
            .await?;

        let backend_image = format!("{}:{}", full_name, tag);
        self.engine.push(&backend_image).await?;
        info!(image = %backend_image, "image pushed to backing registry");

        if let Err(e) = self.engine.remove_image(&backend_image).await {
            warn!(image = %backend_image, "failed to remove local image: {}", e);
        }

        Ok(())
    }

    /// Commits `base_container` as `image:tag` locally, without pushing.
    pub async fn build_local(&self, base_container: &str, image: &str, tag: &str) -> Result<()> {
        if base_container.is_empty() {
            return Err(Error::InvalidBuildPolicy(
                "empty base container".to_string(),
            ));
        }

        let tag = if tag.is_empty() { DEFAULT_IMAGE_TAG } else { tag };
        self.engine.commit(base_container, image, tag).await
    }

    /// Force-removes an image.
    pub async fn rm_image(&self, image: &str) -> Result<()> {
        if image.is_empty() {
            return Err(Error::InvalidBuildPolicy("empty image".to_string()));
        }
        self.engine.remove_image(image).await
    }
}
