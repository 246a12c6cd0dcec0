//! npm schedule driver.

use async_trait::async_trait;
use tracing::info;

use crate::parser::{
    RegistryType, RequestMeta, META_BASIC_AUTH, META_COMMAND, META_EXTRA, META_PATH, META_SESSION,
};
use crate::schedule::{BuildPolicy, SchedulePolicy, ScheduleDriver};

use super::check_image_existing;

/// Maps npm request metadata to schedule policies.
///
/// The default policy launches the configured base registry image from
/// the public hub and mirrors it in the rebuild plan, so any
/// state-changing request recommits the base image. Specific commands
/// refine that:
///
/// - `view`/`install` prefer a previously published package image from
///   the backing registry and never rebuild (read-only path).
/// - `login`/`adduser` on the credential-establishment path tag the
///   rebuild with the client's auth fingerprint and remember the result
///   as a session image.
/// - `publish` reuses a published package image when one exists,
///   otherwise falls back to the client's session image, and always
///   pushes the result.
pub struct NpmScheduleDriver {
    registry_api: String,
    registry_namespace: String,
    base_image: String,
    base_image_tag: String,
    http_client: reqwest::Client,
}

impl NpmScheduleDriver {
    /// Creates a driver querying `registry_api` under `registry_namespace`.
    #[must_use]
    pub fn new(
        registry_api: String,
        registry_namespace: String,
        base_image: String,
        base_image_tag: String,
    ) -> Self {
        Self {
            registry_api,
            registry_namespace,
            base_image,
            base_image_tag,
            http_client: super::registry_client(),
        }
    }

    async fn image_exists(&self, image: &str, tag: &str) -> bool {
        check_image_existing(
            &self.http_client,
            &self.registry_api,
            &self.registry_namespace,
            image,
            tag,
        )
        .await
    }
}

#[async_trait]
impl ScheduleDriver for NpmScheduleDriver {
    async fn schedule(&self, meta: &RequestMeta) -> Option<SchedulePolicy> {
        if !meta.has_hit || meta.metadata.is_empty() || meta.registry_type != RegistryType::Npm {
            return None;
        }

        let mut policy = SchedulePolicy {
            image: self.base_image.clone(),
            tag: self.base_image_tag.clone(),
            use_hub: true,
            bound_ports: vec![80],
            namespace: self.registry_namespace.clone(),
            rebuild: Some(BuildPolicy {
                image: self.base_image.clone(),
                tag: self.base_image_tag.clone(),
                namespace: self.registry_namespace.clone(),
                ..Default::default()
            }),
            ..Default::default()
        };

        let session = meta.field(META_SESSION);
        if !session.is_empty() {
            policy.reuse_identity = session.to_string();
        }

        let request_path = meta.field(META_PATH);
        let command = meta.field(META_COMMAND);

        if command == "view" || command == "install" {
            let repo = request_path.strip_prefix('/').unwrap_or(request_path);
            let extra = meta.field(META_EXTRA);
            let tag = extra
                .strip_prefix(&format!("{}@", repo))
                .unwrap_or(extra)
                .trim();
            if !repo.is_empty() && !tag.is_empty() && self.image_exists(repo, tag).await {
                policy.image = repo.to_string();
                policy.tag = tag.to_string();
                policy.use_hub = false;
            }
            // Read-only path: nothing to capture.
            policy.rebuild = None;
        }

        if command == "login" || command == "adduser" || command == "add-user" {
            if request_path.contains("org.couchdb.user:") && !request_path.contains("/-rev/") {
                // Credential establishment: tag the capture with the auth
                // fingerprint and remember it for session reuse.
                if let Some(rebuild) = policy.rebuild.as_mut() {
                    rebuild.tag = meta.field(META_BASIC_AUTH).to_string();
                    rebuild.need_store = true;
                }
            }
        }

        if command == "publish" {
            let repo = request_path.strip_prefix('/').unwrap_or(request_path);
            let tag = meta.field(META_EXTRA);
            info!(package = %repo, tag = %tag, "npm publish");
            if self.image_exists(repo, tag).await {
                policy.image = repo.to_string();
                policy.tag = tag.to_string();
                policy.use_hub = false;
            } else {
                // No published image yet: the executor may launch a stored
                // session image for this user instead of the base.
                policy.session_tag = Some(meta.field(META_BASIC_AUTH).to_string());
            }
            if let Some(rebuild) = policy.rebuild.as_mut() {
                rebuild.image = repo.to_string();
                rebuild.tag = tag.to_string();
                rebuild.need_push = true;
            }
        }

        Some(policy)
    }
}
