//! Scheduling policy types.
//!
//! A [`SchedulePolicy`] is the per-request decision a driver produces:
//! which image and tag to launch, where to pull it from, which identity
//! may reuse a live instance, and — for state-changing requests — a
//! [`BuildPolicy`] describing how to capture the container afterwards.
//!
//! The build policy must survive the proxy's request→response round-trip
//! without a side table, so it serializes to base64(JSON) and rides a
//! request header.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_IMAGE_TAG;
use crate::error::{Error, Result};
use crate::parser::RequestMeta;

// =============================================================================
// Schedule Policy
// =============================================================================

/// The decision: which container image and configuration serves a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulePolicy {
    /// Image to launch.
    pub image: String,
    /// Tag to launch. Empty means `latest`.
    pub tag: String,
    /// Optional secondary tag for auth-scoped session reuse. When the
    /// image store holds `image:session_tag`, the scheduler launches that
    /// instead of the base tag.
    pub session_tag: Option<String>,
    /// Pull from the public hub instead of the backing registry namespace.
    pub use_hub: bool,
    /// Identity for instance reuse. Empty means always create.
    pub reuse_identity: String,
    /// Container-internal ports to publish; the first one is probed for
    /// readiness.
    pub bound_ports: Vec<u16>,
    /// Environment for the launched container.
    pub env_vars: std::collections::HashMap<String, String>,
    /// Backing-registry namespace for pulls and rebuild pushes.
    pub namespace: String,
    /// Post-response capture instruction, if any.
    pub rebuild: Option<BuildPolicy>,
}

impl SchedulePolicy {
    /// Tag actually launched: the policy tag, defaulting to `latest`.
    #[must_use]
    pub fn launch_tag(&self) -> &str {
        if self.tag.is_empty() {
            DEFAULT_IMAGE_TAG
        } else {
            &self.tag
        }
    }
}

// =============================================================================
// Build Policy
// =============================================================================

/// The post-response action: commit the serving container and publish it.
///
/// Round-trips through the `registry-factory` header as base64(JSON).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPolicy {
    /// Serving container to commit; filled by the scheduler.
    pub base_container: String,
    /// Image name to commit as.
    pub image: String,
    /// Tag to commit as.
    pub tag: String,
    /// Push to the backing registry after committing.
    pub need_push: bool,
    /// Backing-registry namespace for the push.
    pub namespace: String,
    /// Also record the committed image in the session image store.
    #[serde(rename = "need_store")]
    pub need_store: bool,
}

impl BuildPolicy {
    /// Encodes the policy for the rebuild header.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self).map_err(|e| Error::PolicyEncode(e.to_string()))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }

    /// Decodes a rebuild header back into a policy.
    pub fn decode(data: &str) -> Result<Self> {
        let json = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::PolicyDecode(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| Error::PolicyDecode(e.to_string()))
    }
}

// =============================================================================
// Schedule Driver Contract
// =============================================================================

/// Per-registry-kind policy source.
///
/// A driver maps classified request metadata to a schedule policy, or
/// declines with `None` when the request shape is not one it handles.
#[async_trait]
pub trait ScheduleDriver: Send + Sync {
    /// Produces the policy for `meta`, or declines.
    async fn schedule(&self, meta: &RequestMeta) -> Option<SchedulePolicy>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_policy_roundtrip() {
        let policy = BuildPolicy {
            base_container: "abc123".to_string(),
            image: "express".to_string(),
            tag: "4.18.2".to_string(),
            need_push: true,
            namespace: "npm".to_string(),
            need_store: false,
        };

        let encoded = policy.encode().unwrap();
        let decoded = BuildPolicy::decode(&encoded).unwrap();
        assert_eq!(decoded, policy);
    }

    #[test]
    fn test_build_policy_decode_rejects_garbage() {
        assert!(BuildPolicy::decode("not base64 !!!").is_err());

        let not_json = base64::engine::general_purpose::STANDARD.encode("plain text");
        assert!(BuildPolicy::decode(&not_json).is_err());
    }

    #[test]
    fn test_launch_tag_defaults() {
        let mut policy = SchedulePolicy {
            image: "registry".to_string(),
            ..Default::default()
        };
        assert_eq!(policy.launch_tag(), "latest");

        policy.tag = "dev".to_string();
        assert_eq!(policy.launch_tag(), "dev");
    }
}
