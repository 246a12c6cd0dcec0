//! Schedule driver implementations.
//!
//! One driver per registry kind. The npm driver consults the backing
//! registry for previously published package images; the pip driver maps
//! packages straight onto namespaced image names.

mod npm;
mod pip;

pub use npm::NpmScheduleDriver;
pub use pip::PipScheduleDriver;

use tracing::{debug, warn};

/// Queries the backing registry for tag existence.
///
/// `GET <api>/repositories/<namespace>/<image>/tags/<tag>` — HTTP 200
/// means the image exists; any other status, and any transport failure,
/// is treated as not-exists.
pub(crate) async fn check_image_existing(
    client: &reqwest::Client,
    registry_api: &str,
    namespace: &str,
    image: &str,
    tag: &str,
) -> bool {
    let url = format!(
        "{}/repositories/{}/{}/tags/{}",
        registry_api, namespace, image, tag
    );

    match client.get(&url).send().await {
        Ok(res) if res.status() == reqwest::StatusCode::OK => {
            debug!(image = %image, tag = %tag, "image existing in backing registry");
            true
        }
        Ok(res) => {
            debug!(image = %image, tag = %tag, status = %res.status(), "image not existing");
            false
        }
        Err(e) => {
            warn!(image = %image, tag = %tag, "failed to check image existence: {}", e);
            false
        }
    }
}

/// HTTP client for backing-registry queries.
///
/// TLS verification is disabled: the backing registry commonly runs with
/// a self-signed certificate on the same host.
pub(crate) fn registry_client() -> reqwest::Client {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap_or_default()
}
