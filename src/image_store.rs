//! Session image store.
//!
//! Time-expiring set of committed "session images" — images tagged with an
//! auth fingerprint after a credential-establishing request — that the
//! scheduler may relaunch for subsequent requests carrying the same
//! fingerprint.
//!
//! Every lookup extends the entry's active time by a small safety margin
//! so the sweeper cannot evict an image between the scheduler reading it
//! and the executor launching it.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::constants::{IMAGE_GET_SAFETY_SECS, IMAGE_OUTDATED_SECS};
use crate::error::{Error, Result};

/// A reusable session image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Image name.
    pub name: String,
    /// Image tag (an auth fingerprint for session images).
    pub tag: String,
    /// Unix seconds of last insertion or lookup.
    pub active_time: i64,
}

/// Map of `"name:tag"` to session images with sweep-based expiry.
pub struct ImageStore {
    images: RwLock<HashMap<String, Image>>,
    outdated_threshold: i64,
}

impl ImageStore {
    /// Creates a store with the default expiry threshold.
    #[must_use]
    pub fn new() -> Self {
        Self::with_outdated_threshold(IMAGE_OUTDATED_SECS)
    }

    /// Creates a store with a custom expiry threshold.
    #[must_use]
    pub fn with_outdated_threshold(outdated_threshold: i64) -> Self {
        Self {
            images: RwLock::new(HashMap::new()),
            outdated_threshold,
        }
    }

    /// Records `name:tag`, refreshing the entry when it already exists.
    ///
    /// Empty names or tags are ignored.
    pub fn put(&self, name: &str, tag: &str) {
        if name.is_empty() || tag.is_empty() {
            return;
        }

        let key = format!("{}:{}", name, tag);
        let now = chrono::Utc::now().timestamp();

        let Ok(mut images) = self.images.write() else {
            return;
        };
        images
            .entry(key)
            .and_modify(|image| image.active_time = now)
            .or_insert_with(|| Image {
                name: name.to_string(),
                tag: tag.to_string(),
                active_time: now,
            });
    }

    /// Looks up `key` (`"name:tag"`), extending its active time by the
    /// safety margin on a hit.
    pub fn get(&self, key: &str) -> Option<Image> {
        let mut images = self.images.write().ok()?;
        let image = images.get_mut(key)?;
        image.active_time += IMAGE_GET_SAFETY_SECS;
        Some(image.clone())
    }

    /// Evicts and returns every entry whose active time is older than the
    /// expiry threshold.
    pub fn garbage(&self) -> Result<Vec<Image>> {
        let now = chrono::Utc::now().timestamp();
        let mut images = self
            .images
            .write()
            .map_err(|e| Error::Internal(format!("image store lock poisoned: {}", e)))?;

        let expired: Vec<String> = images
            .iter()
            .filter(|(_, image)| now > image.active_time + self.outdated_threshold)
            .map(|(key, _)| key.clone())
            .collect();

        let mut outdated = Vec::with_capacity(expired.len());
        for key in expired {
            if let Some(image) = images.remove(&key) {
                outdated.push(image);
            }
        }

        Ok(outdated)
    }
}

impl Default for ImageStore {
    fn default() -> Self {
        Self::new()
    }
}
