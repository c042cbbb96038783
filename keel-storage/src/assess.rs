//! Capability assessment: named checks over the cache, aggregated into a
//! versioned snapshot for feature gating.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use keel_core::{CapabilitySnapshot, ColumnKey, ColumnState};

use crate::cache::CapabilityCache;

/// One named capability check.
///
/// The flag is true when every `all_of` column exists and, if `any_of` is
/// non-empty, at least one of those columns exists.
#[derive(Debug, Clone)]
pub struct CapabilityCheck {
    pub name: String,
    pub all_of: Vec<ColumnKey>,
    pub any_of: Vec<ColumnKey>,
}

impl CapabilityCheck {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            all_of: Vec::new(),
            any_of: Vec::new(),
        }
    }

    /// Require `table.column` to exist.
    pub fn requires(mut self, table: &str, column: &str) -> Self {
        self.all_of.push(ColumnKey::new(table, column));
        self
    }

    /// Accept any one of the listed columns.
    pub fn accepts_any(mut self, keys: impl IntoIterator<Item = ColumnKey>) -> Self {
        self.any_of.extend(keys);
        self
    }

    fn keys(&self) -> impl Iterator<Item = &ColumnKey> {
        self.all_of.iter().chain(self.any_of.iter())
    }
}

/// The default check battery for the video-commerce schema.
pub fn default_checks() -> Vec<CapabilityCheck> {
    vec![
        CapabilityCheck::new("core-video-fields")
            .requires("videos", "id")
            .requires("videos", "file_path")
            .requires("videos", "status"),
        CapabilityCheck::new("video-progress-tracking").requires("videos", "updated_at"),
        CapabilityCheck::new("manual-product-overrides")
            .requires("videos", "manual_product_name"),
        CapabilityCheck::new("detection-storage")
            .requires("detections", "id")
            .requires("detections", "video_id")
            .requires("detections", "class_name")
            .requires("detections", "confidence"),
        CapabilityCheck::new("crop-image-storage")
            .requires("detections", "id")
            .accepts_any([
                ColumnKey::new("detections", "crop_image_data"),
                ColumnKey::new("detections", "crop_image_url"),
            ]),
        CapabilityCheck::new("product-matching")
            .requires("product_matches", "id")
            .requires("product_matches", "detection_id")
            .requires("product_matches", "similarity_score"),
    ]
}

/// Runs the check battery and produces versioned snapshots.
///
/// Assessment only reads through the cache; once the cache is warm, repeated
/// assessments cost no backend traffic.
pub struct CapabilityAssessor {
    cache: Arc<CapabilityCache>,
    checks: Vec<CapabilityCheck>,
    version: AtomicU64,
}

impl CapabilityAssessor {
    pub fn new(cache: Arc<CapabilityCache>, checks: Vec<CapabilityCheck>) -> Self {
        Self {
            cache,
            checks,
            version: AtomicU64::new(0),
        }
    }

    /// Every distinct key the battery touches; the coordinator warms these.
    pub fn hot_keys(&self) -> Vec<ColumnKey> {
        let mut keys: Vec<ColumnKey> = self
            .checks
            .iter()
            .flat_map(|check| check.keys().cloned())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Evaluate every check and publish a new snapshot.
    pub async fn assess(&self) -> CapabilitySnapshot {
        let evaluations = self.checks.iter().map(|check| self.evaluate(check));
        let results = join_all(evaluations).await;

        let mut flags = BTreeMap::new();
        for (check, enabled) in self.checks.iter().zip(results) {
            if !enabled {
                tracing::debug!(check = %check.name, "capability disabled");
            }
            flags.insert(check.name.clone(), enabled);
        }

        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(version, flags = flags.len(), "capability snapshot assessed");
        CapabilitySnapshot::new(flags, version)
    }

    async fn evaluate(&self, check: &CapabilityCheck) -> bool {
        let required = check
            .all_of
            .iter()
            .map(|key| self.cache.column_state(key));
        for state in join_all(required).await {
            if state != ColumnState::Exists {
                return false;
            }
        }

        if check.any_of.is_empty() {
            return true;
        }
        let alternatives = check.any_of.iter().map(|key| self.cache.column_state(key));
        join_all(alternatives)
            .await
            .into_iter()
            .any(|state| state == ColumnState::Exists)
    }
}
