//! Capability-filtered writes.
//!
//! Every write is restricted to columns the cache confirms exist. Fields on
//! columns the backend has not migrated yet are skipped, not errors: the
//! application keeps working with whatever schema the backend actually has,
//! and the outcome reports exactly which fields were applied versus skipped.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::future::join_all;
use keel_core::{BackendError, WriteErrorKind, WriteOutcome};

use crate::backend::{Backend, Row};
use crate::cache::CapabilityCache;

pub struct SafeAccessor {
    cache: Arc<CapabilityCache>,
    backend: Arc<dyn Backend>,
}

impl SafeAccessor {
    pub fn new(cache: Arc<CapabilityCache>, backend: Arc<dyn Backend>) -> Self {
        Self { cache, backend }
    }

    /// Update rows matching `matcher`, writing only fields whose columns are
    /// known to exist.
    ///
    /// Matcher columns are the caller's identity predicate and are not
    /// filtered. An update where every field was skipped succeeds without
    /// touching the backend; whether that is acceptable is the caller's
    /// decision. Backend failures on the restricted write are surfaced in
    /// the outcome without automatic retry.
    pub async fn safe_update(&self, table: &str, fields: Row, matcher: Row) -> WriteOutcome {
        let (applied, skipped) = self.partition(table, fields).await;
        if applied.is_empty() {
            tracing::debug!(table, skipped = skipped.len(), "update fully filtered");
            return WriteOutcome::all_skipped(skipped);
        }

        let applied_names: BTreeSet<String> = applied.keys().cloned().collect();
        match self.backend.update(table, &applied, &matcher).await {
            Ok(rows) => {
                tracing::debug!(table, rows, "applied filtered update");
                WriteOutcome::applied(applied_names, skipped)
            }
            Err(err) => {
                tracing::warn!(table, error = %err, "filtered update failed");
                WriteOutcome::failed(applied_names, skipped, Self::classify(&err))
            }
        }
    }

    /// Insert a row, writing only fields whose columns are known to exist.
    pub async fn safe_insert(&self, table: &str, fields: Row) -> WriteOutcome {
        let (applied, skipped) = self.partition(table, fields).await;
        if applied.is_empty() {
            tracing::debug!(table, skipped = skipped.len(), "insert fully filtered");
            return WriteOutcome::all_skipped(skipped);
        }

        let applied_names: BTreeSet<String> = applied.keys().cloned().collect();
        match self.backend.insert(table, &applied).await {
            Ok(_row) => WriteOutcome::applied(applied_names, skipped),
            Err(err) => {
                tracing::warn!(table, error = %err, "filtered insert failed");
                WriteOutcome::failed(applied_names, skipped, Self::classify(&err))
            }
        }
    }

    /// Partition `fields` by capability. Lookups run concurrently; each one
    /// may suspend on an in-flight probe.
    async fn partition(&self, table: &str, fields: Row) -> (Row, BTreeSet<String>) {
        let lookups = fields
            .keys()
            .map(|column| self.cache.column_exists(table, column));
        let usable = join_all(lookups).await;

        let mut applied = Row::new();
        let mut skipped = BTreeSet::new();
        for ((name, value), exists) in fields.into_iter().zip(usable) {
            if exists {
                applied.insert(name, value);
            } else {
                skipped.insert(name);
            }
        }
        (applied, skipped)
    }

    /// Map a backend error on a pre-filtered write to an outcome kind.
    /// Missing-column errors shouldn't occur here (those fields were
    /// filtered out), but a probe-to-write race can still surface one.
    fn classify(err: &BackendError) -> WriteErrorKind {
        if err.is_missing_identifier() {
            WriteErrorKind::SchemaMismatch
        } else {
            WriteErrorKind::TransientBackend
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use crate::probe::SchemaProbe;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn accessor_over(backend: Arc<MockBackend>) -> SafeAccessor {
        let probe = SchemaProbe::new(backend.clone(), Duration::from_millis(100));
        let cache = Arc::new(CapabilityCache::new(probe, Duration::from_secs(60)));
        SafeAccessor::new(cache, backend)
    }

    fn seeded_backend() -> Arc<MockBackend> {
        let backend = Arc::new(MockBackend::new());
        backend.create_table("videos", &["id", "file_path", "status", "title"]);
        backend
    }

    #[tokio::test]
    async fn test_update_skips_unmigrated_column() {
        let backend = seeded_backend();
        backend
            .insert("videos", &row(&[("id", json!(123)), ("title", json!("old"))]))
            .await
            .unwrap();
        let accessor = accessor_over(Arc::clone(&backend));

        let outcome = accessor
            .safe_update(
                "videos",
                row(&[
                    ("title", json!("x")),
                    ("manual_product_name", json!("y")),
                ]),
                row(&[("id", json!(123))]),
            )
            .await;

        assert!(outcome.success);
        assert_eq!(
            outcome.applied_fields.iter().collect::<Vec<_>>(),
            vec!["title"]
        );
        assert_eq!(
            outcome.skipped_fields.iter().collect::<Vec<_>>(),
            vec!["manual_product_name"]
        );

        // The backend must receive an update containing only `title`.
        let updates = backend.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].fields.len(), 1);
        assert_eq!(updates[0].fields["title"], json!("x"));
        assert_eq!(backend.rows("videos")[0]["title"], json!("x"));
    }

    #[tokio::test]
    async fn test_all_skipped_update_succeeds_without_backend_call() {
        let backend = seeded_backend();
        let accessor = accessor_over(Arc::clone(&backend));

        let outcome = accessor
            .safe_update(
                "videos",
                row(&[("manual_product_name", json!("y"))]),
                row(&[("id", json!(1))]),
            )
            .await;

        assert!(outcome.success);
        assert!(!outcome.any_applied());
        assert!(backend.updates().is_empty());
    }

    #[tokio::test]
    async fn test_insert_filters_and_succeeds() {
        let backend = seeded_backend();
        let accessor = accessor_over(Arc::clone(&backend));

        let outcome = accessor
            .safe_insert(
                "videos",
                row(&[
                    ("file_path", json!("clips/a.mp4")),
                    ("status", json!("processing")),
                    ("crop_image_url", json!("data:...")),
                ]),
            )
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.applied_fields.len(), 2);
        assert!(outcome.skipped_fields.contains("crop_image_url"));
        let rows = backend.rows("videos");
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].contains_key("crop_image_url"));
    }

    #[tokio::test]
    async fn test_backend_failure_surfaces_without_retry() {
        let backend = seeded_backend();
        let accessor = accessor_over(Arc::clone(&backend));
        // Warm capabilities first so the outage hits the write, not the probe.
        let _ = accessor
            .safe_update(
                "videos",
                row(&[("status", json!("processing"))]),
                row(&[("id", json!(1))]),
            )
            .await;

        backend.set_outage(Some(keel_core::BackendError::Connection {
            reason: "refused".to_string(),
        }));
        let outcome = accessor
            .safe_update(
                "videos",
                row(&[("status", json!("complete"))]),
                row(&[("id", json!(1))]),
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error, Some(WriteErrorKind::TransientBackend));
        // Only the pre-outage update was recorded: no automatic retry.
        assert_eq!(backend.updates().len(), 1);
    }

    #[test]
    fn test_partition_is_exact() {
        // applied ∪ skipped == fields and the two sets are disjoint, for any
        // mix of known and unknown columns.
        use proptest::prelude::*;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        proptest!(ProptestConfig::with_cases(32), |(names in proptest::collection::btree_set("[a-z]{1,8}", 1..8))| {
            let backend = Arc::new(MockBackend::new());
            // Half the generated columns exist on the table.
            let known: Vec<&str> = names.iter().step_by(2).map(String::as_str).collect();
            backend.create_table("videos", &known);

            let accessor = accessor_over(Arc::clone(&backend));
            let fields: Row = names
                .iter()
                .map(|n| (n.clone(), json!("v")))
                .collect();

            let outcome = runtime.block_on(
                accessor.safe_insert("videos", fields.clone()),
            );

            let mut union: BTreeSet<String> = outcome.applied_fields.clone();
            prop_assert!(union.is_disjoint(&outcome.skipped_fields));
            union.extend(outcome.skipped_fields.clone());
            let expected: BTreeSet<String> = fields.keys().cloned().collect();
            prop_assert_eq!(union, expected);
            for name in &outcome.applied_fields {
                prop_assert!(known.contains(&name.as_str()));
            }
        });
    }
}
