//! Startup sequencing and readiness publication.
//!
//! `Uninitialized -> Migrating -> Assessing -> (Ready | Degraded)`, with
//! `Failed` reachable only from `Migrating` when the backend is entirely
//! unreachable within the retry budget. A single failed step is not `Failed`:
//! the system still assesses whatever state was reached and runs degraded.
//! Re-entrant: `initialize()` from `Degraded` or `Failed` retries migrations
//! and re-assesses.

use std::sync::Arc;

use keel_core::{CapabilitySnapshot, KeelConfig, MigrationOutcome, ReadinessState};
use tokio::sync::{watch, Mutex};

use crate::assess::CapabilityAssessor;
use crate::cache::CapabilityCache;
use crate::migrate::MigrationOrchestrator;

/// What `initialize()` hands back to the hosting application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOutcome {
    pub state: ReadinessState,
    pub capabilities: CapabilitySnapshot,
}

enum MigrationStatus {
    /// Every step accounted for.
    Complete,
    /// A step failed, or the orchestration machinery hit a localized error.
    Partial(Option<String>),
    /// Retry budget exhausted against an unreachable backend.
    Unreachable,
}

pub struct InitCoordinator {
    orchestrator: Arc<MigrationOrchestrator>,
    assessor: Arc<CapabilityAssessor>,
    cache: Arc<CapabilityCache>,
    config: KeelConfig,
    state_tx: watch::Sender<ReadinessState>,
    snapshot_tx: watch::Sender<CapabilitySnapshot>,
    /// Serializes concurrent `initialize()` calls.
    init_lock: Mutex<()>,
}

impl InitCoordinator {
    pub fn new(
        orchestrator: Arc<MigrationOrchestrator>,
        assessor: Arc<CapabilityAssessor>,
        cache: Arc<CapabilityCache>,
        config: KeelConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ReadinessState::Uninitialized);
        let (snapshot_tx, _) = watch::channel(CapabilitySnapshot::empty());
        Self {
            orchestrator,
            assessor,
            cache,
            config,
            state_tx,
            snapshot_tx,
            init_lock: Mutex::new(()),
        }
    }

    /// Current readiness state.
    pub fn state(&self) -> ReadinessState {
        *self.state_tx.borrow()
    }

    /// The most recently published snapshot (empty, version 0, before the
    /// first assessment).
    pub fn capabilities(&self) -> CapabilitySnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Subscribe to readiness transitions.
    pub fn watch_state(&self) -> watch::Receiver<ReadinessState> {
        self.state_tx.subscribe()
    }

    /// Run migrations, assess capabilities, warm the cache, publish
    /// readiness.
    pub async fn initialize(&self) -> InitOutcome {
        let _guard = self.init_lock.lock().await;

        self.publish_state(ReadinessState::Migrating);
        let migration = self.run_migrations().await;

        if matches!(migration, MigrationStatus::Unreachable) {
            self.publish_state(ReadinessState::Failed);
            return InitOutcome {
                state: ReadinessState::Failed,
                capabilities: self.capabilities(),
            };
        }

        self.publish_state(ReadinessState::Assessing);
        self.cache.warm(&self.assessor.hot_keys()).await;
        let snapshot = self.assessor.assess().await;
        self.snapshot_tx.send_replace(snapshot.clone());

        let state = match migration {
            MigrationStatus::Complete => ReadinessState::Ready,
            MigrationStatus::Partial(failed_id) => {
                tracing::warn!(
                    failed_step = failed_id.as_deref().unwrap_or("<ledger>"),
                    "running degraded"
                );
                ReadinessState::Degraded
            }
            MigrationStatus::Unreachable => unreachable!("handled above"),
        };
        self.publish_state(state);
        InitOutcome {
            state,
            capabilities: snapshot,
        }
    }

    /// Run the orchestrator, retrying only total unreachability.
    async fn run_migrations(&self) -> MigrationStatus {
        let budget = self.config.migration_retry_budget.max(1);
        for attempt in 1..=budget {
            match self.orchestrator.run().await {
                Ok(MigrationOutcome {
                    failed_id: None, ..
                }) => return MigrationStatus::Complete,
                Ok(outcome) => return MigrationStatus::Partial(outcome.failed_id),
                Err(err) if err.is_unreachable() => {
                    tracing::warn!(attempt, budget, error = %err, "backend unreachable during migration");
                    if attempt < budget {
                        tokio::time::sleep(self.config.migration_retry_backoff).await;
                    }
                }
                Err(err) => {
                    // Localized ledger problem: degrade rather than fail.
                    tracing::error!(error = %err, "migration ledger error");
                    return MigrationStatus::Partial(None);
                }
            }
        }
        MigrationStatus::Unreachable
    }

    fn publish_state(&self, state: ReadinessState) {
        tracing::info!(state = ?state, "readiness transition");
        self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assess::{default_checks, CapabilityAssessor};
    use crate::migrate::{FnStep, MigrationStep};
    use crate::mock::MockBackend;
    use crate::probe::SchemaProbe;
    use futures_util::FutureExt;
    use keel_core::BackendError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const LEDGER: &str = "schema_migrations";

    fn build(
        backend: Arc<MockBackend>,
        steps: Vec<Arc<dyn MigrationStep>>,
    ) -> InitCoordinator {
        let config = KeelConfig::default()
            .with_migration_retry_budget(2)
            .with_migration_retry_backoff(Duration::from_millis(1));
        let probe = SchemaProbe::new(backend.clone(), Duration::from_millis(100));
        let cache = Arc::new(CapabilityCache::new(probe, config.freshness_window));
        let orchestrator = Arc::new(MigrationOrchestrator::new(
            backend.clone(),
            steps,
            LEDGER,
        ));
        let assessor = Arc::new(CapabilityAssessor::new(Arc::clone(&cache), default_checks()));
        InitCoordinator::new(orchestrator, assessor, cache, config)
    }

    fn full_schema() -> Arc<MockBackend> {
        let backend = Arc::new(MockBackend::new());
        backend.create_table(LEDGER, &["id", "applied_at"]);
        backend.create_table(
            "videos",
            &["id", "file_path", "status", "updated_at", "manual_product_name"],
        );
        backend.create_table(
            "detections",
            &["id", "video_id", "class_name", "confidence", "crop_image_url"],
        );
        backend.create_table(
            "product_matches",
            &["id", "detection_id", "similarity_score"],
        );
        backend
    }

    fn noop_step(id: &str) -> Arc<dyn MigrationStep> {
        Arc::new(FnStep::new(
            id,
            "no-op",
            || async { Ok(false) }.boxed(),
            || async { Ok(()) }.boxed(),
        ))
    }

    fn failing_step(id: &str) -> Arc<dyn MigrationStep> {
        Arc::new(FnStep::new(
            id,
            "always fails",
            || async { Ok(true) }.boxed(),
            || {
                async {
                    Err(BackendError::Query {
                        reason: "locked".to_string(),
                    })
                }
                .boxed()
            },
        ))
    }

    #[tokio::test]
    async fn test_clean_initialize_reaches_ready() {
        let backend = full_schema();
        let coordinator = build(backend, vec![noop_step("0001")]);

        assert_eq!(coordinator.state(), ReadinessState::Uninitialized);
        let outcome = coordinator.initialize().await;

        assert_eq!(outcome.state, ReadinessState::Ready);
        assert_eq!(coordinator.state(), ReadinessState::Ready);
        assert!(outcome.capabilities.flag("core-video-fields"));
        assert_eq!(outcome.capabilities.version, 1);
    }

    #[tokio::test]
    async fn test_single_step_failure_degrades_with_partial_snapshot() {
        let backend = full_schema();
        let coordinator = build(backend, vec![noop_step("0001"), failing_step("0002")]);

        let outcome = coordinator.initialize().await;
        assert_eq!(outcome.state, ReadinessState::Degraded);
        // Partial capabilities are still assessed and non-empty.
        assert!(!outcome.capabilities.is_empty());
        assert!(outcome.capabilities.flag("core-video-fields"));
    }

    #[tokio::test]
    async fn test_unreachable_backend_fails_after_budget() {
        let backend = full_schema();
        backend.set_outage(Some(BackendError::Connection {
            reason: "refused".to_string(),
        }));
        let coordinator = build(backend, vec![noop_step("0001")]);

        let outcome = coordinator.initialize().await;
        assert_eq!(outcome.state, ReadinessState::Failed);
        // No assessment ran; the snapshot is the pre-init empty one.
        assert_eq!(outcome.capabilities.version, 0);
    }

    #[tokio::test]
    async fn test_reinitialize_from_failed_recovers() {
        let backend = full_schema();
        backend.set_outage(Some(BackendError::Connection {
            reason: "refused".to_string(),
        }));
        let coordinator = build(Arc::clone(&backend), vec![noop_step("0001")]);

        assert_eq!(coordinator.initialize().await.state, ReadinessState::Failed);

        backend.set_outage(None);
        let outcome = coordinator.initialize().await;
        assert_eq!(outcome.state, ReadinessState::Ready);
        assert!(outcome.capabilities.flag("product-matching"));
    }

    #[tokio::test]
    async fn test_reinitialize_from_degraded_reaches_ready_after_heal() {
        let backend = full_schema();
        let healed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&healed);
        let step: Arc<dyn MigrationStep> = Arc::new(FnStep::new(
            "0001",
            "fails until healed",
            || async { Ok(true) }.boxed(),
            move || {
                let flag = Arc::clone(&flag);
                async move {
                    if flag.load(Ordering::SeqCst) {
                        Ok(())
                    } else {
                        Err(BackendError::Query {
                            reason: "locked".to_string(),
                        })
                    }
                }
                .boxed()
            },
        ));
        let coordinator = build(backend, vec![step]);

        let first = coordinator.initialize().await;
        assert_eq!(first.state, ReadinessState::Degraded);

        healed.store(true, Ordering::SeqCst);
        let second = coordinator.initialize().await;
        assert_eq!(second.state, ReadinessState::Ready);
        assert!(second.capabilities.version > first.capabilities.version);
    }

    #[tokio::test]
    async fn test_reinitialize_from_degraded_bumps_snapshot_version() {
        let backend = full_schema();
        let coordinator = build(backend, vec![failing_step("0001")]);

        let first = coordinator.initialize().await;
        assert_eq!(first.state, ReadinessState::Degraded);
        let second = coordinator.initialize().await;
        assert_eq!(second.state, ReadinessState::Degraded);
        assert!(second.capabilities.version > first.capabilities.version);
    }

    #[tokio::test]
    async fn test_watch_state_observes_transitions() {
        let backend = full_schema();
        let coordinator = build(backend, vec![noop_step("0001")]);
        let rx = coordinator.watch_state();

        coordinator.initialize().await;
        assert_eq!(*rx.borrow(), ReadinessState::Ready);
    }
}
