//! KEEL Storage - Schema-Adaptive Persistence Layer
//!
//! Lets an application keep working when its belief about a remote
//! relational backend's schema is stale, incomplete, or ahead of what the
//! backend has actually migrated. At runtime it decides which fields are
//! safe to write, runs idempotent schema migrations, and publishes a
//! versioned capability snapshot the rest of the application uses to enable
//! or disable features.
//!
//! The concrete backend transport lives behind the [`Backend`] trait; a
//! [`MockBackend`] ships for tests and local development.

pub mod accessor;
pub mod assess;
pub mod backend;
pub mod cache;
pub mod coordinator;
pub mod migrate;
pub mod mock;
pub mod probe;

pub use accessor::SafeAccessor;
pub use assess::{default_checks, CapabilityAssessor, CapabilityCheck};
pub use backend::{Backend, Row};
pub use cache::CapabilityCache;
pub use coordinator::{InitCoordinator, InitOutcome};
pub use migrate::{FnStep, MigrationOrchestrator, MigrationStep};
pub use mock::{MockBackend, RecordedUpdate};
pub use probe::SchemaProbe;

use std::sync::Arc;

use keel_core::{CapabilitySnapshot, KeelConfig, ReadinessState, WriteOutcome};

/// The wired-up persistence layer: one backend, one capability cache, one
/// migration list, one check battery.
///
/// This is the surface the hosting application talks to. Everything is
/// shareable: `Keel` is cheap to clone-by-`Arc` and safe for concurrent use.
pub struct Keel {
    cache: Arc<CapabilityCache>,
    accessor: SafeAccessor,
    coordinator: InitCoordinator,
}

impl Keel {
    pub fn new(
        backend: Arc<dyn Backend>,
        config: KeelConfig,
        steps: Vec<Arc<dyn MigrationStep>>,
        checks: Vec<CapabilityCheck>,
    ) -> Self {
        let probe = SchemaProbe::new(Arc::clone(&backend), config.probe_timeout);
        let cache = Arc::new(CapabilityCache::new(probe, config.freshness_window));
        let accessor = SafeAccessor::new(Arc::clone(&cache), Arc::clone(&backend));
        let orchestrator = Arc::new(MigrationOrchestrator::new(
            Arc::clone(&backend),
            steps,
            config.ledger_table.clone(),
        ));
        let assessor = Arc::new(CapabilityAssessor::new(Arc::clone(&cache), checks));
        let coordinator = InitCoordinator::new(orchestrator, assessor, Arc::clone(&cache), config);
        Self {
            cache,
            accessor,
            coordinator,
        }
    }

    /// Run migrations, assess capabilities, warm the cache, publish
    /// readiness. Re-entrant; call again from `Degraded` or `Failed` to
    /// retry.
    pub async fn initialize(&self) -> InitOutcome {
        self.coordinator.initialize().await
    }

    /// Whether `table.column` is currently usable. Never errors for a
    /// missing column.
    pub async fn column_exists(&self, table: &str, column: &str) -> bool {
        self.cache.column_exists(table, column).await
    }

    /// Update restricted to columns known to exist.
    pub async fn safe_update(&self, table: &str, fields: Row, matcher: Row) -> WriteOutcome {
        self.accessor.safe_update(table, fields, matcher).await
    }

    /// Insert restricted to columns known to exist.
    pub async fn safe_insert(&self, table: &str, fields: Row) -> WriteOutcome {
        self.accessor.safe_insert(table, fields).await
    }

    /// The most recently published capability snapshot.
    pub fn capabilities(&self) -> CapabilitySnapshot {
        self.coordinator.capabilities()
    }

    /// Current readiness state.
    pub fn readiness(&self) -> ReadinessState {
        self.coordinator.state()
    }
}
