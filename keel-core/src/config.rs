//! Configuration for the persistence layer.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Readiness state of the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessState {
    /// `initialize()` has not been called.
    Uninitialized,
    /// Migrations are running.
    Migrating,
    /// Capability assessment is running.
    Assessing,
    /// Migrations fully applied and a fresh snapshot published.
    Ready,
    /// Running with reduced features: a step failed or assessment was partial.
    Degraded,
    /// The backend was entirely unreachable within the retry budget.
    Failed,
}

impl ReadinessState {
    /// True for states in which writes may be attempted at all.
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Ready | Self::Degraded)
    }
}

/// Tunables for caching, probing, and migration retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeelConfig {
    /// How long a definitive probe result may be served from cache.
    pub freshness_window: Duration,
    /// Per-probe timeout; an elapsed probe classifies as `Unknown`.
    pub probe_timeout: Duration,
    /// Attempts at running migrations when the backend is unreachable.
    pub migration_retry_budget: u32,
    /// Delay between unreachable-backend retries.
    pub migration_retry_backoff: Duration,
    /// Backend table holding migration records.
    pub ledger_table: String,
}

impl Default for KeelConfig {
    fn default() -> Self {
        Self {
            freshness_window: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
            migration_retry_budget: 3,
            migration_retry_backoff: Duration::from_millis(500),
            ledger_table: "schema_migrations".to_string(),
        }
    }
}

impl KeelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the freshness window for cached probe results.
    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window = window;
        self
    }

    /// Set the per-probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the unreachable-backend retry budget for migrations.
    pub fn with_migration_retry_budget(mut self, budget: u32) -> Self {
        self.migration_retry_budget = budget;
        self
    }

    /// Set the backoff between migration retries.
    pub fn with_migration_retry_backoff(mut self, backoff: Duration) -> Self {
        self.migration_retry_backoff = backoff;
        self
    }

    /// Set the ledger table name.
    pub fn with_ledger_table(mut self, table: impl Into<String>) -> Self {
        self.ledger_table = table.into();
        self
    }
}
