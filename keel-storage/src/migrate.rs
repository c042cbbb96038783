//! Idempotent schema migrations with a backend-persisted ledger.
//!
//! Steps are declared once, in order, and replayed deterministically: a step
//! already present in the ledger is never re-applied, a step whose
//! precondition no longer holds (the column appeared out-of-band, say) is
//! recorded without running, and a failing step halts the run so a later
//! `run()` resumes exactly there.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use keel_core::{BackendError, MigrationError, MigrationOutcome, MigrationRecord};
use tokio::sync::Mutex;

use crate::backend::Backend;

/// One idempotent migration step.
///
/// `precondition` answers "does this step still need to run?": `false` means
/// the desired end state already holds. `apply` performs the change. Both may
/// fail with a backend error; an unreachable backend aborts the whole run,
/// anything else fails just this step.
#[async_trait]
pub trait MigrationStep: Send + Sync {
    /// Stable identifier, unique across the declared list. Ledger key.
    fn id(&self) -> &str;

    /// Human-readable summary, used in logs.
    fn description(&self) -> &str;

    async fn precondition(&self) -> Result<bool, BackendError>;

    async fn apply(&self) -> Result<(), BackendError>;
}

type StepFuture<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, BackendError>> + Send + Sync>;

/// Closure-backed `MigrationStep` for declarative step lists.
pub struct FnStep {
    id: String,
    description: String,
    precondition: StepFuture<bool>,
    apply: StepFuture<()>,
}

impl FnStep {
    pub fn new<P, A>(
        id: impl Into<String>,
        description: impl Into<String>,
        precondition: P,
        apply: A,
    ) -> Self
    where
        P: Fn() -> BoxFuture<'static, Result<bool, BackendError>> + Send + Sync + 'static,
        A: Fn() -> BoxFuture<'static, Result<(), BackendError>> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            description: description.into(),
            precondition: Box::new(precondition),
            apply: Box::new(apply),
        }
    }
}

#[async_trait]
impl MigrationStep for FnStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn precondition(&self) -> Result<bool, BackendError> {
        (self.precondition)().await
    }

    async fn apply(&self) -> Result<(), BackendError> {
        (self.apply)().await
    }
}

/// Applies an ordered step list against the backend, exactly once each.
pub struct MigrationOrchestrator {
    backend: Arc<dyn Backend>,
    steps: Vec<Arc<dyn MigrationStep>>,
    ledger_table: String,
    /// Serializes concurrent `run()` calls; two callers must never apply the
    /// same step twice.
    run_lock: Mutex<()>,
}

impl MigrationOrchestrator {
    pub fn new(
        backend: Arc<dyn Backend>,
        steps: Vec<Arc<dyn MigrationStep>>,
        ledger_table: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            steps,
            ledger_table: ledger_table.into(),
            run_lock: Mutex::new(()),
        }
    }

    /// Run all pending steps in declaration order.
    ///
    /// A step failure stops the run and is reported via
    /// `MigrationOutcome::failed_id`; the ledger is left exactly as it was
    /// before that step, so a later run resumes there. Only an unreachable
    /// backend turns into an error.
    pub async fn run(&self) -> Result<MigrationOutcome, MigrationError> {
        let _guard = self.run_lock.lock().await;

        let ledger = self.load_ledger().await?;
        let mut outcome = MigrationOutcome::default();

        for step in &self.steps {
            let id = step.id();
            if ledger.contains(id) {
                outcome.skipped_ids.push(id.to_string());
                continue;
            }

            match step.precondition().await {
                Ok(true) => {}
                Ok(false) => {
                    // Postcondition already holds; record so replay stays
                    // deterministic, but the step never ran.
                    tracing::info!(step = %id, "precondition already satisfied, recording");
                    self.append_record(id).await?;
                    outcome.skipped_ids.push(id.to_string());
                    continue;
                }
                Err(err) if err.is_unreachable() => {
                    return Err(MigrationError::BackendUnreachable { source: err });
                }
                Err(err) => {
                    tracing::error!(step = %id, error = %err, "precondition check failed");
                    outcome.failed_id = Some(id.to_string());
                    return Ok(outcome);
                }
            }

            match step.apply().await {
                Ok(()) => {
                    self.append_record(id).await?;
                    tracing::info!(step = %id, description = %step.description(), "applied migration");
                    outcome.applied_ids.push(id.to_string());
                }
                Err(err) if err.is_unreachable() => {
                    return Err(MigrationError::BackendUnreachable { source: err });
                }
                Err(err) => {
                    tracing::error!(step = %id, error = %err, "migration step failed");
                    outcome.failed_id = Some(id.to_string());
                    return Ok(outcome);
                }
            }
        }

        Ok(outcome)
    }

    /// Load applied step ids from the ledger table.
    ///
    /// A missing ledger table reads as an empty ledger (fresh environment);
    /// the first append will surface a real problem if the table genuinely
    /// cannot be written.
    async fn load_ledger(&self) -> Result<BTreeSet<String>, MigrationError> {
        let rows = match self
            .backend
            .read(&self.ledger_table, &["id", "applied_at"], None)
            .await
        {
            Ok(rows) => rows,
            Err(err) if err.is_missing_identifier() => Vec::new(),
            Err(err) if err.is_unreachable() => {
                return Err(MigrationError::BackendUnreachable { source: err });
            }
            Err(err) => return Err(MigrationError::LedgerRead { source: err }),
        };

        let mut ids = BTreeSet::new();
        for row in &rows {
            ids.insert(MigrationRecord::from_row(row)?.id);
        }
        Ok(ids)
    }

    async fn append_record(&self, step_id: &str) -> Result<(), MigrationError> {
        let record = MigrationRecord::new(step_id);
        match self.backend.insert(&self.ledger_table, &record.to_row()).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_unreachable() => {
                Err(MigrationError::BackendUnreachable { source: err })
            }
            Err(err) => Err(MigrationError::LedgerAppend {
                step_id: step_id.to_string(),
                source: err,
            }),
        }
    }
}
