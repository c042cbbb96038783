//! Low-level schema probe.
//!
//! Asks the backend whether a single column is usable via a minimal,
//! side-effect-free read, and classifies the answer three ways. The mapping
//! from raw backend errors to the classification lives in the backend
//! adapter (`BackendError` variants); this module only matches on them.

use std::sync::Arc;
use std::time::Duration;

use keel_core::{ColumnCapability, ColumnKey, ColumnState};

use crate::backend::Backend;

/// Probes one column at a time with a row limit of one.
#[derive(Clone)]
pub struct SchemaProbe {
    backend: Arc<dyn Backend>,
    timeout: Duration,
}

impl SchemaProbe {
    pub fn new(backend: Arc<dyn Backend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Probe `key` and classify the result.
    ///
    /// Classification is total. A successful read (even of zero rows) means
    /// the column exists, and a missing-identifier error means it does not.
    /// Timeouts, connectivity failures, and permission errors are `Unknown`.
    /// `Unknown` must never be conflated with `MissingColumn`; a transient
    /// failure cached as a hard negative would permanently disable a feature.
    pub async fn probe(&self, key: &ColumnKey) -> ColumnCapability {
        let columns = [key.column.as_str()];
        let read = self.backend.read(&key.table, &columns, Some(1));

        let state = match tokio::time::timeout(self.timeout, read).await {
            Ok(Ok(_rows)) => ColumnState::Exists,
            Ok(Err(err)) if err.is_missing_identifier() => {
                tracing::debug!(key = %key, "probe: column missing");
                ColumnState::MissingColumn
            }
            Ok(Err(err)) => {
                tracing::warn!(key = %key, error = %err, "probe inconclusive");
                ColumnState::Unknown
            }
            Err(_elapsed) => {
                tracing::warn!(key = %key, timeout = ?self.timeout, "probe timed out");
                ColumnState::Unknown
            }
        };
        ColumnCapability::new(key.clone(), state)
    }
}
