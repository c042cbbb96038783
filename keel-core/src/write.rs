//! Write outcome types for capability-filtered writes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Error kinds that can surface on the write path.
///
/// `SchemaMismatch` never actually reaches callers of the safe accessor: a
/// column known to be absent is filtered out before the write, so the write
/// itself cannot fail on it. The variant exists for adapters and callers that
/// bypass filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteErrorKind {
    /// A referenced column is absent from the backend schema.
    SchemaMismatch,
    /// Timeout or connectivity failure; retrying is the caller's decision.
    TransientBackend,
    /// Capability state could not be determined; treated as unavailable.
    AmbiguousCapability,
}

/// Result of a capability-filtered write.
///
/// A write where every field was skipped is still a success: callers decide
/// whether an all-skipped write is acceptable for their use case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub success: bool,
    pub applied_fields: BTreeSet<String>,
    pub skipped_fields: BTreeSet<String>,
    pub error: Option<WriteErrorKind>,
}

impl WriteOutcome {
    /// A successful write that applied `applied` and skipped `skipped`.
    pub fn applied(applied: BTreeSet<String>, skipped: BTreeSet<String>) -> Self {
        Self {
            success: true,
            applied_fields: applied,
            skipped_fields: skipped,
            error: None,
        }
    }

    /// A successful no-op: every field was filtered out.
    pub fn all_skipped(skipped: BTreeSet<String>) -> Self {
        Self {
            success: true,
            applied_fields: BTreeSet::new(),
            skipped_fields: skipped,
            error: None,
        }
    }

    /// A failed write. The field partition is preserved so callers can see
    /// what was attempted.
    pub fn failed(
        applied: BTreeSet<String>,
        skipped: BTreeSet<String>,
        error: WriteErrorKind,
    ) -> Self {
        Self {
            success: false,
            applied_fields: applied,
            skipped_fields: skipped,
            error: Some(error),
        }
    }

    /// True when at least one field reached the backend.
    pub fn any_applied(&self) -> bool {
        !self.applied_fields.is_empty()
    }
}
