//! Migration ledger records and run outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MigrationError;

/// One ledger row: a migration step that has been applied (or whose
/// postcondition was found to already hold).
///
/// Records are persisted in the backend itself so they survive process
/// restarts, and are append-only in step declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: String,
    pub applied_at: DateTime<Utc>,
}

impl MigrationRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            applied_at: Utc::now(),
        }
    }

    /// Render this record as a backend row.
    pub fn to_row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("id".to_string(), Value::String(self.id.clone()));
        row.insert(
            "applied_at".to_string(),
            Value::String(self.applied_at.to_rfc3339()),
        );
        row
    }

    /// Parse a record from a backend row.
    pub fn from_row(row: &Map<String, Value>) -> Result<Self, MigrationError> {
        let id = row
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| MigrationError::MalformedLedgerRow {
                reason: "missing id".to_string(),
            })?
            .to_string();
        let applied_at = row
            .get("applied_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| MigrationError::MalformedLedgerRow {
                reason: format!("missing or invalid applied_at for {id}"),
            })?;
        Ok(Self { id, applied_at })
    }
}

/// Outcome of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MigrationOutcome {
    /// Steps whose `apply()` executed and succeeded during this run.
    pub applied_ids: Vec<String>,
    /// Steps skipped: already in the ledger, or precondition already held.
    pub skipped_ids: Vec<String>,
    /// The step that failed, if any. Later steps were not attempted.
    pub failed_id: Option<String>,
}

impl MigrationOutcome {
    /// True when every declared step is accounted for without failure.
    pub fn fully_applied(&self) -> bool {
        self.failed_id.is_none()
    }
}
