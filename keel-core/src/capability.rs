//! Column capability types and the versioned capability snapshot.
//!
//! A capability is a boolean fact about whether a schema element is currently
//! usable. Individual `(table, column)` facts live in `ColumnCapability`
//! entries owned by the cache; feature-gating code consumes the aggregated,
//! immutable `CapabilitySnapshot`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Key identifying one column of one table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnKey {
    pub table: String,
    pub column: String,
}

impl ColumnKey {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Three-way result of probing a column.
///
/// `Unknown` covers every transient or ambiguous outcome (timeout,
/// connectivity, permission). It must never be conflated with
/// `MissingColumn`: caching an ambiguous result as a hard negative would
/// permanently disable a feature that the backend actually supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnState {
    /// The column exists and is usable for reads and writes.
    Exists,
    /// The backend reported the column (or its table) does not exist.
    MissingColumn,
    /// The probe could not produce a definitive answer.
    Unknown,
}

/// One cached fact about a column, overwritten whole on re-probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnCapability {
    pub key: ColumnKey,
    pub state: ColumnState,
    pub checked_at: DateTime<Utc>,
}

impl ColumnCapability {
    pub fn new(key: ColumnKey, state: ColumnState) -> Self {
        Self {
            key,
            state,
            checked_at: Utc::now(),
        }
    }

    /// Whether this entry may be served as a cache hit.
    ///
    /// `Unknown` entries are never fresh regardless of age; the next lookup
    /// must re-probe instead of trusting an ambiguous answer.
    pub fn is_fresh(&self, window: Duration) -> bool {
        if self.state == ColumnState::Unknown {
            return false;
        }
        let age = Utc::now()
            .signed_duration_since(self.checked_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        age <= window
    }

    /// The boolean answer this entry gives to `column_exists`.
    pub fn exists(&self) -> bool {
        self.state == ColumnState::Exists
    }
}

/// Versioned, immutable aggregation of named capability flags.
///
/// A new snapshot replaces the previous one atomically; consumers never
/// observe a partially-updated flag set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub flags: BTreeMap<String, bool>,
    pub version: u64,
    pub assessed_at: DateTime<Utc>,
}

impl CapabilitySnapshot {
    /// The pre-assessment snapshot: no flags, version 0.
    pub fn empty() -> Self {
        Self {
            flags: BTreeMap::new(),
            version: 0,
            assessed_at: Utc::now(),
        }
    }

    pub fn new(flags: BTreeMap<String, bool>, version: u64) -> Self {
        Self {
            flags,
            version,
            assessed_at: Utc::now(),
        }
    }

    /// Look up a flag; unknown names are treated as disabled.
    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

impl Default for CapabilitySnapshot {
    fn default() -> Self {
        Self::empty()
    }
}
