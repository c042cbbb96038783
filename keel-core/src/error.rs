//! Error types for KEEL operations

use thiserror::Error;

/// Errors surfaced by a backend adapter.
///
/// Every adapter is responsible for mapping its raw transport/driver errors
/// into these variants. The rest of the system never inspects raw backend
/// errors; in particular, the schema probe classifies columns by matching on
/// this enum alone. For a Postgres-backed adapter, SQLSTATE 42703 maps to
/// `UnknownColumn` and 42P01 to `UnknownTable`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Unknown column {table}.{column}")]
    UnknownColumn { table: String, column: String },

    #[error("Unknown table {table}")]
    UnknownTable { table: String },

    #[error("Backend operation timed out: {operation}")]
    Timeout { operation: String },

    #[error("Backend connection failed: {reason}")]
    Connection { reason: String },

    #[error("Permission denied on table {table}")]
    PermissionDenied { table: String },

    #[error("Query failed: {reason}")]
    Query { reason: String },
}

impl BackendError {
    /// True when the error signals a schema element is absent, as opposed to
    /// a transport or policy failure.
    pub fn is_missing_identifier(&self) -> bool {
        matches!(
            self,
            Self::UnknownColumn { .. } | Self::UnknownTable { .. }
        )
    }

    /// True when the backend as a whole could not be reached. Drives the
    /// coordinator's distinction between `Failed` and `Degraded`.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Connection { .. })
    }
}

/// Migration orchestration errors.
///
/// A single step's `apply()` failing is reported through
/// `MigrationOutcome::failed_id`, not through this enum; these variants cover
/// failures of the orchestration machinery itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MigrationError {
    #[error("Migration ledger unavailable, backend unreachable: {source}")]
    BackendUnreachable { source: BackendError },

    #[error("Migration ledger read failed: {source}")]
    LedgerRead { source: BackendError },

    #[error("Migration ledger append failed for step {step_id}: {source}")]
    LedgerAppend {
        step_id: String,
        source: BackendError,
    },

    #[error("Malformed ledger row: {reason}")]
    MalformedLedgerRow { reason: String },
}

impl MigrationError {
    /// True when the failure indicates the backend is entirely unreachable
    /// rather than a localized problem with one step or row.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::BackendUnreachable { .. } => true,
            Self::LedgerRead { source } | Self::LedgerAppend { source, .. } => {
                source.is_unreachable()
            }
            Self::MalformedLedgerRow { .. } => false,
        }
    }
}

/// Master error type for all KEEL operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeelError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

/// Result type alias for KEEL operations.
pub type KeelResult<T> = Result<T, KeelError>;
