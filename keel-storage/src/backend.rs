//! Backend trait for generic relational backends.
//!
//! The concrete transport (Postgres wire, a REST data API, an embedded
//! database) is out of scope; adapters implement this trait and are
//! responsible for mapping their raw errors onto `BackendError` variants.
//! Everything above this seam reasons about schema capability purely through
//! that classification.

use async_trait::async_trait;
use keel_core::BackendError;
use serde_json::{Map, Value};

/// One backend row, as loosely-typed JSON fields.
pub type Row = Map<String, Value>;

/// Minimal client surface the persistence layer consumes.
///
/// Implementations must be safe for concurrent use; the capability cache and
/// the migration orchestrator share one instance behind an `Arc`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read rows from `table`, restricted to `columns`.
    ///
    /// `limit: Some(1)` with a single column is the vehicle for schema
    /// probes: the call must be side-effect free, and a backend that does
    /// not recognize the column must surface `BackendError::UnknownColumn`
    /// (or `UnknownTable`) rather than an opaque query error.
    async fn read(
        &self,
        table: &str,
        columns: &[&str],
        limit: Option<u32>,
    ) -> Result<Vec<Row>, BackendError>;

    /// Update rows matching `matcher` (equality on every matcher field),
    /// setting `fields`. Returns the number of rows updated.
    async fn update(&self, table: &str, fields: &Row, matcher: &Row) -> Result<u64, BackendError>;

    /// Insert one row, returning it as stored (including any
    /// backend-assigned identity columns).
    async fn insert(&self, table: &str, fields: &Row) -> Result<Row, BackendError>;
}
