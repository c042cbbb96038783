//! KEEL Core - Data types for the schema-adaptive persistence layer
//!
//! An application's belief about a remote relational backend's schema can be
//! stale, incomplete, or ahead of what the backend has actually migrated.
//! These types describe what the layer knows about individual columns, the
//! versioned capability snapshot it publishes for feature gating, and the
//! records of idempotent schema migrations. All I/O lives in `keel-storage`.

pub mod capability;
pub mod config;
pub mod error;
pub mod migration;
pub mod write;

pub use capability::{CapabilitySnapshot, ColumnCapability, ColumnKey, ColumnState};
pub use config::{KeelConfig, ReadinessState};
pub use error::{BackendError, KeelError, KeelResult, MigrationError};
pub use migration::{MigrationOutcome, MigrationRecord};
pub use write::{WriteErrorKind, WriteOutcome};
