//! In-memory mock backend.
//!
//! Used by the test suites and for local development against no real
//! backend. Supports per-column failure injection, connection-level failure
//! injection, artificial read latency, and call accounting so tests can
//! assert on probe traffic and on the exact payloads writes carry.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use keel_core::{BackendError, ColumnKey};
use serde_json::Value;
use uuid::Uuid;

use crate::backend::{Backend, Row};

#[derive(Debug, Default, Clone)]
struct MockTable {
    columns: BTreeSet<String>,
    rows: Vec<Row>,
}

/// Recorded update call: table, fields written, matcher used.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedUpdate {
    pub table: String,
    pub fields: Row,
    pub matcher: Row,
}

/// In-memory `Backend` implementation with failure injection.
#[derive(Default)]
pub struct MockBackend {
    tables: RwLock<HashMap<String, MockTable>>,
    /// Errors returned by the next reads, in order, before any table lookup.
    queued_read_errors: Mutex<VecDeque<BackendError>>,
    /// When set, every operation fails with this error (unreachable backend).
    outage: Mutex<Option<BackendError>>,
    /// Artificial latency applied to reads, for timeout tests.
    read_delay: Mutex<Option<Duration>>,
    /// Count of reads per (table, first requested column).
    read_counts: Mutex<HashMap<ColumnKey, u64>>,
    updates: Mutex<Vec<RecordedUpdate>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `table` with the given columns, replacing any existing one.
    pub fn create_table(&self, table: &str, columns: &[&str]) {
        let mut tables = self.tables.write().unwrap();
        tables.insert(
            table.to_string(),
            MockTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            },
        );
    }

    pub fn add_column(&self, table: &str, column: &str) {
        let mut tables = self.tables.write().unwrap();
        if let Some(t) = tables.get_mut(table) {
            t.columns.insert(column.to_string());
        }
    }

    pub fn drop_column(&self, table: &str, column: &str) {
        let mut tables = self.tables.write().unwrap();
        if let Some(t) = tables.get_mut(table) {
            t.columns.remove(column);
            for row in &mut t.rows {
                row.remove(column);
            }
        }
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        let tables = self.tables.read().unwrap();
        tables
            .get(table)
            .map(|t| t.columns.contains(column))
            .unwrap_or(false)
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        let tables = self.tables.read().unwrap();
        tables.get(table).map(|t| t.rows.clone()).unwrap_or_default()
    }

    /// Queue errors for upcoming reads (consumed one per read).
    pub fn queue_read_error(&self, error: BackendError) {
        self.queued_read_errors.lock().unwrap().push_back(error);
    }

    /// Put the whole backend into (or out of) an unreachable state.
    pub fn set_outage(&self, error: Option<BackendError>) {
        *self.outage.lock().unwrap() = error;
    }

    /// Delay every read by `delay` (None to clear).
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.lock().unwrap() = delay;
    }

    /// How many reads touched `(table, column)` as their first column.
    pub fn read_count(&self, table: &str, column: &str) -> u64 {
        let counts = self.read_counts.lock().unwrap();
        counts
            .get(&ColumnKey::new(table, column))
            .copied()
            .unwrap_or(0)
    }

    /// Every update call received, in order.
    pub fn updates(&self) -> Vec<RecordedUpdate> {
        self.updates.lock().unwrap().clone()
    }

    fn check_outage(&self) -> Result<(), BackendError> {
        match self.outage.lock().unwrap().as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn check_columns(table: &str, mock: &MockTable, columns: &[&str]) -> Result<(), BackendError> {
        for column in columns {
            if !mock.columns.contains(*column) {
                return Err(BackendError::UnknownColumn {
                    table: table.to_string(),
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }

    fn matches(row: &Row, matcher: &Row) -> bool {
        matcher
            .iter()
            .all(|(k, v)| row.get(k).map(|rv| rv == v).unwrap_or(false))
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn read(
        &self,
        table: &str,
        columns: &[&str],
        limit: Option<u32>,
    ) -> Result<Vec<Row>, BackendError> {
        let delay = *self.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_outage()?;

        if let Some(first) = columns.first() {
            let mut counts = self.read_counts.lock().unwrap();
            *counts.entry(ColumnKey::new(table, *first)).or_insert(0) += 1;
        }

        if let Some(err) = self.queued_read_errors.lock().unwrap().pop_front() {
            return Err(err);
        }

        let tables = self.tables.read().unwrap();
        let mock = tables.get(table).ok_or_else(|| BackendError::UnknownTable {
            table: table.to_string(),
        })?;
        Self::check_columns(table, mock, columns)?;

        let take = limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let rows = mock
            .rows
            .iter()
            .take(take)
            .map(|row| {
                columns
                    .iter()
                    .filter_map(|c| row.get(*c).map(|v| (c.to_string(), v.clone())))
                    .collect()
            })
            .collect();
        Ok(rows)
    }

    async fn update(&self, table: &str, fields: &Row, matcher: &Row) -> Result<u64, BackendError> {
        self.check_outage()?;

        let mut tables = self.tables.write().unwrap();
        let mock = tables
            .get_mut(table)
            .ok_or_else(|| BackendError::UnknownTable {
                table: table.to_string(),
            })?;
        let field_names: Vec<&str> = fields.keys().map(String::as_str).collect();
        Self::check_columns(table, mock, &field_names)?;

        self.updates.lock().unwrap().push(RecordedUpdate {
            table: table.to_string(),
            fields: fields.clone(),
            matcher: matcher.clone(),
        });

        let mut updated = 0;
        for row in &mut mock.rows {
            if Self::matches(row, matcher) {
                for (k, v) in fields {
                    row.insert(k.clone(), v.clone());
                }
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn insert(&self, table: &str, fields: &Row) -> Result<Row, BackendError> {
        self.check_outage()?;

        let mut tables = self.tables.write().unwrap();
        let mock = tables
            .get_mut(table)
            .ok_or_else(|| BackendError::UnknownTable {
                table: table.to_string(),
            })?;
        let field_names: Vec<&str> = fields.keys().map(String::as_str).collect();
        Self::check_columns(table, mock, &field_names)?;

        let mut row = fields.clone();
        if mock.columns.contains("id") && !row.contains_key("id") {
            row.insert("id".to_string(), Value::String(Uuid::now_v7().to_string()));
        }
        mock.rows.push(row.clone());
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_read_unknown_column_is_classified() {
        let backend = MockBackend::new();
        backend.create_table("videos", &["id", "status"]);

        let err = backend
            .read("videos", &["manual_product_name"], Some(1))
            .await
            .unwrap_err();
        assert!(err.is_missing_identifier());
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_update_matches() {
        let backend = MockBackend::new();
        backend.create_table("videos", &["id", "file_path", "status"]);

        let inserted = backend
            .insert(
                "videos",
                &row(&[
                    ("file_path", json!("clips/a.mp4")),
                    ("status", json!("processing")),
                ]),
            )
            .await
            .unwrap();
        let id = inserted.get("id").unwrap().clone();

        let updated = backend
            .update(
                "videos",
                &row(&[("status", json!("complete"))]),
                &row(&[("id", id)]),
            )
            .await
            .unwrap();
        assert_eq!(updated, 1);
        assert_eq!(backend.rows("videos")[0]["status"], json!("complete"));
    }

    #[tokio::test]
    async fn test_outage_fails_every_operation() {
        let backend = MockBackend::new();
        backend.create_table("videos", &["id"]);
        backend.set_outage(Some(BackendError::Connection {
            reason: "refused".to_string(),
        }));

        assert!(backend.read("videos", &["id"], Some(1)).await.is_err());
        assert!(backend.insert("videos", &Row::new()).await.is_err());

        backend.set_outage(None);
        assert!(backend.read("videos", &["id"], Some(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_read_count_accounting() {
        let backend = MockBackend::new();
        backend.create_table("videos", &["id", "status"]);

        backend.read("videos", &["status"], Some(1)).await.unwrap();
        backend.read("videos", &["status"], Some(1)).await.unwrap();
        assert_eq!(backend.read_count("videos", "status"), 2);
        assert_eq!(backend.read_count("videos", "id"), 0);
    }
}
