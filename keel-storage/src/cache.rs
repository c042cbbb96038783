//! Capability cache with single-flight probe coalescing.
//!
//! Tracks, per `(table, column)` key, whether the column is known to exist,
//! with a freshness window. Concurrent lookups for the same key share one
//! in-flight probe instead of issuing duplicates, and the probe runs on its
//! own task so a caller that abandons its lookup (via its own timeout) never
//! cancels the probe. The result still lands in the cache for the next
//! caller.
//!
//! The cache is constructed once at startup and shared by `Arc`; there is no
//! ambient global state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use keel_core::{ColumnCapability, ColumnKey, ColumnState};
use tokio::sync::{watch, Mutex};

use crate::probe::SchemaProbe;

enum Entry {
    /// A completed probe. `Unknown` entries are retained for observability
    /// but never satisfy a lookup; `ColumnCapability::is_fresh` rejects them.
    Resolved(ColumnCapability),
    /// A probe is in flight; joiners await the sender's broadcast.
    InFlight(watch::Receiver<Option<ColumnState>>),
}

/// What the caller found under the lock; probing happens after it is
/// released so no lock is held across a suspension point.
enum Lookup {
    Hit(ColumnState),
    Join(watch::Receiver<Option<ColumnState>>),
    Lead(
        watch::Sender<Option<ColumnState>>,
        watch::Receiver<Option<ColumnState>>,
    ),
}

pub struct CapabilityCache {
    probe: SchemaProbe,
    window: Duration,
    entries: Arc<Mutex<HashMap<ColumnKey, Entry>>>,
}

impl CapabilityCache {
    pub fn new(probe: SchemaProbe, window: Duration) -> Self {
        Self {
            probe,
            window,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Whether `table.column` is currently usable.
    ///
    /// Resolves `true`/`false` and never errors for a missing column. An
    /// ambiguous probe answers `false` for this call but is not trusted as a
    /// cached negative: the next lookup re-probes.
    pub async fn column_exists(&self, table: &str, column: &str) -> bool {
        self.column_state(&ColumnKey::new(table, column)).await == ColumnState::Exists
    }

    /// The three-way state for `key`, probing on miss/stale/Unknown.
    pub async fn column_state(&self, key: &ColumnKey) -> ColumnState {
        let lookup = {
            let mut entries = self.entries.lock().await;
            match entries.get(key) {
                Some(Entry::Resolved(cap)) if cap.is_fresh(self.window) => Lookup::Hit(cap.state),
                Some(Entry::InFlight(rx)) => Lookup::Join(rx.clone()),
                _ => {
                    let (tx, rx) = watch::channel(None);
                    entries.insert(key.clone(), Entry::InFlight(rx.clone()));
                    Lookup::Lead(tx, rx)
                }
            }
        };

        match lookup {
            Lookup::Hit(state) => state,
            Lookup::Join(rx) => Self::await_probe(rx).await,
            Lookup::Lead(tx, rx) => {
                let probe = self.probe.clone();
                let entries = Arc::clone(&self.entries);
                let key = key.clone();
                // Detached so an abandoned leader does not cancel the probe.
                tokio::spawn(async move {
                    let cap = probe.probe(&key).await;
                    let state = cap.state;
                    entries.lock().await.insert(key, Entry::Resolved(cap));
                    let _ = tx.send(Some(state));
                });
                Self::await_probe(rx).await
            }
        }
    }

    /// Prefetch a set of keys concurrently. Used at startup to warm the
    /// cache for known-hot columns before assessment.
    pub async fn warm(&self, keys: &[ColumnKey]) {
        let lookups = keys.iter().map(|key| self.column_state(key));
        futures_util::future::join_all(lookups).await;
    }

    /// Drop the entry for `key`, forcing the next lookup to re-probe.
    pub async fn invalidate(&self, key: &ColumnKey) {
        self.entries.lock().await.remove(key);
    }

    /// Number of entries currently held (resolved or in flight).
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    async fn await_probe(mut rx: watch::Receiver<Option<ColumnState>>) -> ColumnState {
        loop {
            if let Some(state) = *rx.borrow() {
                return state;
            }
            if rx.changed().await.is_err() {
                // Probe task dropped without publishing. Ambiguous.
                return ColumnState::Unknown;
            }
        }
    }
}
