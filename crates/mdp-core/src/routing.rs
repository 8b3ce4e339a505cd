//! Source id → destination routing.
//!
//! The table is read by every in-flight record and replaced wholesale on a
//! destination reconfiguration. A new mapping is always built off to the side
//! and published with a single pointer swap, so a reader holds either the old
//! or the new snapshot, never a partially updated one.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::config::DestinationEntry;
use crate::SourceId;

type Snapshot = Arc<HashMap<SourceId, Arc<DestinationEntry>>>;

#[derive(Debug, Default)]
pub struct RoutingTable {
    // the lock only guards the pointer; it is never held while a snapshot is read
    current: RwLock<Snapshot>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a complete new mapping, discarding the previous one.
    ///
    /// If `entries` carries the same source id twice, the last one wins.
    pub fn replace(&self, entries: impl IntoIterator<Item = DestinationEntry>) {
        let next: HashMap<_, _> = entries
            .into_iter()
            .map(|entry| (entry.source_id, Arc::new(entry)))
            .collect();
        let count = next.len();
        let next = Arc::new(next);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
        info!(destinations = count, "routing table replaced");
    }

    pub fn lookup(&self, source_id: SourceId) -> Option<Arc<DestinationEntry>> {
        self.snapshot().get(&source_id).cloned()
    }

    /// The mapping as of now. Later replacements do not affect the returned value.
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}
