//! The event-store seam.
//!
//! The engine never owns heartbeat storage. It reads through [`EventStore`],
//! which the SQLite layer in `tally-db` implements. [`MemoryStore`] is a
//! simple in-process implementation for embedding and tests.

use std::sync::{PoisonError, RwLock};
use std::time::Instant;

use thiserror::Error;

use crate::heartbeat::Heartbeat;
use crate::types::IdentityId;
use crate::window::Window;

/// Failures reading from an event store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The read did not finish before its deadline.
    #[error("read exceeded its deadline after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The store could not be reached or queried.
    #[error("{0}")]
    Unavailable(String),
}

/// Read access to persisted heartbeats.
pub trait EventStore: Send + Sync {
    /// Returns heartbeats of `identity` with timestamps in `[range.from, range.to)`.
    ///
    /// Results may be unordered and may contain duplicates. Implementations
    /// should give up with [`StoreError::Timeout`] once `deadline` passes.
    fn read_events(
        &self,
        identity: &IdentityId,
        range: &Window,
        deadline: Instant,
    ) -> Result<Vec<Heartbeat>, StoreError>;
}

/// An in-memory heartbeat store.
///
/// Returns heartbeats in insertion order, not time order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    heartbeats: RwLock<Vec<Heartbeat>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends heartbeats. Nothing is deduplicated.
    pub fn insert(&self, heartbeats: impl IntoIterator<Item = Heartbeat>) {
        self.heartbeats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(heartbeats);
    }

    pub fn len(&self) -> usize {
        self.heartbeats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventStore for MemoryStore {
    fn read_events(
        &self,
        identity: &IdentityId,
        range: &Window,
        deadline: Instant,
    ) -> Result<Vec<Heartbeat>, StoreError> {
        let started = Instant::now();
        if started >= deadline {
            return Err(StoreError::Timeout { elapsed_ms: 0 });
        }
        let heartbeats = self
            .heartbeats
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(heartbeats
            .iter()
            .filter(|hb| &hb.identity == identity)
            .filter(|hb| hb.timestamp >= range.from && hb.timestamp < range.to)
            .cloned()
            .collect())
    }
}
