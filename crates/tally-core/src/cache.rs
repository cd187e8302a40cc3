//! Summary cache with single-flight recomputation.
//!
//! # Keys and freshness
//!
//! Bounded windows are cached per `(identity, window)`. A heartbeat arriving
//! shortly after a window closes still decides the length of the last span
//! inside it, so a window only settles once its end is further in the past
//! than the settle margin (the aggregation reach). Under the default
//! [`Freshness::Permanent`] policy a summary computed after that point stays
//! fresh forever.
//!
//! Open-ended windows ("since X until now") never repeat their upper bound,
//! so they are cached per `(identity, from)`. The entry keeps the settled
//! part of the summary and later queries only aggregate what came after it.
//!
//! # Concurrency
//!
//! The slot map is the only shared state and its lock is never held while
//! aggregating. At most one computation per key runs at a time; concurrent
//! callers for that key wait for it and share its outcome, errors included.
//! Finished entries are swapped in whole.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SummaryError;
use crate::summary::Summary;
use crate::types::IdentityId;
use crate::window::Window;

/// How long a summary of a bounded window stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Fresh forever once computed after the window settled.
    #[default]
    Permanent,
    /// Fresh for a fixed time after computation.
    Ttl { ttl_ms: i64 },
}

/// Cache policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub bounded_freshness: Freshness,
    /// Open-ended summaries younger than this are served without extension.
    /// Default: 0 (always extend).
    pub open_refresh_ms: i64,
}

/// Identifies a cached summary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Bounded { identity: IdentityId, window: Window },
    Open { identity: IdentityId, from: DateTime<Utc> },
}

impl CacheKey {
    pub const fn identity(&self) -> &IdentityId {
        match self {
            Self::Bounded { identity, .. } | Self::Open { identity, .. } => identity,
        }
    }
}

/// A cached computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The summary handed to callers.
    pub summary: Summary,
    /// For open-ended keys, the part of `summary` later heartbeats cannot change.
    pub settled: Option<Summary>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Slot {
    entry: Option<Arc<CacheEntry>>,
    flight: Option<Arc<Flight>>,
}

/// An in-progress computation that other callers can wait on.
#[derive(Debug, Default)]
struct Flight {
    outcome: Mutex<Option<Result<Summary, SummaryError>>>,
    landed: Condvar,
}

impl Flight {
    fn land(&self, outcome: Result<Summary, SummaryError>) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
        self.landed.notify_all();
    }

    fn wait(&self) -> Result<Summary, SummaryError> {
        let outcome = self
            .landed
            .wait_while(
                self.outcome.lock().unwrap_or_else(PoisonError::into_inner),
                |outcome| outcome.is_none(),
            )
            .unwrap_or_else(PoisonError::into_inner);
        outcome.clone().unwrap_or_else(|| {
            Err(SummaryError::InternalAggregation(
                "computation finished without an outcome".into(),
            ))
        })
    }
}

/// Publishes the outcome of a flight even if the computation unwinds.
struct FlightGuard<'a> {
    cache: &'a SummaryCache,
    key: &'a CacheKey,
    flight: Arc<Flight>,
    landed: bool,
}

impl FlightGuard<'_> {
    fn land(mut self, outcome: Result<CacheEntry, SummaryError>) -> Result<Summary, SummaryError> {
        self.landed = true;
        self.cache.finish(self.key, &self.flight, outcome)
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.landed {
            let _ = self.cache.finish(
                self.key,
                &self.flight,
                Err(SummaryError::InternalAggregation(
                    "summary computation aborted".into(),
                )),
            );
        }
    }
}

/// Most recent summary per key.
///
/// Created with the service that owns it and emptied only through
/// [`invalidate`](Self::invalidate) or [`clear`](Self::clear).
#[derive(Debug)]
pub struct SummaryCache {
    config: CacheConfig,
    settle_margin: Duration,
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

impl Default for SummaryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl SummaryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            settle_margin: Duration::zero(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Sets how long after its end a bounded window can still change.
    #[must_use]
    pub fn with_settle_margin(mut self, margin: Duration) -> Self {
        self.settle_margin = margin.max(Duration::zero());
        self
    }

    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the cached summary for `key` if fresh, otherwise computes it.
    ///
    /// `compute` receives the previous entry for incremental work, or `None`
    /// when there is none or `force` is set. With `force` the freshness check
    /// is skipped, but a computation already in flight is still joined
    /// instead of starting a second one.
    ///
    /// On failure the previous entry is kept and every waiter gets the error.
    pub fn get_or_compute<F>(
        &self,
        key: &CacheKey,
        force: bool,
        now: DateTime<Utc>,
        compute: F,
    ) -> Result<Summary, SummaryError>
    where
        F: FnOnce(Option<&CacheEntry>) -> Result<CacheEntry, SummaryError>,
    {
        let (flight, previous) = {
            let mut slots = self.lock();
            let slot = slots.entry(key.clone()).or_default();

            if let Some(flight) = slot.flight.clone() {
                drop(slots);
                tracing::debug!(identity = %key.identity(), "joining in-flight summary computation");
                return flight.wait();
            }

            if !force {
                if let Some(entry) = slot.entry.as_ref().filter(|e| self.is_fresh(key, e, now)) {
                    tracing::debug!(identity = %key.identity(), "summary cache hit");
                    return Ok(entry.summary.clone());
                }
            }

            let flight = Arc::new(Flight::default());
            slot.flight = Some(Arc::clone(&flight));
            let previous = if force { None } else { slot.entry.clone() };
            (flight, previous)
        };

        tracing::debug!(identity = %key.identity(), force, incremental = previous.is_some(), "computing summary");
        let guard = FlightGuard {
            cache: self,
            key,
            flight,
            landed: false,
        };
        let outcome = compute(previous.as_deref());
        guard.land(outcome)
    }

    /// Drops every cached summary of `identity`.
    ///
    /// Computations already in flight still store their result.
    pub fn invalidate(&self, identity: &IdentityId) {
        let mut slots = self.lock();
        for (key, slot) in slots.iter_mut() {
            if key.identity() == identity {
                slot.entry = None;
            }
        }
        slots.retain(|_, slot| slot.entry.is_some() || slot.flight.is_some());
    }

    /// Drops every cached summary.
    pub fn clear(&self) {
        let mut slots = self.lock();
        for slot in slots.values_mut() {
            slot.entry = None;
        }
        slots.retain(|_, slot| slot.flight.is_some());
    }

    /// Number of cached summaries.
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| slot.entry.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_fresh(&self, key: &CacheKey, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        match key {
            CacheKey::Bounded { window, .. } => match self.config.bounded_freshness {
                Freshness::Permanent => window
                    .to
                    .checked_add_signed(self.settle_margin)
                    .is_some_and(|settled| entry.computed_at >= settled),
                Freshness::Ttl { ttl_ms } => (now - entry.computed_at).num_milliseconds() < ttl_ms,
            },
            CacheKey::Open { .. } => {
                now <= entry.summary.window.to
                    || (now - entry.computed_at).num_milliseconds() < self.config.open_refresh_ms
            }
        }
    }

    fn finish(
        &self,
        key: &CacheKey,
        flight: &Arc<Flight>,
        outcome: Result<CacheEntry, SummaryError>,
    ) -> Result<Summary, SummaryError> {
        let result = {
            let mut slots = self.lock();
            let slot = slots.entry(key.clone()).or_default();
            if slot
                .flight
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, flight))
            {
                slot.flight = None;
            }
            match outcome {
                Ok(entry) => {
                    let summary = entry.summary.clone();
                    slot.entry = Some(Arc::new(entry));
                    Ok(summary)
                }
                Err(err) => {
                    tracing::warn!(identity = %key.identity(), error = %err, "summary computation failed, keeping previous entry");
                    if slot.entry.is_none() && slot.flight.is_none() {
                        slots.remove(key);
                    }
                    Err(err)
                }
            }
        };
        flight.land(result.clone());
        result
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.lock().len()
    }

    /// Callers currently waiting on the flight for `key`.
    #[cfg(test)]
    fn waiters(&self, key: &CacheKey) -> usize {
        self.lock()
            .get(key)
            .and_then(|slot| slot.flight.as_ref())
            // One reference is the slot's, one the computing caller's.
            .map_or(0, |flight| Arc::strong_count(flight).saturating_sub(2))
    }
}
