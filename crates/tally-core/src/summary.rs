//! Aggregated durations for one identity over one window.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::dimension::{Dimension, DimensionKey};
use crate::error::SummaryError;
use crate::heartbeat::Heartbeat;
use crate::types::IdentityId;
use crate::window::Window;

/// Durations attributed to an identity within a window.
///
/// Summaries are derived data: they can be regenerated from heartbeats at
/// any time and are replaced, never edited, when recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub identity: IdentityId,
    pub window: Window,
    /// Total attributed time in milliseconds.
    pub total_ms: i64,
    /// Dimensions this summary breaks time down by.
    pub dimensions: BTreeSet<Dimension>,
    /// Milliseconds per `dimension:value` bucket.
    pub breakdown: BTreeMap<DimensionKey, i64>,
}

impl Summary {
    /// A summary with no attributed time.
    pub fn empty(
        identity: IdentityId,
        window: Window,
        dimensions: impl IntoIterator<Item = Dimension>,
    ) -> Self {
        Self {
            identity,
            window,
            total_ms: 0,
            dimensions: dimensions.into_iter().collect(),
            breakdown: BTreeMap::new(),
        }
    }

    /// Milliseconds attributed to `value` along `dimension`.
    pub fn duration_ms(&self, dimension: Dimension, value: &str) -> i64 {
        self.breakdown
            .get(&DimensionKey::new(dimension, value))
            .copied()
            .unwrap_or(0)
    }

    /// Buckets of one dimension, longest first.
    pub fn ranked(&self, dimension: Dimension) -> Vec<(&str, i64)> {
        let mut entries: Vec<(&str, i64)> = self
            .breakdown
            .iter()
            .filter(|(key, _)| key.dimension == dimension)
            .map(|(key, ms)| (key.value.as_str(), *ms))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        entries
    }

    /// Attributes `ms` to the total and to every tracked tag of `heartbeat`.
    pub(crate) fn attribute(&mut self, heartbeat: &Heartbeat, ms: i64) {
        self.total_ms += ms;
        for &dimension in &self.dimensions {
            if let Some(value) = heartbeat.tag(dimension) {
                *self
                    .breakdown
                    .entry(DimensionKey::new(dimension, value))
                    .or_insert(0) += ms;
            }
        }
    }

    /// Combines this summary with one covering the window immediately after.
    pub fn merge(&self, later: &Self) -> Result<Self, SummaryError> {
        if self.identity != later.identity {
            return Err(SummaryError::InternalAggregation(format!(
                "cannot merge summaries of {} and {}",
                self.identity, later.identity
            )));
        }
        if self.window.to != later.window.from {
            return Err(SummaryError::InternalAggregation(format!(
                "cannot merge non-adjacent windows ending {} and starting {}",
                self.window.to, later.window.from
            )));
        }

        let mut merged = self.clone();
        merged.window.to = later.window.to;
        merged.total_ms += later.total_ms;
        merged.dimensions.extend(later.dimensions.iter().copied());
        for (key, ms) in &later.breakdown {
            *merged.breakdown.entry(key.clone()).or_insert(0) += ms;
        }
        merged.check_invariants()?;
        Ok(merged)
    }

    /// Verifies that durations are non-negative and that no dimension
    /// accounts for more time than the total.
    pub fn check_invariants(&self) -> Result<(), SummaryError> {
        if self.total_ms < 0 {
            return Err(SummaryError::InternalAggregation(format!(
                "negative total duration {}ms",
                self.total_ms
            )));
        }
        let mut per_dimension: BTreeMap<Dimension, i64> = BTreeMap::new();
        for (key, &ms) in &self.breakdown {
            if ms < 0 {
                return Err(SummaryError::InternalAggregation(format!(
                    "negative duration {ms}ms for {key}"
                )));
            }
            *per_dimension.entry(key.dimension).or_insert(0) += ms;
        }
        if let Some((dimension, sum)) = per_dimension
            .into_iter()
            .find(|(_, sum)| *sum > self.total_ms)
        {
            return Err(SummaryError::InternalAggregation(format!(
                "{dimension} buckets sum to {sum}ms, above total {}ms",
                self.total_ms
            )));
        }
        Ok(())
    }
}
