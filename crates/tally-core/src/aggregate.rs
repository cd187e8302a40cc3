//! Heartbeat aggregation.
//!
//! Folds raw heartbeats into a [`Summary`] of durations per dimension.
//!
//! # Algorithm Summary
//!
//! 1. Drop heartbeats of other identities, stable-sort by timestamp and drop
//!    exact duplicates.
//! 2. Every heartbeat opens a span that ends at the next heartbeat. Spans
//!    between two heartbeats of the same context (project, language, editor,
//!    machine) that are at most `collapse_gap_ms` apart count in full, so a
//!    run of heartbeats becomes one continuous span. Any other span (context
//!    change, long pause, last heartbeat) is capped at `max_heartbeat_ms`.
//! 3. Spans are clamped to the window and added to the total and to each
//!    dimension bucket of the opening heartbeat.
//!
//! Spans depend only on the heartbeats, never on the window, so summaries of
//! adjacent windows add up to the summary of their union. Reads therefore
//! reach `max(collapse_gap_ms, max_heartbeat_ms)` beyond both window edges.

use std::collections::BTreeSet;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::dimension::Dimension;
use crate::error::SummaryError;
use crate::heartbeat::Heartbeat;
use crate::store::EventStore;
use crate::summary::Summary;
use crate::types::IdentityId;
use crate::window::Window;

/// Configuration for heartbeat aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Same-context heartbeats at most this far apart form one continuous span.
    /// Default: 300000 (5 minutes).
    pub collapse_gap_ms: i64,

    /// Longest span a heartbeat may claim when it does not continue into a
    /// same-context heartbeat.
    /// Default: 120000 (2 minutes).
    pub max_heartbeat_ms: i64,

    /// Deadline for a single event-store read.
    /// Default: 10000 (10 seconds).
    pub store_timeout_ms: u64,

    /// Dimensions to break durations down by. Default: all of them.
    pub dimensions: BTreeSet<Dimension>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            collapse_gap_ms: 300_000,  // 5 minutes
            max_heartbeat_ms: 120_000, // 2 minutes
            store_timeout_ms: 10_000,
            dimensions: Dimension::ALL.into_iter().collect(),
        }
    }
}

impl AggregationConfig {
    /// How far beyond a window a span may start or end.
    ///
    /// A heartbeat this far past a window's end can still change the window.
    pub fn reach(&self) -> Duration {
        Duration::milliseconds(self.collapse_gap_ms.max(self.max_heartbeat_ms).max(0))
    }
}

/// Result of extending an open-ended summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    /// Summary up to the last heartbeat seen. Spans before that heartbeat are
    /// final; later heartbeats can only change the span it opens.
    pub settled: Option<Summary>,
    /// Summary of the whole requested window.
    pub summary: Summary,
}

/// Reads heartbeats from a store and aggregates them.
///
/// This is the only component that touches raw heartbeats.
#[derive(Debug)]
pub struct Aggregator<S> {
    store: S,
    config: AggregationConfig,
}

impl<S: EventStore> Aggregator<S> {
    pub const fn new(store: S, config: AggregationConfig) -> Self {
        Self { store, config }
    }

    pub const fn config(&self) -> &AggregationConfig {
        &self.config
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Aggregates the heartbeats of `identity` within `window`.
    pub fn aggregate(&self, identity: &IdentityId, window: Window) -> Result<Summary, SummaryError> {
        let window = Window::new(window.from, window.to)?;
        let events = self.read(identity, window)?;
        fold_spans(identity, window, &events, &self.config)
    }

    /// Aggregates `window` by adding only what happened after `base`.
    ///
    /// `base` must be a settled summary starting at `window.from`, as
    /// returned in an earlier [`Extension`]. Without a base the whole window
    /// is aggregated.
    pub fn extend(
        &self,
        identity: &IdentityId,
        window: Window,
        base: Option<&Summary>,
    ) -> Result<Extension, SummaryError> {
        let window = Window::new(window.from, window.to)?;
        if let Some(base) = base {
            if base.identity != *identity || base.window.from != window.from {
                return Err(SummaryError::InternalAggregation(format!(
                    "settled summary for {} from {} cannot extend {} from {}",
                    base.identity, base.window.from, identity, window.from
                )));
            }
            if base.window.to >= window.to {
                tracing::debug!(%identity, "settled summary reaches past window, aggregating in full");
                return self.extend(identity, window, None);
            }
        }

        let start = base.map_or(window.from, |base| base.window.to);
        let delta = Window::new(start, window.to)?;
        let events = self.read(identity, delta)?;

        let settle_at = events
            .iter()
            .map(|hb| hb.timestamp)
            .filter(|ts| *ts >= start && *ts < window.to)
            .max();
        let (fresh_settled, tail_window) = match settle_at {
            Some(at) if at > start => (
                Some(fold_spans(identity, Window::new(start, at)?, &events, &self.config)?),
                Window::new(at, window.to)?,
            ),
            _ => (None, delta),
        };

        let settled = match (base, fresh_settled) {
            (Some(base), Some(fresh)) => Some(base.merge(&fresh)?),
            (Some(base), None) => Some(base.clone()),
            (None, fresh) => fresh,
        };
        let tail = fold_spans(identity, tail_window, &events, &self.config)?;
        let summary = match &settled {
            Some(settled) => settled.merge(&tail)?,
            None => tail,
        };

        tracing::debug!(
            %identity,
            delta_from = %start,
            delta_events = events.len(),
            total_ms = summary.total_ms,
            "extended summary"
        );

        Ok(Extension { settled, summary })
    }

    fn read(&self, identity: &IdentityId, window: Window) -> Result<Vec<Heartbeat>, SummaryError> {
        let range = window.widen(self.config.reach());
        let deadline = Instant::now() + StdDuration::from_millis(self.config.store_timeout_ms);
        let raw = self.store.read_events(identity, &range, deadline)?;
        tracing::debug!(%identity, from = %range.from, to = %range.to, count = raw.len(), "read heartbeats");
        Ok(prepare(identity, raw))
    }
}

/// Aggregates heartbeats that are already in memory.
///
/// Heartbeats may be in any order and may include duplicates or records of
/// other identities, which are skipped.
pub fn aggregate_heartbeats(
    identity: &IdentityId,
    window: Window,
    heartbeats: Vec<Heartbeat>,
    config: &AggregationConfig,
) -> Result<Summary, SummaryError> {
    let window = Window::new(window.from, window.to)?;
    let events = prepare(identity, heartbeats);
    fold_spans(identity, window, &events, config)
}

/// Filters, sorts and deduplicates raw heartbeats.
fn prepare(identity: &IdentityId, raw: Vec<Heartbeat>) -> Vec<Heartbeat> {
    let total = raw.len();
    let mut events: Vec<Heartbeat> = raw
        .into_iter()
        .filter(|hb| hb.identity == *identity)
        .collect();
    if events.len() < total {
        tracing::warn!(
            %identity,
            skipped = total - events.len(),
            "skipped heartbeats belonging to another identity"
        );
    }
    // Stable: ties keep store order.
    events.sort_by_key(|hb| hb.timestamp);
    events.dedup_by(|next, prev| next.duplicates(prev));
    events
}

/// Attributes the spans of sorted heartbeats to `window`.
fn fold_spans(
    identity: &IdentityId,
    window: Window,
    events: &[Heartbeat],
    config: &AggregationConfig,
) -> Result<Summary, SummaryError> {
    let mut summary = Summary::empty(identity.clone(), window, config.dimensions.iter().copied());

    for (idx, heartbeat) in events.iter().enumerate() {
        if heartbeat.timestamp >= window.to {
            break;
        }
        let span_ms = span_ms(heartbeat, events.get(idx + 1), config);
        if span_ms < 0 {
            return Err(SummaryError::InternalAggregation(format!(
                "heartbeat {} produced a negative span of {span_ms}ms",
                heartbeat.id
            )));
        }
        let end = span_end(heartbeat.timestamp, span_ms);
        let attributed = window.overlap_ms(heartbeat.timestamp, end);
        if attributed > 0 {
            summary.attribute(heartbeat, attributed);
        }
    }

    summary.check_invariants()?;
    Ok(summary)
}

/// Length of the span opened by `current`.
fn span_ms(current: &Heartbeat, next: Option<&Heartbeat>, config: &AggregationConfig) -> i64 {
    let cap = config.max_heartbeat_ms.max(0);
    let Some(next) = next else {
        return cap;
    };
    let gap = (next.timestamp - current.timestamp).num_milliseconds();
    if current.context() == next.context() && gap <= config.collapse_gap_ms {
        gap
    } else {
        gap.min(cap)
    }
}

fn span_end(start: DateTime<Utc>, span_ms: i64) -> DateTime<Utc> {
    start
        .checked_add_signed(Duration::milliseconds(span_ms))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use chrono::TimeZone;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0)
            .single()
            .expect("valid test timestamp")
            + Duration::seconds(seconds)
    }

    fn alice() -> IdentityId {
        IdentityId::new("alice").unwrap()
    }

    fn window(from: i64, to: i64) -> Window {
        Window::new(ts(from), ts(to)).unwrap()
    }

    fn project(id: &str, seconds: i64, name: &str) -> Heartbeat {
        Heartbeat::new(id, alice(), ts(seconds)).with(Dimension::Project, name)
    }

    fn aggregate(events: Vec<Heartbeat>, from: i64, to: i64) -> Summary {
        aggregate_heartbeats(&alice(), window(from, to), events, &AggregationConfig::default())
            .expect("aggregation succeeds")
    }

    /// Heartbeats spread across a few projects and machines, with pauses.
    fn workday() -> Vec<Heartbeat> {
        let mut events = Vec::new();
        for i in 0..40 {
            let (name, machine) = match i / 10 {
                0 | 2 => ("foo", "laptop"),
                1 => ("bar", "laptop"),
                _ => ("foo", "desktop"),
            };
            let pause = if i % 7 == 0 { 400 } else { 0 };
            events.push(
                project(&format!("hb-{i}"), i * 45 + pause + (i / 10) * 900, name)
                    .with(Dimension::Machine, machine)
                    .with(Dimension::Language, "rust"),
            );
        }
        events
    }

    struct FailingStore;

    impl EventStore for FailingStore {
        fn read_events(
            &self,
            _identity: &IdentityId,
            _range: &Window,
            _deadline: Instant,
        ) -> Result<Vec<Heartbeat>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[test]
    fn test_project_switch_scenario() {
        let events = vec![
            project("a", 0, "foo"),
            project("b", 30, "foo"),
            project("c", 60, "bar"),
        ];
        let summary = aggregate(events, 0, 90);

        // foo: 0 -> 30 -> 60 (context change at 60); bar: 60 -> 90 (window end)
        assert_eq!(summary.total_ms, 90_000);
        assert_eq!(summary.duration_ms(Dimension::Project, "foo"), 60_000);
        assert_eq!(summary.duration_ms(Dimension::Project, "bar"), 30_000);
    }

    #[test]
    fn test_no_events_is_zero_summary() {
        let summary = aggregate(Vec::new(), 0, 3_600);
        assert_eq!(summary.total_ms, 0);
        assert!(summary.breakdown.is_empty());
    }

    #[test]
    fn test_inverted_window_is_rejected() {
        let result = aggregate_heartbeats(
            &alice(),
            Window {
                from: ts(10),
                to: ts(5),
            },
            Vec::new(),
            &AggregationConfig::default(),
        );
        assert!(matches!(result, Err(SummaryError::InvalidRange { .. })));
    }

    #[test]
    fn test_same_context_run_collapses_into_one_span() {
        // 200s apart: beyond the 120s cap but within the 300s collapse gap
        let events = vec![project("a", 0, "foo"), project("b", 200, "foo")];
        let summary = aggregate(events, 0, 200);
        assert_eq!(summary.total_ms, 200_000);
    }

    #[test]
    fn test_context_switch_is_capped() {
        let events = vec![project("a", 0, "foo"), project("b", 200, "bar")];
        let summary = aggregate(events, 0, 200);
        assert_eq!(summary.duration_ms(Dimension::Project, "foo"), 120_000);
        assert_eq!(summary.total_ms, 120_000);
    }

    #[test]
    fn test_long_pause_is_capped() {
        let events = vec![project("a", 0, "foo"), project("b", 1_000, "foo")];
        let summary = aggregate(events, 0, 1_000);
        assert_eq!(summary.total_ms, 120_000);
    }

    #[test]
    fn test_last_heartbeat_claims_at_most_the_cap() {
        let summary = aggregate(vec![project("a", 0, "foo")], 0, 3_600);
        assert_eq!(summary.total_ms, 120_000);
    }

    #[test]
    fn test_unordered_input_matches_sorted_input() {
        let sorted = workday();
        let mut shuffled = sorted.clone();
        shuffled.reverse();
        shuffled.swap(3, 17);
        assert_eq!(aggregate(sorted, 0, 6_000), aggregate(shuffled, 0, 6_000));
    }

    #[test]
    fn test_duplicates_do_not_inflate_time() {
        let once = vec![project("a", 0, "foo"), project("b", 60, "bar")];
        let twice = vec![
            project("a", 0, "foo"),
            project("a", 0, "foo"),
            project("b", 60, "bar"),
            project("b2", 60, "bar"),
        ];
        assert_eq!(aggregate(once, 0, 600), aggregate(twice, 0, 600));
    }

    #[test]
    fn test_span_starting_before_window_is_clamped() {
        let summary = aggregate(vec![project("a", -30, "foo")], 0, 60);
        // span -30 -> 90 (cap), window keeps 0 -> 60
        assert_eq!(summary.total_ms, 60_000);
    }

    #[test]
    fn test_heartbeat_at_window_end_is_excluded() {
        let summary = aggregate(vec![project("a", 60, "foo")], 0, 60);
        assert_eq!(summary.total_ms, 0);
    }

    #[test]
    fn test_foreign_identity_is_skipped() {
        let mallory = IdentityId::new("mallory").unwrap();
        let events = vec![
            project("a", 0, "foo"),
            Heartbeat::new("x", mallory, ts(10)).with(Dimension::Project, "evil"),
        ];
        let summary = aggregate(events, 0, 60);
        assert_eq!(summary.duration_ms(Dimension::Project, "evil"), 0);
        assert_eq!(summary.total_ms, 60_000);
    }

    #[test]
    fn test_untagged_heartbeats_count_toward_total_only() {
        let events = vec![
            project("a", 0, "foo"),
            Heartbeat::new("b", alice(), ts(30)),
        ];
        let summary = aggregate(events, 0, 60);
        assert_eq!(summary.total_ms, 60_000);
        assert_eq!(summary.duration_ms(Dimension::Project, "foo"), 30_000);
    }

    #[test]
    fn test_every_bucket_fits_in_total() {
        let summary = aggregate(workday(), 0, 6_000);
        assert!(summary.total_ms > 0);
        for ms in summary.breakdown.values() {
            assert!(*ms >= 0 && *ms <= summary.total_ms);
        }
        let languages: i64 = summary
            .ranked(Dimension::Language)
            .iter()
            .map(|(_, ms)| ms)
            .sum();
        assert_eq!(languages, summary.total_ms);
    }

    #[test]
    fn test_aggregation_is_deterministic() {
        let first = aggregate(workday(), 0, 6_000);
        let second = aggregate(workday(), 0, 6_000);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_adjacent_windows_add_up() {
        let full = aggregate(workday(), 0, 6_000);
        for split in [1, 44, 45, 700, 2_000, 3_333, 5_999] {
            let early = aggregate(workday(), 0, split);
            let late = aggregate(workday(), split, 6_000);
            assert_eq!(early.merge(&late).unwrap(), full, "split at {split}s");
        }
    }

    #[test]
    fn test_tracked_dimensions_follow_config() {
        let config = AggregationConfig {
            dimensions: [Dimension::Machine].into_iter().collect(),
            ..Default::default()
        };
        let summary = aggregate_heartbeats(&alice(), window(0, 6_000), workday(), &config).unwrap();
        assert!(summary.breakdown.keys().all(|key| key.dimension == Dimension::Machine));
        assert!(summary.duration_ms(Dimension::Machine, "desktop") > 0);
    }

    #[test]
    fn test_aggregator_reads_with_margin() {
        let store = MemoryStore::new();
        // Starts 30s before the window; only visible through the read margin.
        store.insert([project("a", -30, "foo")]);
        let aggregator = Aggregator::new(store, AggregationConfig::default());
        let summary = aggregator.aggregate(&alice(), window(0, 60)).unwrap();
        assert_eq!(summary.total_ms, 60_000);
    }

    #[test]
    fn test_store_failure_propagates() {
        let aggregator = Aggregator::new(FailingStore, AggregationConfig::default());
        let result = aggregator.aggregate(&alice(), window(0, 60));
        assert_eq!(
            result,
            Err(SummaryError::StoreUnavailable("connection refused".into()))
        );
    }

    #[test]
    fn test_store_deadline_becomes_timeout() {
        let config = AggregationConfig {
            store_timeout_ms: 0,
            ..Default::default()
        };
        let aggregator = Aggregator::new(MemoryStore::new(), config);
        let result = aggregator.aggregate(&alice(), window(0, 60));
        assert!(matches!(result, Err(SummaryError::Timeout { .. })));
    }

    #[test]
    fn test_extension_matches_full_aggregation() {
        let store = MemoryStore::new();
        store.insert(workday());
        let aggregator = Aggregator::new(store, AggregationConfig::default());

        let full = aggregator.aggregate(&alice(), window(-100, 6_000)).unwrap();
        for first_to in [10, 500, 1_800, 4_000] {
            let first = aggregator
                .extend(&alice(), window(-100, first_to), None)
                .unwrap();
            let second = aggregator
                .extend(&alice(), window(-100, 6_000), first.settled.as_ref())
                .unwrap();
            assert_eq!(second.summary, full, "first pass up to {first_to}s");
        }
    }

    #[test]
    fn test_extension_picks_up_heartbeats_arriving_later() {
        let store = MemoryStore::new();
        // Same-context heartbeats 200s apart: the span of "a" is only known
        // once "b" exists.
        store.insert([project("a", 0, "foo")]);
        let aggregator = Aggregator::new(store, AggregationConfig::default());

        let first = aggregator.extend(&alice(), window(0, 150), None).unwrap();
        assert_eq!(first.summary.total_ms, 120_000);
        assert_eq!(first.settled, None);

        aggregator.store().insert([project("b", 200, "foo")]);
        let second = aggregator
            .extend(&alice(), window(0, 260), first.settled.as_ref())
            .unwrap();
        let full = aggregator.aggregate(&alice(), window(0, 260)).unwrap();
        assert_eq!(second.summary, full);
        assert_eq!(second.summary.total_ms, 260_000);
        assert_eq!(second.settled.map(|s| s.window.to), Some(ts(200)));
    }

    #[test]
    fn test_extension_rejects_foreign_base() {
        let aggregator = Aggregator::new(MemoryStore::new(), AggregationConfig::default());
        let base = Summary::empty(alice(), window(10, 20), Dimension::ALL);
        let result = aggregator.extend(&alice(), window(0, 60), Some(&base));
        assert!(matches!(result, Err(SummaryError::InternalAggregation(_))));
    }
}
