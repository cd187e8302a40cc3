//! Narrowing summaries to one dimension value.

use std::fmt;
use std::str::FromStr;

use crate::dimension::{Dimension, DimensionKey};
use crate::error::SummaryError;
use crate::summary::Summary;

/// A single `dimension = value` constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Filter {
    pub dimension: Dimension,
    pub value: String,
}

impl Filter {
    pub fn new(dimension: Dimension, value: impl Into<String>) -> Self {
        Self {
            dimension,
            value: value.into(),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.dimension, self.value)
    }
}

impl FromStr for Filter {
    type Err = SummaryError;

    /// Parses `dimension=value`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((dimension, value)) = s.split_once('=') else {
            return Err(SummaryError::UnknownDimension(s.to_string()));
        };
        Ok(Self::new(dimension.parse()?, value.trim()))
    }
}

/// Derives the part of `summary` matching `filter`.
///
/// Without a filter the summary is returned unchanged. With one, the total
/// becomes the matching bucket and only that bucket is kept. Works purely on
/// the aggregate; heartbeats are never re-read.
pub fn apply(summary: Summary, filter: Option<&Filter>) -> Result<Summary, SummaryError> {
    let Some(filter) = filter else {
        return Ok(summary);
    };
    if !summary.dimensions.contains(&filter.dimension) {
        return Err(SummaryError::UnknownDimension(filter.dimension.to_string()));
    }

    let key = DimensionKey::new(filter.dimension, filter.value.clone());
    let matched = summary.breakdown.get(&key).copied().unwrap_or(0);

    let mut narrowed = summary;
    narrowed.total_ms = matched;
    narrowed.dimensions.retain(|dimension| *dimension == filter.dimension);
    narrowed.breakdown.clear();
    if matched > 0 {
        narrowed.breakdown.insert(key, matched);
    }
    Ok(narrowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::Heartbeat;
    use crate::types::IdentityId;
    use crate::window::Window;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_735_689_600 + seconds, 0).unwrap()
    }

    fn sample() -> Summary {
        let alice = IdentityId::new("alice").unwrap();
        let mut summary = Summary::empty(
            alice.clone(),
            Window::new(at(0), at(90)).unwrap(),
            [Dimension::Project, Dimension::Language],
        );
        let foo = Heartbeat::new("a", alice.clone(), at(0))
            .with(Dimension::Project, "foo")
            .with(Dimension::Language, "rust");
        let bar = Heartbeat::new("b", alice, at(60))
            .with(Dimension::Project, "bar")
            .with(Dimension::Language, "go");
        summary.attribute(&foo, 60_000);
        summary.attribute(&bar, 30_000);
        summary
    }

    #[test]
    fn no_filter_is_identity() {
        let summary = sample();
        assert_eq!(apply(summary.clone(), None).unwrap(), summary);
    }

    #[test]
    fn filter_keeps_matching_bucket_only() {
        let filtered = apply(sample(), Some(&Filter::new(Dimension::Project, "foo"))).unwrap();
        assert_eq!(filtered.total_ms, 60_000);
        assert_eq!(filtered.breakdown.len(), 1);
        assert_eq!(filtered.duration_ms(Dimension::Project, "foo"), 60_000);
        assert_eq!(filtered.window, sample().window);
        assert!(filtered.check_invariants().is_ok());
    }

    #[test]
    fn filter_without_match_is_zero() {
        let filtered = apply(sample(), Some(&Filter::new(Dimension::Project, "baz"))).unwrap();
        assert_eq!(filtered.total_ms, 0);
        assert!(filtered.breakdown.is_empty());
    }

    #[test]
    fn filter_on_untracked_dimension_fails() {
        let result = apply(sample(), Some(&Filter::new(Dimension::Machine, "laptop")));
        assert_eq!(
            result,
            Err(SummaryError::UnknownDimension("machine".into()))
        );
    }

    #[test]
    fn parses_dimension_value_pairs() {
        let filter: Filter = "language=rust".parse().unwrap();
        assert_eq!(filter, Filter::new(Dimension::Language, "rust"));
        assert_eq!(filter.to_string(), "language=rust");
    }

    #[test]
    fn parse_rejects_unknown_dimension() {
        assert!(matches!(
            "os=linux".parse::<Filter>(),
            Err(SummaryError::UnknownDimension(_))
        ));
        assert!("project".parse::<Filter>().is_err());
    }
}
