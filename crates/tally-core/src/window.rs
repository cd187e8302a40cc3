//! Half-open query windows.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SummaryError;

/// A half-open time range `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Window {
    /// Creates a window, rejecting empty or inverted ranges.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, SummaryError> {
        if from >= to {
            return Err(SummaryError::InvalidRange { from, to });
        }
        Ok(Self { from, to })
    }

    /// The window from the earliest representable instant up to `now`.
    pub fn all_time(now: DateTime<Utc>) -> Result<Self, SummaryError> {
        Self::new(DateTime::<Utc>::MIN_UTC, now)
    }

    /// True if the window starts at the earliest representable instant.
    pub fn is_all_time(&self) -> bool {
        self.from == DateTime::<Utc>::MIN_UTC
    }

    /// Milliseconds of `[start, end)` that fall inside the window.
    pub fn overlap_ms(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
        let start = start.max(self.from);
        let end = end.min(self.to);
        if end <= start {
            return 0;
        }
        (end - start).num_milliseconds()
    }

    /// The window grown by `reach` on both sides, saturating at the
    /// representable bounds.
    #[must_use]
    pub fn widen(&self, reach: Duration) -> Self {
        Self {
            from: self
                .from
                .checked_sub_signed(reach)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            to: self
                .to
                .checked_add_signed(reach)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

/// How a query names its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSpec {
    /// A fixed range.
    Between(Window),
    /// From an instant up to whatever "now" is when the query runs.
    Since(DateTime<Utc>),
}

impl WindowSpec {
    /// Everything from account inception to now.
    pub const fn all_time() -> Self {
        Self::Since(DateTime::<Utc>::MIN_UTC)
    }

    /// Pins the window against `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<Window, SummaryError> {
        match *self {
            Self::Between(window) => Window::new(window.from, window.to),
            Self::Since(from) => Window::new(from, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_735_689_600 + seconds, 0).unwrap()
    }

    #[test]
    fn inverted_window_is_invalid() {
        let err = Window::new(at(10), at(5)).unwrap_err();
        assert_eq!(
            err,
            SummaryError::InvalidRange {
                from: at(10),
                to: at(5)
            }
        );
    }

    #[test]
    fn empty_window_is_invalid() {
        assert!(Window::new(at(5), at(5)).is_err());
    }

    #[test]
    fn overlap_clamps_to_bounds() {
        let window = Window::new(at(10), at(20)).unwrap();
        assert_eq!(window.overlap_ms(at(0), at(15)), 5_000);
        assert_eq!(window.overlap_ms(at(12), at(30)), 8_000);
        assert_eq!(window.overlap_ms(at(20), at(30)), 0);
        assert_eq!(window.overlap_ms(at(0), at(10)), 0);
    }

    #[test]
    fn all_time_window_spans_history() {
        let window = Window::all_time(at(0)).unwrap();
        assert!(window.is_all_time());
        assert_eq!(window.overlap_ms(at(-60), at(0)), 60_000);
    }

    #[test]
    fn widen_saturates() {
        let window = Window::all_time(at(0)).unwrap();
        let wide = window.widen(Duration::minutes(5));
        assert_eq!(wide.from, DateTime::<Utc>::MIN_UTC);
        assert_eq!(wide.to, at(300));
    }

    #[test]
    fn since_resolves_against_now() {
        let spec = WindowSpec::Since(at(0));
        assert_eq!(spec.resolve(at(30)).unwrap(), Window::new(at(0), at(30)).unwrap());
        assert!(spec.resolve(at(0)).is_err());
    }

    #[test]
    fn between_is_revalidated() {
        let spec = WindowSpec::Between(Window {
            from: at(10),
            to: at(5),
        });
        assert!(matches!(
            spec.resolve(at(100)),
            Err(SummaryError::InvalidRange { .. })
        ));
    }
}
