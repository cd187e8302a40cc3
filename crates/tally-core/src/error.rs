//! Error taxonomy for summary queries.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::store::StoreError;

/// Errors returned by [`SummaryService::query`](crate::SummaryService::query)
/// and the components it composes.
///
/// Cloneable so that every waiter of a shared computation receives the same
/// error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SummaryError {
    /// The requester asked for another identity's summary.
    #[error("{requester} may not read summaries of {target}")]
    Forbidden { requester: String, target: String },

    /// The identity is not known to the alias resolver.
    #[error("unknown identity: {0}")]
    NotFound(String),

    /// The window is empty or inverted.
    #[error("invalid range: {from} is not before {to}")]
    InvalidRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },

    /// A filter named a dimension the summary does not track.
    #[error("unknown dimension: {0}")]
    UnknownDimension(String),

    /// The event store did not answer before the read deadline.
    #[error("event store timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The event store could not be read.
    #[error("event store unavailable: {0}")]
    StoreUnavailable(String),

    /// An aggregation invariant was violated.
    #[error("internal aggregation error: {0}")]
    InternalAggregation(String),
}

impl From<StoreError> for SummaryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout { elapsed_ms } => Self::Timeout { elapsed_ms },
            StoreError::Unavailable(message) => Self::StoreUnavailable(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_onto_taxonomy() {
        assert_eq!(
            SummaryError::from(StoreError::Timeout { elapsed_ms: 250 }),
            SummaryError::Timeout { elapsed_ms: 250 }
        );
        assert_eq!(
            SummaryError::from(StoreError::Unavailable("disk gone".into())),
            SummaryError::StoreUnavailable("disk gone".into())
        );
    }

    #[test]
    fn forbidden_message_names_both_identities() {
        let err = SummaryError::Forbidden {
            requester: "eve".into(),
            target: "alice".into(),
        };
        assert_eq!(err.to_string(), "eve may not read summaries of alice");
    }
}
