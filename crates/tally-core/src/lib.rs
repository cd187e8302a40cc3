//! Summary retrieval and aggregation engine for tally.
//!
//! This crate contains the fundamental types and logic for:
//! - Aggregation: folding raw heartbeats into per-dimension durations
//! - Alias resolution: mapping requested identities to canonical ones
//! - Caching: single-flight, incrementally extended summaries
//! - Queries: the [`SummaryService`] that composes all of the above

mod aggregate;
mod alias;
mod cache;
mod clock;
pub mod dimension;
pub mod error;
pub mod filter;
mod heartbeat;
mod service;
pub mod store;
mod summary;
pub mod types;
pub mod window;

pub use aggregate::{AggregationConfig, Aggregator, Extension, aggregate_heartbeats};
pub use alias::AliasResolver;
pub use cache::{CacheConfig, CacheEntry, CacheKey, Freshness, SummaryCache};
pub use clock::{Clock, SystemClock};
pub use dimension::{Dimension, DimensionKey};
pub use error::SummaryError;
pub use filter::Filter;
pub use heartbeat::Heartbeat;
pub use service::{CURRENT, SummaryRequest, SummaryService};
pub use store::{EventStore, MemoryStore, StoreError};
pub use summary::Summary;
pub use types::{Alias, IdentityId, ValidationError};
pub use window::{Window, WindowSpec};
