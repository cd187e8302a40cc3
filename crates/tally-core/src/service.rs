//! Summary queries.
//!
//! [`SummaryService`] is the single entry point: it checks that the
//! requester may see the target, resolves aliases, pins the window against
//! the clock, serves or recomputes through the cache and narrows the result
//! with the optional filter.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::aggregate::Aggregator;
use crate::alias::AliasResolver;
use crate::cache::{CacheConfig, CacheEntry, CacheKey, SummaryCache};
use crate::clock::{Clock, SystemClock};
use crate::error::SummaryError;
use crate::filter::{self, Filter};
use crate::store::EventStore;
use crate::summary::Summary;
use crate::types::IdentityId;
use crate::window::{Window, WindowSpec};

/// Target sentinel meaning "the requester's own identity".
pub const CURRENT: &str = "current";

/// A decoded summary query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRequest {
    /// Authenticated identity asking for the summary.
    pub requester: IdentityId,
    /// Identity whose summary is requested, [`CURRENT`], or an alias.
    pub target: String,
    pub window: WindowSpec,
    /// Skip the cache and aggregate from scratch.
    pub recompute: bool,
    pub filter: Option<Filter>,
}

impl SummaryRequest {
    pub fn new(requester: IdentityId, target: impl Into<String>, window: WindowSpec) -> Self {
        Self {
            requester,
            target: target.into(),
            window,
            recompute: false,
            filter: None,
        }
    }

    #[must_use]
    pub const fn recompute(mut self, recompute: bool) -> Self {
        self.recompute = recompute;
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: Option<Filter>) -> Self {
        self.filter = filter;
        self
    }
}

/// Answers summary queries for any number of concurrent callers.
///
/// Owns its cache for its whole lifetime; cached summaries go away only
/// through [`SummaryCache::invalidate`] or [`SummaryCache::clear`].
pub struct SummaryService<S> {
    aliases: AliasResolver,
    aggregator: Aggregator<S>,
    cache: SummaryCache,
    clock: Arc<dyn Clock>,
}

impl<S: EventStore> SummaryService<S> {
    pub fn new(aliases: AliasResolver, aggregator: Aggregator<S>, cache: CacheConfig) -> Self {
        let cache = SummaryCache::new(cache).with_settle_margin(aggregator.config().reach());
        Self {
            aliases,
            aggregator,
            cache,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the wall clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub const fn aliases(&self) -> &AliasResolver {
        &self.aliases
    }

    pub const fn aggregator(&self) -> &Aggregator<S> {
        &self.aggregator
    }

    pub const fn cache(&self) -> &SummaryCache {
        &self.cache
    }

    /// Returns the summary described by `request`.
    pub fn query(&self, request: &SummaryRequest) -> Result<Summary, SummaryError> {
        authorize(&request.requester, &request.target)?;
        let identity = self.aliases.canonicalize(request.requester.as_str())?;

        let now = self.clock.now();
        let window = request.window.resolve(now)?;
        tracing::debug!(
            %identity,
            from = %window.from,
            to = %window.to,
            recompute = request.recompute,
            "summary query"
        );

        let summary = match request.window {
            WindowSpec::Between(_) => self.bounded(identity, window, request.recompute, now)?,
            WindowSpec::Since(from) => self.open(identity, from, window, request.recompute, now)?,
        };
        filter::apply(summary, request.filter.as_ref())
    }

    /// Everything `target` has recorded up to now.
    pub fn all_time(
        &self,
        requester: IdentityId,
        target: impl Into<String>,
        filter: Option<Filter>,
    ) -> Result<Summary, SummaryError> {
        self.query(&SummaryRequest::new(requester, target, WindowSpec::all_time()).filter(filter))
    }

    fn bounded(
        &self,
        identity: IdentityId,
        window: Window,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<Summary, SummaryError> {
        let key = CacheKey::Bounded {
            identity: identity.clone(),
            window,
        };
        self.cache.get_or_compute(&key, force, now, |_| {
            Ok(CacheEntry {
                summary: self.aggregator.aggregate(&identity, window)?,
                settled: None,
                computed_at: now,
            })
        })
    }

    fn open(
        &self,
        identity: IdentityId,
        from: DateTime<Utc>,
        window: Window,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<Summary, SummaryError> {
        let key = CacheKey::Open {
            identity: identity.clone(),
            from,
        };
        self.cache.get_or_compute(&key, force, now, |previous| {
            let base = previous.and_then(|entry| entry.settled.as_ref());
            let extension = self.aggregator.extend(&identity, window, base)?;
            Ok(CacheEntry {
                summary: extension.summary,
                settled: extension.settled,
                computed_at: now,
            })
        })
    }
}

/// A requester may only read their own summaries.
///
/// Runs before alias resolution so that a refusal says nothing about
/// whether `target` exists.
fn authorize(requester: &IdentityId, target: &str) -> Result<(), SummaryError> {
    let target = target.trim();
    if target == CURRENT || target == requester.as_str() {
        return Ok(());
    }
    tracing::debug!(%requester, target, "refusing summary of another identity");
    Err(SummaryError::Forbidden {
        requester: requester.to_string(),
        target: target.to_string(),
    })
}
