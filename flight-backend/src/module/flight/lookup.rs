//! Tiered flight lookup: cache, then store, then a resolver task with an
//! inline fallback.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use flight_common::{FlightQuery, FlightQueryKey, FlightRecord};
use tracing::{debug, info, warn};

use super::resolver::{FlightResolver, ResolutionOutcome};
use super::task_queue::{TaskOutcome, TaskQueue, dispatch_and_wait};
use crate::module::cache::{FlightCache, cache_record, cached_record};
use crate::module::store::FlightStore;

/// The only errors a caller of [`LookupOrchestrator::lookup`] sees
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Flight data retrieval failed: {0}")]
    NotFound(String),
}

/// Tier that answered a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    Cache,
    Store,
    Task,
    Inline,
}

impl fmt::Display for LookupSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LookupSource::Cache => "cache",
            LookupSource::Store => "store",
            LookupSource::Task => "task queue",
            LookupSource::Inline => "inline resolution",
        };
        f.write_str(name)
    }
}

pub struct LookupOrchestrator {
    cache: Arc<dyn FlightCache>,
    store: Arc<dyn FlightStore>,
    resolver: Arc<FlightResolver>,
    queue: Arc<dyn TaskQueue>,
    task_timeout: Duration,
    cache_ttl: Duration,
}

impl LookupOrchestrator {
    pub fn new(
        cache: Arc<dyn FlightCache>,
        store: Arc<dyn FlightStore>,
        resolver: Arc<FlightResolver>,
        queue: Arc<dyn TaskQueue>,
        task_timeout: Duration,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            store,
            resolver,
            queue,
            task_timeout,
            cache_ttl,
        }
    }

    pub async fn lookup(&self, query: &FlightQuery) -> Result<FlightRecord, LookupError> {
        self.lookup_with_source(query).await.map(|(record, _)| record)
    }

    /// Like [`lookup`](Self::lookup), also reporting which tier answered.
    pub async fn lookup_with_source(
        &self,
        query: &FlightQuery,
    ) -> Result<(FlightRecord, LookupSource), LookupError> {
        let key = query
            .to_key()
            .map_err(|e| LookupError::InvalidInput(e.to_string()))?;

        if let Some(record) = cached_record(self.cache.as_ref(), &key).await {
            return Ok(self.answered(&key, record, LookupSource::Cache));
        }

        if let Some(record) = self.stored_record(&key).await {
            cache_record(self.cache.as_ref(), &record, self.cache_ttl).await;
            return Ok(self.answered(&key, record, LookupSource::Store));
        }

        let outcome =
            dispatch_and_wait(self.queue.as_ref(), query.clone(), self.task_timeout).await;
        let reason = match outcome {
            TaskOutcome::Completed(ResolutionOutcome::Success(record)) => {
                return Ok(self.answered(&key, record, LookupSource::Task));
            }
            TaskOutcome::Completed(outcome) => format!("task ended with {}", outcome.kind()),
            TaskOutcome::TimedOut => format!("no task result within {:?}", self.task_timeout),
            TaskOutcome::DispatchFailed(reason) => reason,
        };
        warn!("Resolver task for {} did not succeed ({}), resolving inline", key, reason);

        // a worker that outlived the timeout, or a concurrent request, may have stored it
        if let Some(record) = self.stored_record(&key).await {
            return Ok(self.answered(&key, record, LookupSource::Store));
        }

        let failure = match self.resolver.resolve(&key).await {
            ResolutionOutcome::Success(record) => {
                return Ok(self.answered(&key, record, LookupSource::Inline));
            }
            ResolutionOutcome::NoData(reason) | ResolutionOutcome::TransientError(reason) => reason,
        };

        if let Some(record) = self.stored_record(&key).await {
            return Ok(self.answered(&key, record, LookupSource::Store));
        }

        warn!("Lookup failed for {}: {}", key, failure);
        Err(LookupError::NotFound(failure))
    }

    /// Store read; a failing store counts as a miss.
    async fn stored_record(&self, key: &FlightQueryKey) -> Option<FlightRecord> {
        match self.store.find(key).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Store lookup failed for {} on {}: {}", key, self.store.backend_name(), e);
                None
            }
        }
    }

    fn answered(
        &self,
        key: &FlightQueryKey,
        record: FlightRecord,
        source: LookupSource,
    ) -> (FlightRecord, LookupSource) {
        match source {
            LookupSource::Cache | LookupSource::Store => {
                debug!("Flight {} found in {}", key, source)
            }
            LookupSource::Task | LookupSource::Inline => {
                info!("Flight {} resolved by {}", key, source)
            }
        }
        (record, source)
    }
}
