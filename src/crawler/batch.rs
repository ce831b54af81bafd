//! Concurrent enrichment of one page's items
//!
//! Every admitted item gets its detail fields read on a pooled session. The
//! dispatcher checks a session out before spawning the item's task, so at
//! most `pool.capacity()` items are in flight and dispatch blocks while the
//! pool is drained.

use super::RetryExecutor;
use crate::extract::{
    DetailFields, EnrichedItem, ExtractError, ExtractResult, Extractor, Identity, RawItem,
};
use crate::session::{SessionError, SessionGuard, SessionPool};
use crate::{HarvestError, HarvestResult};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Result of enriching one batch
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Items whose details were read, in completion order
    pub enriched: Vec<EnrichedItem>,
    /// Items that could not be enriched, with the reason
    pub dropped: Vec<(Identity, String)>,
}

/// Fans enrichment out over a [`SessionPool`]
pub struct BatchProcessor {
    pool: Arc<SessionPool>,
    retry: RetryExecutor,
    extractor: Arc<dyn Extractor>,
    item_timeout: Duration,
}

impl BatchProcessor {
    pub fn new(
        pool: Arc<SessionPool>,
        retry: RetryExecutor,
        extractor: Arc<dyn Extractor>,
        item_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            retry,
            extractor,
            item_timeout,
        }
    }

    /// Enriches every item, dropping the ones that fail
    ///
    /// A failed item never fails the batch. Cancellation aborts all in-flight
    /// tasks, waits for them to release their sessions and returns
    /// [`HarvestError::Cancelled`].
    ///
    /// # Returns
    ///
    /// * `Ok(BatchOutcome)` - Enriched and dropped items
    /// * `Err(HarvestError)` - Cancelled, or the pool was closed
    pub async fn process(
        &self,
        items: Vec<RawItem>,
        cancel: &CancellationToken,
    ) -> HarvestResult<BatchOutcome> {
        let mut tasks = JoinSet::new();
        let mut in_flight = BTreeSet::new();

        for item in items {
            let guard = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(abort_all(&mut tasks).await),
                guard = self.pool.acquire() => guard?,
            };

            in_flight.insert(item.identity.clone());
            let retry = self.retry.clone();
            let extractor = Arc::clone(&self.extractor);
            let timeout = self.item_timeout;
            tasks.spawn(async move {
                let details = enrich(guard, &item.identity, extractor, retry, timeout).await;
                (item, details)
            });
        }

        let mut outcome = BatchOutcome::default();
        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(abort_all(&mut tasks).await),
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else { break };

            match joined {
                Ok((item, Ok(details))) => {
                    in_flight.remove(&item.identity);
                    outcome.enriched.push(EnrichedItem::new(item, details));
                }
                Ok((item, Err(e))) => {
                    in_flight.remove(&item.identity);
                    tracing::error!("Dropping {}: {}", item.identity, e);
                    outcome.dropped.push((item.identity, e.to_string()));
                }
                Err(e) => tracing::error!("Enrichment task failed: {}", e),
            }
        }

        // Whatever is left never reported back
        for identity in in_flight {
            tracing::error!("Dropping {}: enrichment task panicked", identity);
            outcome
                .dropped
                .push((identity, "enrichment task panicked".to_string()));
        }

        tracing::debug!(
            "Batch done: {} enriched, {} dropped, peak {} sessions busy",
            outcome.enriched.len(),
            outcome.dropped.len(),
            self.pool.peak_busy()
        );
        Ok(outcome)
    }
}

/// Reads one item's details on a checked-out session
///
/// Each attempt is bounded by `timeout`; a timed-out attempt is transient.
/// The session goes back to the pool when `guard` is dropped at the end.
async fn enrich(
    mut guard: SessionGuard,
    identity: &Identity,
    extractor: Arc<dyn Extractor>,
    retry: RetryExecutor,
    timeout: Duration,
) -> ExtractResult<DetailFields> {
    let label = format!("enrich {}", identity);
    let target = identity.clone();

    retry
        .run_with(&label, &mut *guard, move |session, _attempt| {
            let extractor = Arc::clone(&extractor);
            let identity = target.clone();
            Box::pin(async move {
                match tokio::time::timeout(timeout, extractor.extract_details(session, &identity))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ExtractError::Session(SessionError::Timeout {
                        operation: format!("details of {}", identity),
                        after: timeout,
                    })),
                }
            })
        })
        .await
}

async fn abort_all<T: 'static>(tasks: &mut JoinSet<T>) -> HarvestError {
    tracing::warn!("Cancelling {} enrichment tasks", tasks.len());
    tasks.shutdown().await;
    HarvestError::Cancelled
}
