//! Harvest coordinator - main run orchestration
//!
//! This module contains the run loop that ties everything together:
//! - Loading the checkpoint and seeding deduplication
//! - Building the session pool and the navigation session
//! - Replaying pagination up to the checkpoint
//! - Extracting, enriching and persisting one page at a time
//! - Tearing sessions down on every outcome

use super::{BatchProcessor, PaginationController, PaginationState, RetryExecutor, RetryPolicy};
use crate::config::Config;
use crate::extract::{Extractor, ExtractorRegistry, ProbeOutcome, RawItem};
use crate::output::{open_sink, OutputSink};
use crate::session::{
    build_http_client, HttpSessionFactory, Locator, Session, SessionFactory, SessionPool,
    WaitCondition,
};
use crate::state::{Deduplicator, ExitReason, RunState, RunSummary};
use crate::storage::{Checkpoint, CheckpointStore, JsonCheckpointStore};
use crate::{HarvestError, HarvestResult};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Sessions owned by one run, torn down whatever the outcome
#[derive(Default)]
struct RunResources {
    pool: Option<Arc<SessionPool>>,
    navigator: Option<Box<dyn Session>>,
}

/// Main harvest coordinator
pub struct Coordinator {
    config: Arc<Config>,
    factory: Arc<dyn SessionFactory>,
    registry: ExtractorRegistry,
    checkpoints: Box<dyn CheckpointStore>,
    sink: Box<dyn OutputSink>,
    retry: RetryExecutor,
    cancel: CancellationToken,
    state: RunState,
    summary: RunSummary,
    admitted: usize,
}

impl Coordinator {
    /// Creates a coordinator from explicit collaborators
    ///
    /// # Arguments
    ///
    /// * `config` - Run parameters
    /// * `factory` - Creates the pooled sessions and the navigation session
    /// * `registry` - Extraction strategies in priority order
    /// * `checkpoints` - Where progress is persisted
    /// * `sink` - Where enriched records are appended
    /// * `retry` - Retry policy for clicks, navigation and enrichment
    /// * `cancel` - Fires to stop the run
    pub fn new(
        config: Arc<Config>,
        factory: Arc<dyn SessionFactory>,
        registry: ExtractorRegistry,
        checkpoints: Box<dyn CheckpointStore>,
        sink: Box<dyn OutputSink>,
        retry: RetryExecutor,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            factory,
            registry,
            checkpoints,
            sink,
            retry,
            cancel,
            state: RunState::Init,
            summary: RunSummary::new(),
            admitted: 0,
        }
    }

    /// Wires the HTTP session backend, selector extractors, JSON checkpoint
    /// and configured output sink
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to run
    /// * `Err(HarvestError)` - The output could not be opened or the config is inconsistent
    pub fn from_config(config: Arc<Config>, cancel: CancellationToken) -> HarvestResult<Self> {
        let client = build_http_client(&config.user_agent, config.harvest.page_load_timeout())?;
        let factory = Arc::new(HttpSessionFactory::new(client));
        let registry = ExtractorRegistry::from_config(&config);
        let checkpoints = JsonCheckpointStore::new(&config.output.checkpoint_path)
            .with_fingerprint(config.search_fingerprint());
        let sink = open_sink(&config.output)?;
        let retry = RetryExecutor::new(RetryPolicy::from_config(&config.retry)?);

        Ok(Self::new(
            config,
            factory,
            registry,
            Box::new(checkpoints),
            sink,
            retry,
            cancel,
        ))
    }

    /// Current state of the run
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Counters of the last run; complete once `run` has returned
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Runs the harvest until the listing is exhausted, a bound is reached,
    /// or a fatal error occurs
    ///
    /// Sessions are closed on every outcome. On failure the checkpoint is
    /// left in place so the next run resumes after the last flushed page.
    ///
    /// # Returns
    ///
    /// * `Ok(ExitReason)` - Why the run stopped
    /// * `Err(HarvestError)` - The fatal error, including cancellation
    pub async fn run(&mut self) -> HarvestResult<ExitReason> {
        tracing::info!("Starting harvest of {}", self.config.listing_url());
        self.state = RunState::Init;
        self.summary = RunSummary::new();
        self.admitted = 0;

        let mut resources = RunResources::default();
        let result = self.drive(&mut resources).await;

        let exit = match &result {
            Ok(exit) => *exit,
            Err(HarvestError::Cancelled) => ExitReason::Cancelled,
            Err(_) => ExitReason::Failed,
        };

        if let Err(e) = &result {
            if !self.state.is_terminal() {
                self.state = RunState::Failed;
            }
            if exit == ExitReason::Cancelled {
                tracing::warn!("Harvest cancelled after page {}", self.summary.last_page);
            } else {
                tracing::error!("Harvest failed: {}", e);
            }
        }

        self.teardown(resources).await;
        self.summary.finish(exit);

        tracing::info!(
            "Harvest {}: {} pages, {} items written, {} dropped",
            exit,
            self.summary.pages_processed,
            self.summary.items_written,
            self.summary.items_dropped.len()
        );
        result
    }

    async fn drive(&mut self, resources: &mut RunResources) -> HarvestResult<ExitReason> {
        // Init
        let checkpoint = self.checkpoints.load()?;
        if !checkpoint.is_empty() {
            tracing::info!(
                "Loaded checkpoint: page {}, {} identities",
                checkpoint.last_page,
                checkpoint.processed_identities.len()
            );
        }
        self.summary.last_page = checkpoint.last_page;

        let pool = SessionPool::build(self.factory.as_ref(), self.config.harvest.pool_size).await?;
        resources.pool = Some(Arc::clone(&pool));
        // The navigator takes the slot after the last pooled one
        let navigator = resources
            .navigator
            .insert(self.factory.create(self.config.harvest.pool_size).await?);

        let mut dedup = Deduplicator::seeded(checkpoint.processed_identities.iter().cloned());
        let recovered = dedup.extend(self.sink.existing_identities()?);
        if recovered > 0 {
            tracing::warn!(
                "{} identities found in the output but not in the checkpoint",
                recovered
            );
        }

        self.open_listing(navigator.as_mut()).await?;

        // NavigateToCheckpoint
        self.transition(RunState::NavigateToCheckpoint)?;
        let mut pager = PaginationController::from_config(&self.config, self.retry.clone());
        let resume_from = checkpoint.last_page.saturating_add(1);
        if checkpoint.last_page > 0 {
            tracing::info!("Replaying pagination to page {}", resume_from);
            for _ in 0..checkpoint.last_page {
                match until_cancelled(&self.cancel, pager.advance(navigator.as_mut())).await? {
                    PaginationState::OnPage(_) => {}
                    PaginationState::Exhausted => {
                        tracing::warn!(
                            "Replay stopped at page {}; continuing from there",
                            pager.current_page()
                        );
                        pager.rearm();
                        break;
                    }
                    PaginationState::Error(message) => {
                        return Err(HarvestError::Pagination {
                            page: pager.current_page(),
                            message,
                        });
                    }
                }
            }
        }

        let mut extractor: Option<Arc<dyn Extractor>> = None;
        loop {
            if self.cancel.is_cancelled() {
                return Err(HarvestError::Cancelled);
            }

            // ProcessPage
            self.transition(RunState::ProcessPage)?;
            let page = pager.current_page();
            if page < resume_from {
                tracing::info!("Page {} already harvested; advancing", page);
            } else if page <= self.config.harvest.max_pages {
                self.process_page(page, navigator.as_mut(), &pool, &mut dedup, &mut extractor)
                    .await?;
            }

            // Advance
            self.transition(RunState::Advance)?;
            if let Some(exit) = self.bound_reached(page) {
                self.transition(RunState::Done)?;
                return Ok(exit);
            }

            match until_cancelled(&self.cancel, pager.advance(navigator.as_mut())).await? {
                PaginationState::OnPage(_) => continue,
                PaginationState::Exhausted if page < resume_from => {
                    return Err(HarvestError::Pagination {
                        page,
                        message: format!(
                            "listing ended before checkpointed page {}",
                            checkpoint.last_page
                        ),
                    });
                }
                PaginationState::Exhausted => {
                    self.checkpoints.clear()?;
                    self.transition(RunState::Done)?;
                    tracing::info!("Listing exhausted after page {}; checkpoint cleared", page);
                    return Ok(ExitReason::Exhausted);
                }
                PaginationState::Error(message) => {
                    return Err(HarvestError::Pagination { page, message });
                }
            }
        }
    }

    /// Opens the listing URL and waits for it to render
    async fn open_listing(&self, navigator: &mut dyn Session) -> HarvestResult<()> {
        let url = self.config.listing_url();
        let target = url.clone();
        until_cancelled(
            &self.cancel,
            self.retry.run_with("open listing", navigator, move |session, _attempt| {
                let url = target.clone();
                Box::pin(async move { session.navigate(&url).await })
            }),
        )
        .await??;

        let ready = WaitCondition::Present(Locator::css(&self.config.target.ready_selector));
        let timeout = self.config.harvest.page_load_timeout();
        if !until_cancelled(&self.cancel, navigator.wait_until(&ready, timeout)).await?? {
            tracing::warn!("Listing {} not ready after {:?}", url, timeout);
        }
        Ok(())
    }

    /// Extracts, enriches and persists the page the navigator shows
    ///
    /// The checkpoint for `page` is written only after its records are
    /// durable, and also when the page yielded nothing new.
    async fn process_page(
        &mut self,
        page: u32,
        navigator: &mut dyn Session,
        pool: &Arc<SessionPool>,
        dedup: &mut Deduplicator,
        selected: &mut Option<Arc<dyn Extractor>>,
    ) -> HarvestResult<()> {
        let raw = match selected {
            Some(extractor) => {
                let extractor = Arc::clone(extractor);
                let label = format!("extract page {}", page);
                until_cancelled(
                    &self.cancel,
                    self.retry.run_with(&label, navigator, move |session, _attempt| {
                        let extractor = Arc::clone(&extractor);
                        Box::pin(async move { extractor.extract_listing_page(session).await })
                    }),
                )
                .await??
            }
            None => match until_cancelled(&self.cancel, self.registry.probe(navigator)).await?? {
                ProbeOutcome::Selected { extractor, items } => {
                    *selected = Some(extractor);
                    items
                }
                ProbeOutcome::Inconclusive => {
                    tracing::warn!("No items on page {}; probing again on the next page", page);
                    Vec::new()
                }
                ProbeOutcome::NoneViable { tried } => {
                    return Err(HarvestError::NoViableExtractor { tried });
                }
            },
        };

        let found = raw.len();
        let admitted = self.admit(raw, dedup);

        if let (Some(extractor), false) = (selected.as_ref(), admitted.is_empty()) {
            let batch = BatchProcessor::new(
                Arc::clone(pool),
                self.retry.clone(),
                Arc::clone(extractor),
                self.config.harvest.item_timeout(),
            );
            let outcome = batch.process(admitted, &self.cancel).await?;

            self.sink.append_batch(&outcome.enriched)?;
            self.summary.items_written += outcome.enriched.len();
            self.summary.items_dropped.extend(outcome.dropped);
        }

        self.checkpoints
            .save(&Checkpoint::new(page, dedup.identities().clone()))?;
        self.summary.last_page = page;
        self.summary.pages_processed += 1;
        self.summary.peak_busy_sessions = pool.peak_busy();

        tracing::info!(
            "Page {} done: {} items found, {} written so far, {} dropped so far",
            page,
            found,
            self.summary.items_written,
            self.summary.items_dropped.len()
        );
        Ok(())
    }

    /// Filters out seen identities and applies the item limit
    fn admit(&mut self, raw: Vec<RawItem>, dedup: &mut Deduplicator) -> Vec<RawItem> {
        let limit = self.config.harvest.item_limit;
        let mut admitted = Vec::new();

        for item in raw {
            if limit.is_some_and(|limit| self.admitted >= limit) {
                tracing::debug!("Item limit reached; ignoring the rest of the page");
                break;
            }
            if dedup.admit(item.identity.clone()) {
                self.admitted += 1;
                admitted.push(item);
            } else {
                self.summary.duplicates_skipped += 1;
                tracing::trace!("Skipping already seen {}", item.identity);
            }
        }
        admitted
    }

    /// Returns the exit reason if the run must stop after `page`
    fn bound_reached(&self, page: u32) -> Option<ExitReason> {
        if page >= self.config.harvest.max_pages {
            tracing::info!("Reached max-pages ({})", self.config.harvest.max_pages);
            return Some(ExitReason::MaxPages);
        }
        match self.config.harvest.item_limit {
            Some(limit) if self.admitted >= limit => {
                tracing::info!("Reached item-limit ({})", limit);
                Some(ExitReason::ItemLimit)
            }
            _ => None,
        }
    }

    fn transition(&mut self, next: RunState) -> HarvestResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(HarvestError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!("Run state {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    async fn teardown(&mut self, resources: RunResources) {
        if let Some(mut navigator) = resources.navigator {
            if let Err(e) = navigator.close().await {
                tracing::warn!("Failed to close navigation session: {}", e);
            }
        }
        if let Some(pool) = resources.pool {
            self.summary.peak_busy_sessions = pool.peak_busy();
            let failures = pool.close_all(self.config.harvest.close_timeout()).await;
            if failures > 0 {
                tracing::warn!("{} sessions failed to close", failures);
            }
        }
    }
}

/// Runs `future` unless `cancel` fires first
async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    future: F,
) -> HarvestResult<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HarvestError::Cancelled),
        output = future => Ok(output),
    }
}
