//! Listing pagination
//!
//! A [`PaginationController`] moves the navigation session from one listing
//! page to the next by trying its strategies in order. The first strategy
//! whose control becomes actionable and accepts a click wins.

use super::RetryExecutor;
use crate::config::{Config, PaginationEntry};
use crate::session::{Element, Locator, Session, SessionError, SessionResult, WaitCondition};
use std::fmt;
use std::time::Duration;

/// Placeholder in a strategy's text replaced by the next page number
const NEXT_PAGE_PLACEHOLDER: &str = "{next}";

/// Where the listing stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginationState {
    /// Showing page `n` (1-based)
    OnPage(u32),
    /// No strategy could reach another page
    Exhausted,
    /// The navigation session is unusable
    Error(String),
}

impl fmt::Display for PaginationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnPage(page) => write!(f, "on page {}", page),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Error(message) => write!(f, "error: {}", message),
        }
    }
}

/// One way of reaching the next page
#[derive(Debug, Clone)]
pub struct PaginationStrategy {
    name: String,
    selector: String,
    text: Option<String>,
    timeout: Duration,
}

impl PaginationStrategy {
    pub fn new(
        name: impl Into<String>,
        selector: impl Into<String>,
        text: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            selector: selector.into(),
            text,
            timeout,
        }
    }

    pub fn from_entry(entry: &PaginationEntry) -> Self {
        Self::new(
            entry.name.clone(),
            entry.selector.clone(),
            entry.text.clone(),
            Duration::from_millis(entry.timeout_ms),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Locator of this strategy's control when moving to `next_page`
    pub fn locator(&self, next_page: u32) -> Locator {
        let locator = Locator::css(&self.selector);
        match &self.text {
            Some(text) => locator
                .with_exact_text(text.replace(NEXT_PAGE_PLACEHOLDER, &next_page.to_string())),
            None => locator,
        }
    }
}

enum StrategyOutcome {
    Advanced(String),
    NoneApplied,
    SessionLost(String),
}

/// Drives the navigation session through the listing
pub struct PaginationController {
    strategies: Vec<PaginationStrategy>,
    ready: Locator,
    page_load_timeout: Duration,
    settle_delay: Duration,
    retry: RetryExecutor,
    state: PaginationState,
    page: u32,
    last_strategy: Option<String>,
}

impl PaginationController {
    /// Creates a controller positioned on page 1
    ///
    /// # Arguments
    ///
    /// * `strategies` - Tried in order on every advance
    /// * `ready` - Present once a listing page has rendered
    /// * `page_load_timeout` - Bound on the settle wait after a click
    /// * `settle_delay` - Fixed pause after every successful advance
    /// * `retry` - Applied to the click
    pub fn new(
        strategies: Vec<PaginationStrategy>,
        ready: Locator,
        page_load_timeout: Duration,
        settle_delay: Duration,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            strategies,
            ready,
            page_load_timeout,
            settle_delay,
            retry,
            state: PaginationState::OnPage(1),
            page: 1,
            last_strategy: None,
        }
    }

    pub fn from_config(config: &Config, retry: RetryExecutor) -> Self {
        Self::new(
            config.pagination.iter().map(PaginationStrategy::from_entry).collect(),
            Locator::css(&config.target.ready_selector),
            config.harvest.page_load_timeout(),
            config.harvest.settle_delay(),
            retry,
        )
    }

    pub fn state(&self) -> &PaginationState {
        &self.state
    }

    /// Page currently shown, or the last page reached before stopping
    pub fn current_page(&self) -> u32 {
        self.page
    }

    /// Name of the strategy used by the most recent successful advance
    pub fn last_strategy(&self) -> Option<&str> {
        self.last_strategy.as_deref()
    }

    /// Leaves `Exhausted` so the next advance tries every strategy again
    /// from the page last reached
    ///
    /// `Error` stays terminal.
    pub fn rearm(&mut self) {
        if self.state == PaginationState::Exhausted {
            tracing::debug!("Pagination rearmed on page {}", self.page);
            self.state = PaginationState::OnPage(self.page);
        }
    }

    /// Moves the listing to the next page
    ///
    /// Terminal states are sticky: once `Exhausted` or `Error`, the session
    /// is not touched again until [`rearm`](Self::rearm).
    pub async fn advance(&mut self, session: &mut dyn Session) -> PaginationState {
        let current = match &self.state {
            PaginationState::OnPage(page) => *page,
            terminal => return terminal.clone(),
        };
        let next = current.saturating_add(1);

        self.state = match self.try_strategies(session, next).await {
            StrategyOutcome::Advanced(name) => {
                tracing::info!("Advanced to page {} via '{}'", next, name);
                self.last_strategy = Some(name);
                self.page = next;
                PaginationState::OnPage(next)
            }
            StrategyOutcome::NoneApplied => {
                tracing::info!("No pagination strategy applies after page {}", current);
                PaginationState::Exhausted
            }
            StrategyOutcome::SessionLost(message) => {
                tracing::error!("Pagination stopped on page {}: {}", current, message);
                PaginationState::Error(message)
            }
        };
        self.state.clone()
    }

    async fn try_strategies(&self, session: &mut dyn Session, next: u32) -> StrategyOutcome {
        for strategy in &self.strategies {
            match self.try_strategy(strategy, session, next).await {
                Ok(true) => return StrategyOutcome::Advanced(strategy.name.clone()),
                Ok(false) => {
                    tracing::debug!("Pagination strategy '{}' not available", strategy.name);
                }
                Err(SessionError::Closed) => {
                    return StrategyOutcome::SessionLost("navigation session closed".to_string());
                }
                Err(e) => {
                    tracing::warn!("Pagination strategy '{}' failed: {}", strategy.name, e);
                }
            }
        }
        StrategyOutcome::NoneApplied
    }

    /// Returns `Ok(false)` when the strategy's control never became actionable
    async fn try_strategy(
        &self,
        strategy: &PaginationStrategy,
        session: &mut dyn Session,
        next: u32,
    ) -> SessionResult<bool> {
        let locator = strategy.locator(next);
        let actionable = WaitCondition::Actionable(locator.clone());
        if !session.wait_until(&actionable, strategy.timeout).await? {
            return Ok(false);
        }

        let label = format!("pagination '{}' to page {}", strategy.name, next);
        self.retry
            .run_with(&label, session, move |session, _attempt| {
                let locator = locator.clone();
                Box::pin(async move { click_first(session, &locator).await })
            })
            .await?;

        let settled = WaitCondition::Present(self.ready.clone());
        match session.wait_until(&settled, self.page_load_timeout).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                "Page {} not ready after {:?}; continuing",
                next,
                self.page_load_timeout
            ),
            Err(SessionError::Closed) => return Err(SessionError::Closed),
            Err(e) => tracing::warn!("Settle wait on page {} failed: {}", next, e),
        }

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        Ok(true)
    }
}

/// Clicks the first actionable element matching `locator`
///
/// A control that vanished between the wait and the click is reported as a
/// stale element so the click is retried.
async fn click_first(session: &mut dyn Session, locator: &Locator) -> SessionResult<()> {
    let target = session
        .query(locator)
        .await?
        .into_iter()
        .find(Element::is_actionable)
        .ok_or_else(|| SessionError::StaleElement {
            handle: locator.to_string(),
        })?;
    session.click(&target).await
}
