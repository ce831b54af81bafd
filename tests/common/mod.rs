//! Scripted in-memory listing site for integration tests
//!
//! `Site` models a paginated listing with a next-arrow control and one detail
//! page per item. Sessions created by `SiteFactory` record what they do so
//! tests can assert on ordering, concurrency and teardown.

#![allow(dead_code)]

use async_trait::async_trait;
use listing_harvester::config::{parse_config, Config};
use listing_harvester::crawler::{AttemptObserver, AttemptOutcome, RetryExecutor, RetryPolicy};
use listing_harvester::extract::ExtractorRegistry;
use listing_harvester::output::{OutputError, OutputResult, OutputSink, RecordSchema};
use listing_harvester::session::{
    Element, ElementHandle, Locator, Session, SessionError, SessionFactory, SessionResult,
    WaitCondition,
};
use listing_harvester::storage::{
    Checkpoint, CheckpointStore, JsonCheckpointStore, StorageError, StorageResult,
};
use listing_harvester::{Coordinator, EnrichedItem, Identity};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const BASE: &str = "https://shop.test";
const NEXT_HANDLE: usize = usize::MAX;

/// Detail URL of item `n`
pub fn item_url(n: usize) -> String {
    format!("{}/item/{}", BASE, n)
}

/// How a detail page responds
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Fails transiently this many times, then loads
    FailTimes(u32),
    /// Never finishes loading
    Hang,
    /// Fails with a non-transient error
    Fatal,
    /// Loads after the given latency
    Latency(Duration),
}

/// Something a session did, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Clicked the next arrow, landing on the given page
    Click(u32),
    /// Read the item cards of the given page
    Extract(u32),
    /// Opened a detail page
    Detail(String),
}

pub struct Site {
    pages: Vec<Vec<usize>>,
    behaviors: Mutex<HashMap<String, Behavior>>,
    events: Mutex<Vec<Event>>,
    detail_delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    closed: AtomicUsize,
    created: AtomicUsize,
    cancel_on: Mutex<Option<(String, CancellationToken)>>,
    next_misses: Mutex<HashMap<u32, u32>>,
}

impl Site {
    /// A listing whose pages hold the given item numbers
    pub fn new(pages: Vec<Vec<usize>>) -> Self {
        Self {
            pages,
            behaviors: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            detail_delay: Duration::from_millis(20),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            cancel_on: Mutex::new(None),
            next_misses: Mutex::new(HashMap::new()),
        }
    }

    /// `count` pages of `per_page` consecutive item numbers, starting at 1
    pub fn uniform(count: usize, per_page: usize) -> Self {
        Self::new(
            (0..count)
                .map(|p| (1..=per_page).map(|i| p * per_page + i).collect())
                .collect(),
        )
    }

    pub fn with_behavior(self, item: usize, behavior: Behavior) -> Self {
        self.behaviors.lock().unwrap().insert(item_url(item), behavior);
        self
    }

    /// The next arrow on `page` fails to show up for the next `times` waits
    pub fn with_missing_next(self, page: u32, times: u32) -> Self {
        self.next_misses.lock().unwrap().insert(page, times);
        self
    }

    /// Fires `token` when the detail page of `item` is opened
    pub fn cancel_on_detail(&self, item: usize, token: CancellationToken) {
        *self.cancel_on.lock().unwrap() = Some((item_url(item), token));
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn peak_concurrent_details(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn sessions_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn take_next_miss(&self, page: u32) -> bool {
        match self.next_misses.lock().unwrap().get_mut(&page) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn items_on(&self, page: u32) -> &[usize] {
        self.pages
            .get(page as usize - 1)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

struct ActiveDetail<'a>(&'a AtomicUsize);

impl Drop for ActiveDetail<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Location {
    Blank,
    Listing(u32),
    Detail(usize),
}

pub struct ScriptedSession {
    id: usize,
    site: Arc<Site>,
    location: Location,
    generation: u64,
    closed: bool,
}

impl ScriptedSession {
    fn handle(&self, index: usize) -> ElementHandle {
        ElementHandle {
            generation: self.generation,
            index,
        }
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.closed {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    fn matching(&self, locator: &Locator) -> Vec<Element> {
        match (&self.location, locator.css.as_str()) {
            (Location::Listing(page), "div.card") => self
                .site
                .items_on(*page)
                .iter()
                .enumerate()
                .map(|(index, _)| Element::new(self.handle(index), "", HashMap::new()))
                .collect(),
            (Location::Listing(page), "a.next") if *page < self.site.page_count() => {
                vec![Element::new(self.handle(NEXT_HANDLE), "Next", HashMap::new())]
            }
            (Location::Detail(item), "span.phone") => vec![Element::new(
                self.handle(0),
                format!("555-{:04}", item),
                HashMap::new(),
            )],
            _ => Vec::new(),
        }
    }

    async fn open_detail(&mut self, url: &str) -> SessionResult<()> {
        let site = Arc::clone(&self.site);
        site.record(Event::Detail(url.to_string()));

        // One-shot, so a resumed run gets past this item
        let cancel = {
            let mut slot = site.cancel_on.lock().unwrap();
            match slot.as_ref() {
                Some((target, _)) if target == url => slot.take().map(|(_, token)| token),
                _ => None,
            }
        };
        if let Some(token) = cancel {
            token.cancel();
            std::future::pending::<()>().await;
        }

        let behavior = {
            let mut behaviors = site.behaviors.lock().unwrap();
            match behaviors.get_mut(url) {
                Some(Behavior::FailTimes(remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(Behavior::FailTimes(1))
                }
                Some(Behavior::FailTimes(_)) => None,
                other => other.cloned(),
            }
        };

        let active = site.active.fetch_add(1, Ordering::SeqCst) + 1;
        site.peak.fetch_max(active, Ordering::SeqCst);
        let _active = ActiveDetail(&site.active);

        match behavior {
            Some(Behavior::FailTimes(_)) => {
                return Err(SessionError::Navigation {
                    url: url.to_string(),
                    message: "HTTP 503".to_string(),
                    transient: true,
                })
            }
            Some(Behavior::Fatal) => {
                return Err(SessionError::Navigation {
                    url: url.to_string(),
                    message: "HTTP 404".to_string(),
                    transient: false,
                })
            }
            Some(Behavior::Hang) => std::future::pending::<()>().await,
            Some(Behavior::Latency(delay)) => tokio::time::sleep(delay).await,
            None => tokio::time::sleep(site.detail_delay).await,
        }

        let item = url
            .rsplit('/')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or_default();
        self.location = Location::Detail(item);
        Ok(())
    }
}

#[async_trait]
impl Session for ScriptedSession {
    fn id(&self) -> usize {
        self.id
    }

    async fn navigate(&mut self, url: &str) -> SessionResult<()> {
        self.ensure_open()?;
        self.generation += 1;
        if url.starts_with(&format!("{}/search", BASE)) {
            self.location = Location::Listing(1);
            return Ok(());
        }
        self.open_detail(url).await
    }

    fn current_url(&self) -> Option<String> {
        match &self.location {
            Location::Blank => None,
            Location::Listing(page) => Some(format!("{}/search?q=coffee&page={}", BASE, page)),
            Location::Detail(item) => Some(item_url(*item)),
        }
    }

    async fn wait_until(
        &mut self,
        condition: &WaitCondition,
        _timeout: Duration,
    ) -> SessionResult<bool> {
        self.ensure_open()?;
        if let (Location::Listing(page), WaitCondition::Actionable(locator)) =
            (&self.location, condition)
        {
            if locator.css == "a.next" && self.site.take_next_miss(*page) {
                return Ok(false);
            }
        }
        Ok(match condition {
            WaitCondition::Present(locator) | WaitCondition::Actionable(locator) => {
                !self.matching(locator).is_empty()
            }
            WaitCondition::UrlChanged { from } => self.current_url().as_deref() != Some(from),
        })
    }

    async fn query(&mut self, locator: &Locator) -> SessionResult<Vec<Element>> {
        self.ensure_open()?;
        if let (Location::Listing(page), "div.card") = (&self.location, locator.css.as_str()) {
            self.site.record(Event::Extract(*page));
        }
        Ok(self.matching(locator))
    }

    async fn query_within(
        &mut self,
        scope: &Element,
        locator: &Locator,
    ) -> SessionResult<Vec<Element>> {
        self.ensure_open()?;
        let Location::Listing(page) = self.location else {
            return Ok(Vec::new());
        };
        let Some(item) = self.site.items_on(page).get(scope.handle().index).copied() else {
            return Ok(Vec::new());
        };

        Ok(match locator.css.as_str() {
            "a.link" => {
                let attributes = [("href".to_string(), format!("/item/{}?utm_source=list", item))]
                    .into_iter()
                    .collect();
                vec![Element::new(self.handle(0), "", attributes)]
            }
            "span.name" => vec![Element::new(
                self.handle(0),
                format!("Shop {}", item),
                HashMap::new(),
            )],
            _ => Vec::new(),
        })
    }

    async fn click(&mut self, element: &Element) -> SessionResult<()> {
        self.ensure_open()?;
        if element.handle().generation != self.generation {
            return Err(SessionError::StaleElement {
                handle: element.handle().to_string(),
            });
        }
        match self.location {
            Location::Listing(page) if element.handle().index == NEXT_HANDLE => {
                self.generation += 1;
                self.location = Location::Listing(page + 1);
                self.site.record(Event::Click(page + 1));
                Ok(())
            }
            _ => Err(SessionError::NotActionable(element.handle().to_string())),
        }
    }

    async fn run_script(&mut self, _code: &str) -> SessionResult<serde_json::Value> {
        Err(SessionError::Unsupported("scripts"))
    }

    async fn close(&mut self) -> SessionResult<()> {
        if !self.closed {
            self.closed = true;
            self.site.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Creates scripted sessions; slots listed in `failing` fail to start
pub struct SiteFactory {
    pub site: Arc<Site>,
    pub failing: HashSet<usize>,
}

#[async_trait]
impl SessionFactory for SiteFactory {
    async fn create(&self, slot: usize) -> SessionResult<Box<dyn Session>> {
        if self.failing.contains(&slot) {
            return Err(SessionError::Navigation {
                url: "about:blank".to_string(),
                message: "engine failed to start".to_string(),
                transient: false,
            });
        }
        self.site.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            id: slot,
            site: Arc::clone(&self.site),
            location: Location::Blank,
            generation: 0,
            closed: false,
        }))
    }
}

/// Output kept in memory and shared across runs
#[derive(Default)]
pub struct MemoryOutput {
    pub rows: Vec<EnrichedItem>,
    pub batches: usize,
    /// Appending this batch (1-based) fails
    pub fail_on_batch: Option<usize>,
}

pub struct MemorySink {
    schema: RecordSchema,
    output: Arc<Mutex<MemoryOutput>>,
}

impl OutputSink for MemorySink {
    fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    fn append_batch(&mut self, items: &[EnrichedItem]) -> OutputResult<()> {
        let mut output = self.output.lock().unwrap();
        output.batches += 1;
        if output.fail_on_batch == Some(output.batches) {
            return Err(OutputError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        output.rows.extend_from_slice(items);
        Ok(())
    }

    fn existing_identities(&mut self) -> OutputResult<Vec<Identity>> {
        let output = self.output.lock().unwrap();
        Ok(output.rows.iter().map(|row| row.identity().clone()).collect())
    }
}

/// Checkpoint file whose removal always fails
pub struct UnremovableCheckpoint(pub JsonCheckpointStore);

impl CheckpointStore for UnremovableCheckpoint {
    fn load(&mut self) -> StorageResult<Checkpoint> {
        self.0.load()
    }

    fn save(&mut self, checkpoint: &Checkpoint) -> StorageResult<()> {
        self.0.save(checkpoint)
    }

    fn clear(&mut self) -> StorageResult<()> {
        Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only volume",
        )))
    }
}

/// Records every attempt reported by the retry executor
#[derive(Default)]
pub struct RecordingObserver {
    pub attempts: Mutex<Vec<(String, u32, AttemptOutcome)>>,
}

impl RecordingObserver {
    /// Number of retry warnings whose label mentions `needle`
    pub fn retries_for(&self, needle: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|(label, _, outcome)| {
                label.contains(needle) && matches!(outcome, AttemptOutcome::Retrying { .. })
            })
            .count()
    }
}

impl AttemptObserver for RecordingObserver {
    fn on_attempt(&self, label: &str, attempt: u32, outcome: AttemptOutcome, _error: Option<&str>) {
        self.attempts
            .lock()
            .unwrap()
            .push((label.to_string(), attempt, outcome));
    }
}

pub const CONFIG: &str = r#"
[target]
listing-url = "https://shop.test/search?q={query}"
search-terms = "coffee"
ready-selector = "div.card"

[harvest]
pool-size = 3
max-pages = 50
item-timeout-ms = 1000
page-load-timeout-ms = 500
settle-delay-ms = 50

[retry]
max-attempts = 3
initial-delay-ms = 100
backoff-multiplier = 2.0

[[pagination]]
name = "next-arrow"
selector = "a.next"
timeout-ms = 200

[[extractor]]
name = "cards"
item-selector = "div.card"
identity = { selector = "a.link" }
fields = [{ name = "name", selector = "span.name", required = true }]
details = [{ name = "phone", selector = "span.phone" }]

[output]
path = "unused.csv"
columns = ["name", "phone"]
checkpoint-path = "unused.json"

[user-agent]
crawler-name = "listing-harvester"
crawler-version = "0.1.0"
contact-url = "https://example.com/about"
contact-email = "ops@example.com"
"#;

/// Everything one scenario needs, shared across successive runs
pub struct Harness {
    pub site: Arc<Site>,
    pub config: Config,
    pub output: Arc<Mutex<MemoryOutput>>,
    pub observer: Arc<RecordingObserver>,
    pub failing_slots: HashSet<usize>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(site: Site) -> Self {
        Self {
            site: Arc::new(site),
            config: parse_config(CONFIG).unwrap(),
            output: Arc::new(Mutex::new(MemoryOutput::default())),
            observer: Arc::new(RecordingObserver::default()),
            failing_slots: HashSet::new(),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir.path().join("checkpoint.json")
    }

    pub fn checkpoint_store(&self) -> JsonCheckpointStore {
        JsonCheckpointStore::new(self.checkpoint_path())
            .with_fingerprint(self.config.search_fingerprint())
    }

    /// A fresh coordinator over the shared site, checkpoint and output
    pub fn coordinator(&self, cancel: CancellationToken) -> Coordinator {
        self.coordinator_with_store(cancel, Box::new(self.checkpoint_store()))
    }

    /// Like `coordinator`, persisting progress through `checkpoints`
    pub fn coordinator_with_store(
        &self,
        cancel: CancellationToken,
        checkpoints: Box<dyn CheckpointStore>,
    ) -> Coordinator {
        let retry = RetryExecutor::new(RetryPolicy::from_config(&self.config.retry).unwrap())
            .with_observer(Arc::clone(&self.observer) as Arc<dyn AttemptObserver>);
        let sink = MemorySink {
            schema: RecordSchema::new(self.config.output.columns.iter().cloned()),
            output: Arc::clone(&self.output),
        };

        Coordinator::new(
            Arc::new(self.config.clone()),
            Arc::new(SiteFactory {
                site: Arc::clone(&self.site),
                failing: self.failing_slots.clone(),
            }),
            ExtractorRegistry::from_config(&self.config),
            checkpoints,
            Box::new(sink),
            retry,
            cancel,
        )
    }

    /// Identities written so far, in write order
    pub fn written(&self) -> Vec<String> {
        self.output
            .lock()
            .unwrap()
            .rows
            .iter()
            .map(|row| row.identity().to_string())
            .collect()
    }
}
