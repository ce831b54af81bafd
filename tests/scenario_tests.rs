//! Harvest scenarios driven through scripted in-memory sessions
//!
//! These tests run the full Coordinator against the `Site` in `common`, with
//! a paused clock so latencies, timeouts and backoff cost no wall time.

mod common;

use common::{item_url, Behavior, Event, Harness, Site, UnremovableCheckpoint};
use listing_harvester::config::{FieldRule, PaginationEntry};
use listing_harvester::session::PoolError;
use listing_harvester::storage::{Checkpoint, CheckpointStore};
use listing_harvester::{ExitReason, HarvestError, Identity, RunState};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn sorted(mut ids: Vec<String>) -> Vec<String> {
    ids.sort();
    ids
}

fn urls(items: impl IntoIterator<Item = usize>) -> Vec<String> {
    sorted(items.into_iter().map(item_url).collect())
}

#[tokio::test(start_paused = true)]
async fn test_full_harvest_respects_pool_bound() {
    let site = Site::uniform(3, 7)
        .with_behavior(2, Behavior::Latency(Duration::from_millis(300)))
        .with_behavior(5, Behavior::Latency(Duration::from_millis(5)))
        .with_behavior(9, Behavior::Latency(Duration::from_millis(120)));
    let harness = Harness::new(site);
    let mut coordinator = harness.coordinator(CancellationToken::new());

    let exit = coordinator.run().await.unwrap();

    assert_eq!(exit, ExitReason::Exhausted);
    assert_eq!(coordinator.state(), RunState::Done);
    assert_eq!(sorted(harness.written()), urls(1..=21));
    assert_eq!(harness.site.peak_concurrent_details(), 3);
    assert!(coordinator.summary().peak_busy_sessions <= 3);

    let summary = coordinator.summary();
    assert_eq!(summary.pages_processed, 3);
    assert_eq!(summary.items_written, 21);
    assert!(summary.items_dropped.is_empty());
    assert_eq!(summary.exit, Some(ExitReason::Exhausted));

    // Exhausted listing: checkpoint removed, every session torn down
    assert!(!harness.checkpoint_path().exists());
    assert_eq!(harness.site.sessions_created(), 4);
    assert_eq!(harness.site.sessions_closed(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_resume_replays_checkpointed_pages_before_extracting() {
    let harness = Harness::new(Site::uniform(6, 5));

    let mut seen: BTreeSet<Identity> = (1..=20).map(|n| Identity::new(item_url(n))).collect();
    seen.extend((0..100).map(|n| Identity::new(format!("https://shop.test/old/{}", n))));
    assert_eq!(seen.len(), 120);
    harness
        .checkpoint_store()
        .save(&Checkpoint::new(4, seen))
        .unwrap();

    let mut coordinator = harness.coordinator(CancellationToken::new());
    assert_eq!(coordinator.run().await.unwrap(), ExitReason::Exhausted);

    let events = harness.site.events();
    let first_extract = events
        .iter()
        .position(|e| matches!(e, Event::Extract(_)))
        .unwrap();
    let replayed: Vec<&Event> = events[..first_extract]
        .iter()
        .filter(|e| matches!(e, Event::Click(_)))
        .collect();
    assert_eq!(
        replayed,
        vec![&Event::Click(2), &Event::Click(3), &Event::Click(4), &Event::Click(5)]
    );
    assert_eq!(events[first_extract], Event::Extract(5));

    assert_eq!(sorted(harness.written()), urls(21..=30));
    assert_eq!(coordinator.summary().pages_processed, 2);
}

fn checkpoint_through_page_4() -> Checkpoint {
    Checkpoint::new(4, (1..=20).map(|n| Identity::new(item_url(n))).collect())
}

#[tokio::test(start_paused = true)]
async fn test_replay_miss_continues_from_reached_page() {
    // The arrow on page 3 is missing once during replay
    let harness = Harness::new(Site::uniform(6, 5).with_missing_next(3, 1));
    harness
        .checkpoint_store()
        .save(&checkpoint_through_page_4())
        .unwrap();

    let mut coordinator = harness.coordinator(CancellationToken::new());
    assert_eq!(coordinator.run().await.unwrap(), ExitReason::Exhausted);

    // Pages 3 and 4 are passed over without extraction
    let events = harness.site.events();
    let extracted: Vec<&Event> = events
        .iter()
        .filter(|e| matches!(e, Event::Extract(_)))
        .collect();
    assert_eq!(extracted, vec![&Event::Extract(5), &Event::Extract(6)]);
    assert_eq!(events.iter().filter(|e| **e == Event::Click(4)).count(), 1);

    assert_eq!(sorted(harness.written()), urls(21..=30));
    assert_eq!(coordinator.summary().pages_processed, 2);
    assert!(!harness.checkpoint_path().exists());
}

#[tokio::test(start_paused = true)]
async fn test_listing_ending_before_checkpoint_keeps_checkpoint() {
    let harness = Harness::new(Site::uniform(6, 5).with_missing_next(3, 5));
    harness
        .checkpoint_store()
        .save(&checkpoint_through_page_4())
        .unwrap();

    let mut coordinator = harness.coordinator(CancellationToken::new());
    let result = coordinator.run().await;

    assert!(matches!(result, Err(HarvestError::Pagination { page: 3, .. })));
    assert_eq!(coordinator.state(), RunState::Failed);
    assert!(harness.written().is_empty());
    let events = harness.site.events();
    assert!(!events.iter().any(|e| matches!(e, Event::Extract(_))));

    let saved = harness.checkpoint_store().load().unwrap();
    assert_eq!(saved.last_page, 4);
    assert_eq!(saved.processed_identities.len(), 20);
}

#[tokio::test(start_paused = true)]
async fn test_checkpoint_clear_failure_fails_run() {
    let harness = Harness::new(Site::uniform(2, 2));
    let store = UnremovableCheckpoint(harness.checkpoint_store());
    let mut coordinator =
        harness.coordinator_with_store(CancellationToken::new(), Box::new(store));

    let result = coordinator.run().await;

    assert!(matches!(result, Err(HarvestError::Storage(_))));
    assert_eq!(coordinator.state(), RunState::Failed);
    assert_eq!(coordinator.summary().exit, Some(ExitReason::Failed));
    assert_eq!(sorted(harness.written()), urls(1..=4));
    assert_eq!(harness.checkpoint_store().load().unwrap().last_page, 2);
}

#[tokio::test(start_paused = true)]
async fn test_seen_identity_is_not_dispatched() {
    let site = Site::new(vec![vec![1, 2, 3], vec![3, 4]]);
    let harness = Harness::new(site);
    let mut coordinator = harness.coordinator(CancellationToken::new());

    coordinator.run().await.unwrap();

    assert_eq!(sorted(harness.written()), urls(1..=4));
    let detail_visits = harness
        .site
        .events()
        .iter()
        .filter(|e| **e == Event::Detail(item_url(3)))
        .count();
    assert_eq!(detail_visits, 1);
    assert_eq!(coordinator.summary().duplicates_skipped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_all_strategies_failing_ends_run_and_clears_checkpoint() {
    let mut harness = Harness::new(Site::uniform(2, 3));
    harness.config.pagination = vec![
        PaginationEntry {
            name: "numbered-link".to_string(),
            selector: "a.page".to_string(),
            text: Some("{next}".to_string()),
            timeout_ms: 100,
        },
        PaginationEntry {
            name: "arrow".to_string(),
            selector: "a.arrow".to_string(),
            text: None,
            timeout_ms: 100,
        },
        PaginationEntry {
            name: "load-more".to_string(),
            selector: "button.more".to_string(),
            text: None,
            timeout_ms: 100,
        },
    ];
    let mut coordinator = harness.coordinator(CancellationToken::new());

    assert_eq!(coordinator.run().await.unwrap(), ExitReason::Exhausted);
    assert_eq!(coordinator.state(), RunState::Done);
    assert_eq!(sorted(harness.written()), urls(1..=3));
    assert!(!harness.checkpoint_path().exists());
}

#[tokio::test(start_paused = true)]
async fn test_transient_enrichment_failures_are_retried() {
    let site = Site::uniform(1, 5).with_behavior(2, Behavior::FailTimes(2));
    let harness = Harness::new(site);
    let mut coordinator = harness.coordinator(CancellationToken::new());

    coordinator.run().await.unwrap();

    let written = harness.written();
    assert_eq!(written.iter().filter(|id| **id == item_url(2)).count(), 1);
    assert_eq!(harness.observer.retries_for(&item_url(2)), 2);
    assert!(coordinator.summary().items_dropped.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_items_are_dropped_and_run_continues() {
    let site = Site::uniform(2, 3)
        .with_behavior(2, Behavior::Fatal)
        .with_behavior(4, Behavior::Hang);
    let harness = Harness::new(site);
    let mut coordinator = harness.coordinator(CancellationToken::new());

    assert_eq!(coordinator.run().await.unwrap(), ExitReason::Exhausted);

    assert_eq!(sorted(harness.written()), urls([1, 3, 5, 6]));
    let dropped: Vec<String> = coordinator
        .summary()
        .items_dropped
        .iter()
        .map(|(id, _)| id.to_string())
        .collect();
    assert_eq!(sorted(dropped), urls([2, 4]));
    // Fatal errors are not retried; timeouts are
    assert_eq!(harness.observer.retries_for(&item_url(2)), 0);
    assert_eq!(harness.observer.retries_for(&item_url(4)), 2);
}

#[tokio::test(start_paused = true)]
async fn test_persistence_failure_then_idempotent_resume() {
    let harness = Harness::new(Site::uniform(3, 3));
    harness.output.lock().unwrap().fail_on_batch = Some(2);

    let mut coordinator = harness.coordinator(CancellationToken::new());
    let result = coordinator.run().await;

    assert!(matches!(result, Err(HarvestError::Output(_))));
    assert!(result.unwrap_err().is_persistence_failure());
    assert_eq!(coordinator.state(), RunState::Failed);
    assert_eq!(coordinator.summary().exit, Some(ExitReason::Failed));
    assert_eq!(harness.site.sessions_closed(), harness.site.sessions_created());

    let saved = harness.checkpoint_store().load().unwrap();
    assert_eq!(saved.last_page, 1);
    assert_eq!(sorted(harness.written()), urls(1..=3));

    harness.output.lock().unwrap().fail_on_batch = None;
    let mut resumed = harness.coordinator(CancellationToken::new());
    assert_eq!(resumed.run().await.unwrap(), ExitReason::Exhausted);

    assert_eq!(sorted(harness.written()), urls(1..=9));
    assert!(!harness.checkpoint_path().exists());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_releases_sessions_and_keeps_last_checkpoint() {
    let harness = Harness::new(Site::uniform(3, 3));
    let cancel = CancellationToken::new();
    harness.site.cancel_on_detail(5, cancel.clone());

    let mut coordinator = harness.coordinator(cancel);
    let result = coordinator.run().await;

    assert!(matches!(result, Err(HarvestError::Cancelled)));
    assert_eq!(coordinator.summary().exit, Some(ExitReason::Cancelled));
    assert_eq!(harness.site.sessions_closed(), harness.site.sessions_created());

    // Page 2 was interrupted, so only page 1 is recorded
    let saved = harness.checkpoint_store().load().unwrap();
    assert_eq!(saved.last_page, 1);
    assert_eq!(sorted(harness.written()), urls(1..=3));

    let mut resumed = harness.coordinator(CancellationToken::new());
    assert_eq!(resumed.run().await.unwrap(), ExitReason::Exhausted);
    assert_eq!(sorted(harness.written()), urls(1..=9));
}

#[tokio::test(start_paused = true)]
async fn test_item_limit_stops_run() {
    let mut harness = Harness::new(Site::uniform(4, 3));
    harness.config.harvest.item_limit = Some(4);
    let mut coordinator = harness.coordinator(CancellationToken::new());

    assert_eq!(coordinator.run().await.unwrap(), ExitReason::ItemLimit);
    assert_eq!(sorted(harness.written()), urls(1..=4));
    assert_eq!(harness.checkpoint_store().load().unwrap().last_page, 2);
}

#[tokio::test(start_paused = true)]
async fn test_max_pages_stops_run_and_keeps_checkpoint() {
    let mut harness = Harness::new(Site::uniform(4, 2));
    harness.config.harvest.max_pages = 2;
    let mut coordinator = harness.coordinator(CancellationToken::new());

    assert_eq!(coordinator.run().await.unwrap(), ExitReason::MaxPages);
    assert_eq!(sorted(harness.written()), urls(1..=4));
    assert_eq!(harness.checkpoint_store().load().unwrap().last_page, 2);
}

#[tokio::test(start_paused = true)]
async fn test_pool_runs_at_reduced_capacity() {
    let mut harness = Harness::new(Site::uniform(1, 6));
    harness.failing_slots.insert(1);
    let mut coordinator = harness.coordinator(CancellationToken::new());

    assert_eq!(coordinator.run().await.unwrap(), ExitReason::Exhausted);
    assert_eq!(harness.written().len(), 6);
    assert_eq!(harness.site.peak_concurrent_details(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_empty_pool_is_fatal() {
    let mut harness = Harness::new(Site::uniform(1, 3));
    harness.failing_slots.extend([0, 1, 2]);
    let mut coordinator = harness.coordinator(CancellationToken::new());

    let result = coordinator.run().await;

    assert!(matches!(
        result,
        Err(HarvestError::Pool(PoolError::Empty { requested: 3 }))
    ));
    assert_eq!(coordinator.state(), RunState::Failed);
    assert!(harness.written().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_no_viable_extractor_is_fatal() {
    let mut harness = Harness::new(Site::uniform(2, 3));
    harness.config.extractors[0].fields.push(FieldRule {
        name: "rating".to_string(),
        selector: "span.rating".to_string(),
        attribute: None,
        required: true,
    });
    let mut coordinator = harness.coordinator(CancellationToken::new());

    match coordinator.run().await {
        Err(HarvestError::NoViableExtractor { tried }) => assert_eq!(tried, vec!["cards"]),
        other => panic!("expected no viable extractor, got {:?}", other),
    }
    assert!(harness.written().is_empty());
    assert!(!harness.checkpoint_path().exists());
}
