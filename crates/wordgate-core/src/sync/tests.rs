use super::*;
use crate::capability::StaticCapabilities;
use crate::clock::ManualClock;
use crate::daemon::{Monitor, MonitorParts};
use crate::foreground::ForegroundDetector;
use crate::monitor::ActivityLedger;
use crate::notifier::LogNotifier;
use crate::overlay::testing::RecordingSurface;
use crate::store::MemoryStateStore;
use crate::usage::FastTestUsageClock;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Mutex;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap()
}

#[derive(Debug, Default)]
struct ContentLog {
    items: Vec<ContentItem>,
    fetches: u32,
    learned: Vec<i64>,
    sessions: Vec<(Option<i64>, u64)>,
}

/// In-memory content store that records every call
#[derive(Debug, Clone, Default)]
struct FakeContent {
    log: Arc<Mutex<ContentLog>>,
}

impl FakeContent {
    fn with_words(words: &[&str]) -> Self {
        let content = Self::default();
        content.log.lock().unwrap().items = words
            .iter()
            .zip(1..)
            .map(|(word, id)| ContentItem {
                id,
                word: (*word).to_string(),
                definition: format!("definition of {word}"),
            })
            .collect();
        content
    }

    fn fetches(&self) -> u32 {
        self.log.lock().unwrap().fetches
    }
}

impl ContentStore for FakeContent {
    fn fetch_random_unlearned_item(&self) -> Result<Option<ContentItem>> {
        let mut log = self.log.lock().unwrap();
        log.fetches += 1;
        let learned = log.learned.clone();
        Ok(log
            .items
            .iter()
            .find(|item| !learned.contains(&item.id))
            .cloned())
    }

    fn mark_learned(&self, id: i64) -> Result<()> {
        self.log.lock().unwrap().learned.push(id);
        Ok(())
    }

    fn record_session(
        &self,
        item_id: Option<i64>,
        dwell_seconds: u64,
        _at: DateTime<Utc>,
    ) -> Result<()> {
        self.log.lock().unwrap().sessions.push((item_id, dwell_seconds));
        Ok(())
    }
}

struct Setup {
    monitor: Monitor,
    clock: ManualClock,
    content: FakeContent,
    sync: ClientSynchronizer,
}

fn setup(content: FakeContent) -> Setup {
    let clock = ManualClock::new(t0());
    let monitor = Monitor::new(MonitorParts {
        clock: Arc::new(clock.clone()),
        capabilities: Arc::new(StaticCapabilities::all()),
        accounting: Arc::new(ActivityLedger::new(std::time::Duration::from_secs(1))),
        usage_clock: Box::new(FastTestUsageClock::new(5, t0())),
        surface: Box::new(RecordingSurface::default()),
        notifier: Box::new(LogNotifier::default()),
        store: Box::new(MemoryStateStore::default()),
        detector: ForegroundDetector::new("wordgate", std::time::Duration::from_secs(10)),
        tick_interval: std::time::Duration::from_secs(1),
        enforce_usage_threshold: false,
    });
    let sync = ClientSynchronizer::new(
        Arc::new(monitor.clone()),
        Box::new(content.clone()),
        Arc::new(clock.clone()),
        20,
        15,
    );
    Setup {
        monitor,
        clock,
        content,
        sync,
    }
}

#[tokio::test(start_paused = true)]
async fn test_mount_maps_each_state() {
    let mut s = setup(FakeContent::with_words(&["lucid"]));
    assert_eq!(s.sync.mount().await.unwrap(), BlockingView::default());

    s.monitor.start(2).await;
    let view = s.sync.reconcile().await.unwrap();
    assert!(view.is_service_active);
    assert!(!view.is_blocked);
    assert_eq!(view.seconds_remaining, Some(120));

    s.monitor.stop().await;
    s.monitor.start(0).await;
    let view = s.sync.on_resume().await.unwrap();
    assert!(view.is_blocked);
    assert_eq!(s.sync.selection().unwrap().word, "lucid");
}

#[tokio::test(start_paused = true)]
async fn test_start_blocking_is_optimistic() {
    let mut s = setup(FakeContent::default());
    let view = s.sync.start_blocking(3).await.unwrap();
    assert!(view.is_service_active);
    assert_eq!(view.seconds_remaining, Some(180));
    assert_eq!(s.monitor.status().await.state, EnforcementState::CountingDown);
}

#[tokio::test(start_paused = true)]
async fn test_ticks_update_remaining_and_zero_blocks() {
    let mut s = setup(FakeContent::with_words(&["terse"]));
    s.sync.mount().await.unwrap();

    s.sync
        .apply_event(BlockEvent::CountdownTick {
            seconds_remaining: 42,
        })
        .await
        .unwrap();
    assert_eq!(s.sync.view().seconds_remaining, Some(42));
    assert!(!s.sync.view().is_blocked);

    s.sync
        .apply_event(BlockEvent::CountdownTick {
            seconds_remaining: 0,
        })
        .await
        .unwrap();
    assert!(s.sync.view().is_blocked);
    assert_eq!(s.sync.last_entry(), Some(BlockEntry::Entered));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_block_signals_enter_once() {
    let mut s = setup(FakeContent::with_words(&["candid", "brisk"]));
    s.sync.mount().await.unwrap();
    s.monitor.start(0).await;

    // Pushed events racing with a poll
    s.sync.apply_event(BlockEvent::BlockingStarted).await.unwrap();
    s.sync.apply_event(BlockEvent::BlockingStarted).await.unwrap();
    s.sync.poll().await.unwrap();

    assert_eq!(s.sync.block_entries(), 1);
    assert_eq!(s.content.fetches(), 1);
    assert_eq!(s.sync.last_entry(), Some(BlockEntry::AlreadyInProgress));
    let chosen = s.sync.selection().cloned().unwrap();

    // Re-renders keep the same word
    s.sync.on_resume().await.unwrap();
    assert_eq!(s.sync.selection(), Some(&chosen));
}

#[tokio::test(start_paused = true)]
async fn test_no_content_fails_open() {
    let mut s = setup(FakeContent::default());
    s.sync.mount().await.unwrap();
    s.monitor.start(0).await;

    let view = s.sync.reconcile().await.unwrap();
    assert_eq!(view, BlockingView::default());
    assert_eq!(s.sync.last_entry(), Some(BlockEntry::NoContent));
    assert_eq!(s.monitor.status().await.state, EnforcementState::Inactive);

    assert!(s.sync.open_gate().is_none());
    s.clock.advance(Duration::seconds(60));
    assert!(!s.sync.can_complete());
    assert!(!s.sync.is_in_progress());
    assert_eq!(s.sync.gating_item(), Err(EngineError::NoContent));
}

#[tokio::test(start_paused = true)]
async fn test_early_completion_is_rejected_without_side_effects() {
    let mut s = setup(FakeContent::with_words(&["aloof"]));
    s.sync.mount().await.unwrap();
    s.monitor.start(0).await;
    s.sync.reconcile().await.unwrap();
    let gate = s.sync.open_gate().unwrap();

    for elapsed in [0, 5, 19] {
        s.clock.set(gate.opened_at() + Duration::seconds(elapsed));
        assert!(!s.sync.can_complete());
        let err = s.sync.complete_learning_session().await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<EngineError>(),
            Some(&EngineError::DwellNotReached {
                min_secs: 20,
                remaining_secs: 20 - u64::try_from(elapsed).unwrap(),
            })
        );
        assert_eq!(s.monitor.status().await.state, EnforcementState::Blocking);
        assert!(s.sync.is_in_progress());
    }
    assert!(s.content.log.lock().unwrap().learned.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dwell_timer_ignores_countdown_ticks() {
    let mut s = setup(FakeContent::with_words(&["wry"]));
    s.sync.mount().await.unwrap();
    s.monitor.start(0).await;
    s.sync.reconcile().await.unwrap();
    let first = s.sync.open_gate().unwrap();

    s.clock.advance(Duration::seconds(8));
    s.sync
        .apply_event(BlockEvent::CountdownTick {
            seconds_remaining: 0,
        })
        .await
        .unwrap();
    assert_eq!(s.sync.open_gate(), Some(first));
}

#[tokio::test(start_paused = true)]
async fn test_completion_unblocks_records_and_rearms() {
    let mut s = setup(FakeContent::with_words(&["sanguine"]));
    s.sync.mount().await.unwrap();
    s.monitor.start(0).await;
    s.sync.reconcile().await.unwrap();
    s.sync.open_gate().unwrap();

    s.clock.advance(Duration::seconds(25));
    assert!(s.sync.can_complete());
    let done = s.sync.complete_learning_session().await.unwrap();
    assert_eq!(done.item.word, "sanguine");
    assert_eq!(done.dwell_seconds, 25);

    let log = s.content.log.lock().unwrap();
    assert_eq!(log.learned, vec![done.item.id]);
    assert_eq!(log.sessions, vec![(Some(done.item.id), 25)]);
    drop(log);

    // A fresh countdown with the configured delay
    let status = s.monitor.status().await;
    assert_eq!(status.state, EnforcementState::CountingDown);
    assert_eq!(status.seconds_remaining, Some(15 * 60));
    assert_eq!(done.rearmed.unwrap().seconds_remaining, Some(15 * 60));
    assert!(!s.sync.is_in_progress());
    assert!(s.sync.selection().is_none());

    // Signals from the completed episode do not reopen the block
    s.sync.pump().await.unwrap();
    assert!(s.sync.selection().is_none());
    assert!(s.sync.view().is_service_active);
    assert_eq!(s.monitor.status().await.state, EnforcementState::CountingDown);
}

#[tokio::test(start_paused = true)]
async fn test_complete_without_block_is_rejected() {
    let mut s = setup(FakeContent::with_words(&["idle"]));
    s.sync.mount().await.unwrap();
    let err = s.sync.complete_learning_session().await.unwrap_err();
    assert_eq!(err.downcast_ref::<EngineError>(), Some(&EngineError::NotBlocked));
    assert_eq!(s.sync.gating_item(), Err(EngineError::NotBlocked));
}

#[tokio::test(start_paused = true)]
async fn test_episode_ended_elsewhere_clears_local_state() {
    let mut s = setup(FakeContent::with_words(&["fleet"]));
    s.sync.mount().await.unwrap();
    s.monitor.start(0).await;
    s.sync.reconcile().await.unwrap();
    assert!(s.sync.is_in_progress());

    s.monitor.stop().await;
    s.sync.on_resume().await.unwrap();
    assert!(!s.sync.is_in_progress());
    assert!(s.sync.selection().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stop_blocking_clears_everything() {
    let mut s = setup(FakeContent::with_words(&["mellow"]));
    s.sync.mount().await.unwrap();
    s.sync.start_blocking(5).await.unwrap();
    let view = s.sync.stop_blocking().await.unwrap();
    assert_eq!(view, BlockingView::default());
    assert_eq!(s.monitor.status().await.state, EnforcementState::Inactive);
}

#[tokio::test(start_paused = true)]
async fn test_stop_drops_queued_block_signals() {
    let mut s = setup(FakeContent::with_words(&["plain"]));
    s.sync.mount().await.unwrap();
    s.monitor.start(0).await;
    s.sync.reconcile().await.unwrap();
    assert_eq!(s.sync.block_entries(), 1);

    s.sync.stop_blocking().await.unwrap();
    s.sync.pump().await.unwrap();
    assert_eq!(s.sync.view(), BlockingView::default());
    assert!(s.sync.selection().is_none());
    assert!(!s.sync.is_in_progress());
    assert_eq!(s.sync.block_entries(), 1);
    assert_eq!(s.monitor.status().await.state, EnforcementState::Inactive);
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_supersedes_queued_signals() {
    let mut s = setup(FakeContent::with_words(&["stale"]));
    s.sync.mount().await.unwrap();
    s.monitor.start(0).await;
    s.monitor.stop().await;

    assert_eq!(s.sync.reconcile().await.unwrap(), BlockingView::default());
    s.sync.pump().await.unwrap();
    assert_eq!(s.sync.view(), BlockingView::default());
    assert_eq!(s.sync.block_entries(), 0);
    assert_eq!(s.content.fetches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_replaced_episode_is_entered_afresh() {
    let mut s = setup(FakeContent::with_words(&["first", "second"]));
    s.sync.mount().await.unwrap();
    s.monitor.start(0).await;
    s.sync.reconcile().await.unwrap();
    let old_gate = s.sync.open_gate().unwrap();

    s.monitor.stop().await;
    s.clock.advance(Duration::seconds(40));
    s.monitor.start(0).await;
    s.sync.reconcile().await.unwrap();

    assert_eq!(s.sync.block_entries(), 2);
    assert!(s.sync.is_in_progress());
    let new_gate = s.sync.open_gate().unwrap();
    assert_ne!(new_gate, old_gate);
    assert!(!s.sync.can_complete());
}

#[tokio::test(start_paused = true)]
async fn test_block_signals_after_no_content_are_spent() {
    let mut s = setup(FakeContent::default());
    s.sync.mount().await.unwrap();
    s.monitor.start(0).await;

    s.sync.apply_event(BlockEvent::BlockingStarted).await.unwrap();
    s.sync.apply_event(BlockEvent::BlockingStarted).await.unwrap();
    s.sync
        .apply_event(BlockEvent::CountdownTick {
            seconds_remaining: 0,
        })
        .await
        .unwrap();

    assert_eq!(s.sync.block_entries(), 1);
    assert_eq!(s.content.fetches(), 1);
    assert_eq!(s.sync.last_entry(), Some(BlockEntry::NoContent));
    assert_eq!(s.sync.view(), BlockingView::default());
    assert_eq!(s.monitor.status().await.state, EnforcementState::Inactive);

    // A later episode is entered normally
    s.sync.start_blocking(0).await.unwrap();
    assert_eq!(s.sync.block_entries(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_completion_after_stop_elsewhere_is_rejected() {
    let mut s = setup(FakeContent::with_words(&["moot"]));
    s.sync.mount().await.unwrap();
    s.monitor.start(0).await;
    s.sync.reconcile().await.unwrap();
    s.sync.open_gate().unwrap();

    s.monitor.stop().await;
    s.clock.advance(Duration::seconds(25));
    let err = s.sync.complete_learning_session().await.unwrap_err();
    assert_eq!(err.downcast_ref::<EngineError>(), Some(&EngineError::NotBlocked));

    let log = s.content.log.lock().unwrap();
    assert!(log.learned.is_empty());
    assert!(log.sessions.is_empty());
    drop(log);
    assert_eq!(s.monitor.status().await.state, EnforcementState::Inactive);
    assert!(!s.sync.is_in_progress());
    assert_eq!(s.sync.view(), BlockingView::default());
}

#[tokio::test(start_paused = true)]
async fn test_completion_does_not_unblock_a_newer_episode() {
    let mut s = setup(FakeContent::with_words(&["older", "newer"]));
    s.sync.mount().await.unwrap();
    s.monitor.start(0).await;
    s.sync.reconcile().await.unwrap();
    s.sync.open_gate().unwrap();

    s.monitor.stop().await;
    s.monitor.start(0).await;
    s.clock.advance(Duration::seconds(25));
    let err = s.sync.complete_learning_session().await.unwrap_err();
    assert_eq!(err.downcast_ref::<EngineError>(), Some(&EngineError::NotBlocked));

    assert!(s.content.log.lock().unwrap().learned.is_empty());
    assert_eq!(s.monitor.status().await.state, EnforcementState::Blocking);
    // The newer block is adopted with its own dwell
    assert!(s.sync.is_in_progress());
    assert_eq!(s.sync.block_entries(), 2);
    assert!(s.sync.open_gate().is_some());
    assert!(!s.sync.can_complete());
}
