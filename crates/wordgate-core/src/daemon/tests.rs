use super::*;
use crate::capability::{Capability, StaticCapabilities};
use crate::clock::ManualClock;
use crate::events::{BlockEvent, Notice};
use crate::ipc::{listen, IpcClient, IpcHandler};
use crate::monitor::ActivityLedger;
use crate::notifier::LogNotifier;
use crate::overlay::testing::RecordingSurface;
use crate::service::EnforcementService;
use crate::store::MemoryStateStore;
use crate::usage::FastTestUsageClock;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::AtomicBool;
use tokio::sync::broadcast;

const TICK: Duration = Duration::from_secs(1);

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap()
}

struct Harness {
    monitor: Monitor,
    clock: ManualClock,
    caps: Arc<StaticCapabilities>,
    ledger: Arc<ActivityLedger>,
    surface: RecordingSurface,
}

impl Harness {
    fn new() -> Self {
        Self::with(StaticCapabilities::all(), MemoryStateStore::default(), false)
    }

    fn with(caps: StaticCapabilities, store: MemoryStateStore, enforce_usage: bool) -> Self {
        let clock = ManualClock::new(t0());
        let caps = Arc::new(caps);
        let ledger = Arc::new(ActivityLedger::new(TICK));
        let surface = RecordingSurface::default();
        let monitor = Monitor::new(MonitorParts {
            clock: Arc::new(clock.clone()),
            capabilities: caps.clone(),
            accounting: ledger.clone(),
            usage_clock: Box::new(FastTestUsageClock::new(5, t0())),
            surface: Box::new(surface.clone()),
            notifier: Box::new(LogNotifier::default()),
            store: Box::new(store),
            detector: ForegroundDetector::new("wordgate", Duration::from_secs(10)),
            tick_interval: TICK,
            enforce_usage_threshold: enforce_usage,
        });
        Self {
            monitor,
            clock,
            caps,
            ledger,
            surface,
        }
    }

    /// Move the user to `app_id` as of the current simulated time
    fn focus(&self, app_id: &str) {
        self.ledger.record(app_id, self.clock.now());
    }

    /// Advance simulated time by one tick and let the loops run
    async fn step(&self) {
        self.clock.advance(chrono::Duration::seconds(1));
        tokio::time::sleep(TICK).await;
    }

    fn shows(&self) -> u32 {
        self.surface.log.lock().unwrap().shows
    }
}

fn drain(sub: &mut Subscription) -> Vec<BlockEvent> {
    std::iter::from_fn(|| sub.try_recv()).collect()
}

fn drain_notices(rx: &mut broadcast::Receiver<Notice>) -> Vec<Notice> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

/// Let already-due ticks run without moving simulated time
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_zero_delay_blocks_immediately() {
    let h = Harness::new();
    let status = h.monitor.start(0).await;
    assert_eq!(status.state, EnforcementState::Blocking);
    assert_eq!(h.monitor.status().await.state, EnforcementState::Blocking);
    assert_eq!(h.monitor.active_loop(), Some("foreground sampling"));
}

#[tokio::test(start_paused = true)]
async fn test_one_minute_countdown_emits_each_second_then_blocks_once() {
    let h = Harness::new();
    let mut sub = h.monitor.subscribe();
    h.monitor.start(1).await;
    assert_eq!(h.monitor.active_loop(), Some("countdown"));

    // Stay half a tick away from the loop's own ticks
    tokio::time::sleep(TICK / 2).await;
    for _ in 0..61 {
        h.step().await;
    }

    let events = drain(&mut sub);
    let ticks: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            BlockEvent::CountdownTick { seconds_remaining } => Some(*seconds_remaining),
            _ => None,
        })
        .collect();
    let expected: Vec<u64> = (0..=59).rev().collect();
    assert_eq!(ticks, expected);
    assert_eq!(
        events
            .iter()
            .filter(|e| **e == BlockEvent::BlockingStarted)
            .count(),
        1
    );
    assert_eq!(events.last(), Some(&BlockEvent::BlockingStarted));
    assert_eq!(h.monitor.status().await.state, EnforcementState::Blocking);
    assert_eq!(h.monitor.active_loop(), Some("foreground sampling"));
}

#[tokio::test(start_paused = true)]
async fn test_second_start_does_not_reset_countdown() {
    let h = Harness::new();
    let first = h.monitor.start(5).await;
    h.clock.advance(chrono::Duration::seconds(30));

    let second = h.monitor.start(1).await;
    assert_eq!(second.episode, first.episode);
    assert_eq!(second.state, EnforcementState::CountingDown);
    assert_eq!(second.seconds_remaining, Some(270));
}

#[tokio::test(start_paused = true)]
async fn test_overlay_follows_foreground_while_blocking() {
    let h = Harness::new();
    h.focus("browser");

    // Counting down: outside does not matter
    h.monitor.start(1).await;
    tokio::time::sleep(TICK / 2).await;
    h.step().await;
    assert_eq!(h.monitor.overlay_state().await, OverlayState::Hidden);

    h.monitor.stop().await;
    h.monitor.start(0).await;
    h.focus("browser");
    settle().await;
    assert_eq!(h.monitor.overlay_state().await, OverlayState::Shown);

    // Several samples outside: still exactly one surface
    for _ in 0..3 {
        h.focus("browser");
        h.step().await;
    }
    assert_eq!(h.shows(), 1);

    h.focus("wordgate");
    h.step().await;
    assert_eq!(h.monitor.overlay_state().await, OverlayState::Hidden);

    h.focus("browser");
    h.step().await;
    assert_eq!(h.monitor.overlay_state().await, OverlayState::Shown);
    assert_eq!(h.shows(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_missing_overlay_permission_aborts_episode() {
    let h = Harness::with(
        StaticCapabilities::with(&[Capability::QueryUsage, Capability::PostNotification]),
        MemoryStateStore::default(),
        false,
    );
    let mut notices = h.monitor.events().subscribe_notices();
    h.focus("browser");

    let status = h.monitor.start(0).await;
    assert_eq!(status.state, EnforcementState::Blocking);

    // The first sample runs without waiting a full period
    settle().await;
    assert_eq!(h.monitor.status().await.state, EnforcementState::Inactive);
    assert_eq!(h.shows(), 0);
    assert_eq!(h.monitor.active_loop(), None);

    let notices = drain_notices(&mut notices);
    assert!(notices.contains(&Notice::CapabilityDenied(Capability::DisplayOverApps)));
    assert!(notices
        .iter()
        .any(|n| matches!(n, Notice::EpisodeAborted { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_missing_usage_permission_is_reported_then_aborts() {
    let h = Harness::with(
        StaticCapabilities::with(&[Capability::DisplayOverApps, Capability::PostNotification]),
        MemoryStateStore::default(),
        false,
    );
    let mut notices = h.monitor.events().subscribe_notices();
    h.focus("browser");

    // Reported up front while the countdown still runs
    h.monitor.start(1).await;
    assert_eq!(
        drain_notices(&mut notices),
        vec![Notice::CapabilityDenied(Capability::QueryUsage)]
    );
    assert_eq!(h.monitor.status().await.state, EnforcementState::CountingDown);

    // Once blocking, nothing can tell inside from outside: the episode ends
    tokio::time::sleep(TICK / 2).await;
    for _ in 0..61 {
        h.step().await;
    }
    assert_eq!(h.monitor.status().await.state, EnforcementState::Inactive);
    assert_eq!(h.monitor.active_loop(), None);
    assert_eq!(h.shows(), 0);

    let notices = drain_notices(&mut notices);
    assert_eq!(notices.len(), 1);
    assert!(matches!(notices[0], Notice::EpisodeAborted { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_missing_usage_permission_never_leaves_a_silent_block() {
    let h = Harness::with(
        StaticCapabilities::with(&[Capability::DisplayOverApps, Capability::PostNotification]),
        MemoryStateStore::default(),
        false,
    );
    let mut notices = h.monitor.events().subscribe_notices();

    assert_eq!(h.monitor.start(0).await.state, EnforcementState::Blocking);
    settle().await;
    assert_eq!(h.monitor.status().await.state, EnforcementState::Inactive);
    assert_eq!(h.monitor.overlay_state().await, OverlayState::Hidden);

    let notices = drain_notices(&mut notices);
    assert_eq!(notices[0], Notice::CapabilityDenied(Capability::QueryUsage));
    assert!(matches!(notices[1], Notice::EpisodeAborted { .. }));
    assert_eq!(notices.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_permission_revoked_mid_block() {
    let h = Harness::new();
    h.focus("browser");
    h.monitor.start(0).await;
    settle().await;
    assert_eq!(h.monitor.overlay_state().await, OverlayState::Shown);

    h.caps.revoke(Capability::DisplayOverApps);
    h.step().await;
    assert_eq!(h.monitor.status().await.state, EnforcementState::Inactive);
    assert_eq!(h.monitor.overlay_state().await, OverlayState::Hidden);
}

#[tokio::test(start_paused = true)]
async fn test_unblock_hides_overlay_and_publishes() {
    let h = Harness::new();
    let mut sub = h.monitor.subscribe();
    h.focus("browser");
    h.monitor.start(0).await;
    settle().await;

    let status = h.monitor.unblock().await;
    assert_eq!(status.state, EnforcementState::Inactive);
    assert_eq!(h.monitor.overlay_state().await, OverlayState::Hidden);
    assert_eq!(h.monitor.active_loop(), None);
    assert_eq!(drain(&mut sub).last(), Some(&BlockEvent::Unblocked));

    // Unblocking again is a no-op
    h.monitor.unblock().await;
    assert!(drain(&mut sub).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_silent_and_cancels_the_loop() {
    let h = Harness::new();
    let mut sub = h.monitor.subscribe();
    h.monitor.start(1).await;
    tokio::time::sleep(TICK / 2).await;
    h.step().await;
    assert_eq!(drain(&mut sub).len(), 1);

    let status = h.monitor.stop().await;
    assert_eq!(status.state, EnforcementState::Inactive);
    assert_eq!(h.monitor.active_loop(), None);

    for _ in 0..120 {
        h.step().await;
    }
    assert!(drain(&mut sub).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restart_resumes_from_saved_deadline() {
    let store = MemoryStateStore::default();
    let before = Harness::with(StaticCapabilities::all(), store.clone(), false);
    let started = before.monitor.start(2).await;
    before.monitor.shutdown().await;
    drop(before);

    // Back up three minutes later: the countdown ran out while we were away
    let after = Harness::with(StaticCapabilities::all(), store, false);
    after.clock.advance(chrono::Duration::minutes(3));
    let mut sub = after.monitor.subscribe();
    assert_eq!(after.monitor.restore().await, EnforcementState::CountingDown);
    settle().await;

    let status = after.monitor.status().await;
    assert_eq!(status.state, EnforcementState::Blocking);
    assert_eq!(status.episode, started.episode);
    assert_eq!(drain(&mut sub).last(), Some(&BlockEvent::BlockingStarted));
}

#[tokio::test(start_paused = true)]
async fn test_restart_mid_countdown_keeps_remaining_time() {
    let store = MemoryStateStore::default();
    let before = Harness::with(StaticCapabilities::all(), store.clone(), false);
    before.monitor.start(2).await;
    before.monitor.shutdown().await;

    let after = Harness::with(StaticCapabilities::all(), store, false);
    after.clock.advance(chrono::Duration::seconds(45));
    after.monitor.restore().await;
    let status = after.monitor.status().await;
    assert_eq!(status.state, EnforcementState::CountingDown);
    assert_eq!(status.seconds_remaining, Some(75));
    assert_eq!(after.monitor.active_loop(), Some("countdown"));
}

#[tokio::test(start_paused = true)]
async fn test_usage_threshold_ends_countdown_when_enforced() {
    let h = Harness::with(StaticCapabilities::all(), MemoryStateStore::default(), true);
    h.monitor.start(10).await;
    tokio::time::sleep(TICK / 2).await;
    for _ in 0..6 {
        h.step().await;
    }
    assert_eq!(h.monitor.status().await.state, EnforcementState::Blocking);

    // Learning resets the usage clock
    h.monitor.unblock().await;
    let usage = h.monitor.usage().await.unwrap();
    assert_eq!(usage.elapsed_seconds, 0);
    assert!(!usage.should_block);
}

#[tokio::test(start_paused = true)]
async fn test_missing_notification_permission_is_not_fatal() {
    let h = Harness::with(
        StaticCapabilities::with(&[Capability::DisplayOverApps, Capability::QueryUsage]),
        MemoryStateStore::default(),
        false,
    );
    let mut notices = h.monitor.events().subscribe_notices();
    h.monitor.start(1).await;
    h.monitor.stop().await;
    h.monitor.start(1).await;

    assert_eq!(
        drain_notices(&mut notices),
        vec![Notice::CapabilityDenied(Capability::PostNotification)]
    );
    assert_eq!(h.monitor.status().await.state, EnforcementState::CountingDown);
}

#[tokio::test]
async fn test_ipc_client_drives_the_monitor() {
    let dir = tempfile::tempdir().unwrap();
    let sock_path = dir.path().join("wordgate.sock");
    let h = Harness::new();
    let handler = Arc::new(IpcHandler::new(
        h.monitor.clone(),
        Arc::new(AtomicBool::new(false)),
    ));
    let listen_path = sock_path.clone();
    let server = tokio::spawn(async move { listen(handler, &listen_path).await });

    let client = IpcClient::new(&sock_path);
    let mut status = None;
    for _ in 0..50 {
        if let Ok(s) = EnforcementService::status(&client).await {
            status = Some(s);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status.unwrap().state, EnforcementState::Inactive);

    let status = EnforcementService::start(&client, 0).await.unwrap();
    assert_eq!(status.state, EnforcementState::Blocking);

    let mut sub = EnforcementService::subscribe(&client).await.unwrap();
    let status = EnforcementService::unblock(&client).await.unwrap();
    assert_eq!(status.state, EnforcementState::Inactive);

    let event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .unwrap();
    assert_eq!(event, Some(BlockEvent::Unblocked));

    server.abort();
}

#[tokio::test]
async fn test_idle_subscriber_hangup_is_noticed() {
    let dir = tempfile::tempdir().unwrap();
    let sock_path = dir.path().join("wordgate.sock");
    let h = Harness::new();
    let handler = Arc::new(IpcHandler::new(
        h.monitor.clone(),
        Arc::new(AtomicBool::new(false)),
    ));
    let listen_path = sock_path.clone();
    let server = tokio::spawn(async move { listen(handler, &listen_path).await });

    let client = IpcClient::new(&sock_path);
    let mut sub = None;
    for _ in 0..50 {
        if let Ok(s) = client.subscribe().await {
            sub = Some(s);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let sub = sub.unwrap();
    assert_eq!(h.monitor.events().subscriber_count(), 1);

    // No episode runs, so nothing is ever written to the socket
    drop(sub);
    let mut remaining = h.monitor.events().subscriber_count();
    for _ in 0..50 {
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        remaining = h.monitor.events().subscriber_count();
    }
    assert_eq!(remaining, 0);
    assert_eq!(h.monitor.status().await.state, EnforcementState::Inactive);

    server.abort();
}
