//! In-process foreground usage accounting.
//!
//! A recorder task samples the platform monitor once per period and
//! attributes the period to whichever app was in front. Adjacent samples of
//! the same app are merged into spans.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{SystemMonitor, UsageAccounting, UsageRecord};
use crate::clock::Clock;
use crate::error::EngineError;
use crate::events::{EventChannel, Notice};
use crate::scheduler::{spawn_periodic, Flow, TaskHandle};
use crate::usage::FAILURE_NOTICE_THRESHOLD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Span {
    fn overlap_seconds(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> i64 {
        let start = self.start.max(since);
        let end = self.end.min(until);
        if end > start {
            (end - start).num_seconds()
        } else {
            0
        }
    }
}

#[derive(Debug)]
pub struct ActivityLedger {
    spans: Mutex<HashMap<String, Vec<Span>>>,
    sample_period: Duration,
    retention: Duration,
    failures: AtomicU32,
}

impl ActivityLedger {
    #[must_use]
    pub fn new(sample_period: std::time::Duration) -> Self {
        Self {
            spans: Mutex::new(HashMap::new()),
            sample_period: Duration::from_std(sample_period).unwrap_or(Duration::seconds(1)),
            retention: Duration::days(2),
            failures: AtomicU32::new(0),
        }
    }

    /// Attribute the sample period ending at `at` to `app_id`
    pub fn record(&self, app_id: &str, at: DateTime<Utc>) {
        let start = at - self.sample_period;
        let mut spans = self.spans.lock().unwrap_or_else(PoisonError::into_inner);

        let app_spans = spans.entry(app_id.to_string()).or_default();
        match app_spans.last_mut() {
            Some(last) if start <= last.end && at >= last.end => last.end = at,
            _ => app_spans.push(Span { start, end: at }),
        }

        let horizon = at - self.retention;
        spans.retain(|_, app_spans| {
            app_spans.retain(|span| span.end >= horizon);
            !app_spans.is_empty()
        });
    }

    /// Sample `monitor` every `period` until the handle is dropped.
    ///
    /// The third failed sample in a row is reported on `events`.
    pub fn spawn_recorder(
        self: &Arc<Self>,
        monitor: Arc<dyn SystemMonitor>,
        clock: Arc<dyn Clock>,
        events: EventChannel,
        period: std::time::Duration,
    ) -> TaskHandle {
        let ledger = Arc::clone(self);
        spawn_periodic("usage recorder", period, true, move || {
            let ledger = Arc::clone(&ledger);
            let monitor = Arc::clone(&monitor);
            let clock = Arc::clone(&clock);
            let events = events.clone();
            async move {
                match monitor.get_active_app().await {
                    Ok(app) => {
                        ledger.sample_succeeded();
                        if let Some(app) = app {
                            ledger.record(&app.app_id, clock.now());
                        }
                    }
                    Err(e) => {
                        if let Some(notice) = ledger.sample_failed(&e) {
                            events.notify(notice);
                        }
                    }
                }
                Ok(Flow::Continue)
            }
        })
    }

    /// Consecutive failed foreground samples
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    fn sample_succeeded(&self) {
        let failures = self.failures.swap(0, Ordering::SeqCst);
        if failures >= FAILURE_NOTICE_THRESHOLD {
            log::info!("Foreground sampling recovered after {failures} failures");
        }
    }

    fn sample_failed(&self, error: &anyhow::Error) -> Option<Notice> {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures < FAILURE_NOTICE_THRESHOLD {
            log::warn!("Foreground sample failed ({failures} in a row): {error:#}");
            return None;
        }
        log::debug!("Foreground sample failed ({failures} in a row): {error:#}");
        (failures == FAILURE_NOTICE_THRESHOLD).then_some(Notice::UsageUnavailable {
            consecutive_failures: failures,
        })
    }
}

impl UsageAccounting for ActivityLedger {
    fn recent_activity(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, EngineError> {
        let spans = self.spans.lock().unwrap_or_else(PoisonError::into_inner);
        let records = spans
            .iter()
            .filter_map(|(app_id, app_spans)| {
                let in_window: Vec<&Span> = app_spans
                    .iter()
                    .filter(|span| span.start <= until && span.end >= since)
                    .collect();
                let latest = in_window.iter().map(|span| span.end).max()?;
                let seconds: i64 = in_window
                    .iter()
                    .map(|span| span.overlap_seconds(since, until))
                    .sum();
                Some(UsageRecord {
                    app_id: app_id.clone(),
                    last_used: latest.min(until),
                    foreground_seconds: u64::try_from(seconds).unwrap_or(0),
                })
            })
            .collect();
        Ok(records)
    }

    fn foreground_seconds(
        &self,
        app_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64, EngineError> {
        let spans = self.spans.lock().unwrap_or_else(PoisonError::into_inner);
        let seconds: i64 = spans
            .get(app_id)
            .map(|app_spans| {
                app_spans
                    .iter()
                    .map(|span| span.overlap_seconds(since, until))
                    .sum()
            })
            .unwrap_or(0);
        Ok(u64::try_from(seconds).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn ledger() -> ActivityLedger {
        ActivityLedger::new(std::time::Duration::from_secs(1))
    }

    #[test]
    fn test_contiguous_samples_merge() {
        let ledger = ledger();
        for s in 1..=10 {
            ledger.record("wordgate", t(s));
        }
        assert_eq!(ledger.foreground_seconds("wordgate", t(0), t(10)).unwrap(), 10);
        assert_eq!(ledger.foreground_seconds("wordgate", t(5), t(10)).unwrap(), 5);
        assert_eq!(ledger.foreground_seconds("browser", t(0), t(10)).unwrap(), 0);
    }

    #[test]
    fn test_recent_activity_orders_by_last_use() {
        let ledger = ledger();
        ledger.record("wordgate", t(1));
        ledger.record("wordgate", t(2));
        ledger.record("browser", t(3));

        let records = ledger.recent_activity(t(0), t(3)).unwrap();
        let latest = records.iter().max_by_key(|r| r.last_used).unwrap();
        assert_eq!(latest.app_id, "browser");
        assert_eq!(records.len(), 2);

        // Outside the window nothing is reported
        assert!(ledger.recent_activity(t(20), t(30)).unwrap().is_empty());
    }

    struct BrokenMonitor;

    #[async_trait::async_trait]
    impl SystemMonitor for BrokenMonitor {
        async fn get_active_app(&self) -> anyhow::Result<Option<crate::monitor::AppActivity>> {
            anyhow::bail!("xdotool: command not found")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_sampler_escalates_once() {
        let ledger = Arc::new(ledger());
        let events = EventChannel::new();
        let mut notices = events.subscribe_notices();
        let clock = Arc::new(crate::clock::ManualClock::new(t(0)));
        let period = std::time::Duration::from_secs(1);

        let _recorder = ledger.spawn_recorder(Arc::new(BrokenMonitor), clock, events, period);
        // Immediate first sample, then one per period
        tokio::time::sleep(period * 5 + period / 2).await;

        assert!(ledger.consecutive_failures() >= 5);
        let seen: Vec<Notice> = std::iter::from_fn(|| notices.try_recv().ok()).collect();
        assert_eq!(
            seen,
            vec![Notice::UsageUnavailable {
                consecutive_failures: 3
            }]
        );
    }

    #[test]
    fn test_success_resets_failure_count() {
        let ledger = ledger();
        let error = anyhow::anyhow!("osascript: not authorized");
        assert!(ledger.sample_failed(&error).is_none());
        assert!(ledger.sample_failed(&error).is_none());
        ledger.sample_succeeded();
        assert_eq!(ledger.consecutive_failures(), 0);
        assert!(ledger.sample_failed(&error).is_none());
        assert!(ledger.sample_failed(&error).is_none());
        assert!(ledger.sample_failed(&error).is_some());
    }

    #[test]
    fn test_old_spans_are_pruned() {
        let ledger = ledger();
        ledger.record("old", t(0));
        ledger.record("new", t(0) + Duration::days(3));
        assert_eq!(
            ledger
                .foreground_seconds("old", t(-10), t(0) + Duration::days(3))
                .unwrap(),
            0
        );
    }
}
