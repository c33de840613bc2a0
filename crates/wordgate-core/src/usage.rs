//! Usage clock: how long the host app has been used against a threshold.
//!
//! Two strategies share one contract so consumers never care which mode is
//! active: production reads foreground accounting for the current day,
//! fast-test measures wall time since the last reset.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use crate::capability::{Capabilities, Capability};
use crate::error::EngineError;
use crate::events::Notice;
use crate::monitor::UsageAccounting;

/// Consecutive failed queries before the user is told
pub const FAILURE_NOTICE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UsageMode {
    #[default]
    Production,
    FastTest,
}

impl fmt::Display for UsageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => f.write_str("production"),
            Self::FastTest => f.write_str("fast-test"),
        }
    }
}

impl FromStr for UsageMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "production" => Ok(Self::Production),
            "fast-test" | "fast" | "test" => Ok(Self::FastTest),
            other => anyhow::bail!("Unknown mode '{other}' (expected production or fast-test)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub elapsed_seconds: u64,
    pub threshold_seconds: u64,
    pub should_block: bool,
    pub is_fast_mode: bool,
}

impl UsageSnapshot {
    #[must_use]
    pub const fn new(elapsed_seconds: u64, threshold_seconds: u64, is_fast_mode: bool) -> Self {
        Self {
            elapsed_seconds,
            threshold_seconds,
            should_block: elapsed_seconds >= threshold_seconds,
            is_fast_mode,
        }
    }
}

pub trait UsageClock: Send {
    /// Compute the snapshot as of `now`
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying accounting cannot be read
    fn snapshot(&self, now: DateTime<Utc>) -> Result<UsageSnapshot, EngineError>;

    /// Start measuring afresh from `now`
    fn reset(&self, now: DateTime<Utc>);
}

/// Wall time since the last reset compared against a threshold in seconds
#[derive(Debug)]
pub struct FastTestUsageClock {
    threshold_seconds: u64,
    started: Mutex<DateTime<Utc>>,
}

impl FastTestUsageClock {
    #[must_use]
    pub fn new(threshold_seconds: u64, now: DateTime<Utc>) -> Self {
        Self {
            threshold_seconds,
            started: Mutex::new(now),
        }
    }
}

impl UsageClock for FastTestUsageClock {
    fn snapshot(&self, now: DateTime<Utc>) -> Result<UsageSnapshot, EngineError> {
        let started = *self.started.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = u64::try_from((now - started).num_seconds()).unwrap_or(0);
        Ok(UsageSnapshot::new(elapsed, self.threshold_seconds, true))
    }

    fn reset(&self, now: DateTime<Utc>) {
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }
}

/// Host-app foreground time for the current local day
pub struct ProductionUsageClock {
    accounting: Arc<dyn UsageAccounting>,
    capabilities: Arc<dyn Capabilities>,
    host_app_id: String,
    threshold_seconds: u64,
    baseline: Mutex<Option<DateTime<Utc>>>,
}

impl ProductionUsageClock {
    #[must_use]
    pub fn new(
        accounting: Arc<dyn UsageAccounting>,
        capabilities: Arc<dyn Capabilities>,
        host_app_id: String,
        threshold_seconds: u64,
    ) -> Self {
        Self {
            accounting,
            capabilities,
            host_app_id,
            threshold_seconds,
            baseline: Mutex::new(None),
        }
    }

    /// Start of the accounting window: local midnight, or the last reset if later
    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = start_of_local_day(now);
        let baseline = *self.baseline.lock().unwrap_or_else(PoisonError::into_inner);
        baseline.map_or(midnight, |b| b.max(midnight))
    }
}

impl UsageClock for ProductionUsageClock {
    fn snapshot(&self, now: DateTime<Utc>) -> Result<UsageSnapshot, EngineError> {
        if !self.capabilities.has(Capability::QueryUsage) {
            return Err(EngineError::CapabilityDenied(Capability::QueryUsage));
        }
        let since = self.window_start(now);
        let elapsed = self
            .accounting
            .foreground_seconds(&self.host_app_id, since, now)?;
        Ok(UsageSnapshot::new(elapsed, self.threshold_seconds, false))
    }

    fn reset(&self, now: DateTime<Utc>) {
        *self.baseline.lock().unwrap_or_else(PoisonError::into_inner) = Some(now);
    }
}

fn start_of_local_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_timezone(&Local)
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .map_or(now, |midnight| midnight.with_timezone(&Utc))
}

/// Result of one refresh of the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRefresh {
    /// Fresh snapshot, or the last known one after a failure
    pub snapshot: Option<UsageSnapshot>,
    pub notice: Option<Notice>,
    /// Why this refresh failed, if it did
    pub error: Option<EngineError>,
}

impl UsageRefresh {
    /// The usable snapshot, or why there is none
    ///
    /// # Errors
    ///
    /// Returns the failure when no snapshot, fresh or reused, exists
    pub fn into_result(self) -> Result<UsageSnapshot, EngineError> {
        match (self.snapshot, self.error) {
            (Some(snapshot), _) => Ok(snapshot),
            (None, Some(e)) => Err(e),
            (None, None) => Err(EngineError::UsageUnavailable("no usage data yet".into())),
        }
    }
}

/// Usage clock with last-known-value reuse and failure escalation
pub struct UsageTracker {
    clock: Box<dyn UsageClock>,
    last: Option<UsageSnapshot>,
    consecutive_failures: u32,
    denial_reported: bool,
}

impl UsageTracker {
    #[must_use]
    pub fn new(clock: Box<dyn UsageClock>) -> Self {
        Self {
            clock,
            last: None,
            consecutive_failures: 0,
            denial_reported: false,
        }
    }

    pub fn refresh(&mut self, now: DateTime<Utc>) -> UsageRefresh {
        match self.clock.snapshot(now) {
            Ok(snapshot) => {
                if self.consecutive_failures > 0 {
                    log::info!(
                        "Usage accounting recovered after {} failures",
                        self.consecutive_failures
                    );
                }
                self.consecutive_failures = 0;
                self.denial_reported = false;
                self.last = Some(snapshot);
                UsageRefresh {
                    snapshot: Some(snapshot),
                    notice: None,
                    error: None,
                }
            }
            Err(EngineError::CapabilityDenied(capability)) => {
                let notice = (!self.denial_reported).then_some(Notice::CapabilityDenied(capability));
                self.denial_reported = true;
                UsageRefresh {
                    snapshot: self.last,
                    notice,
                    error: Some(EngineError::CapabilityDenied(capability)),
                }
            }
            Err(e) => {
                self.consecutive_failures += 1;
                log::warn!(
                    "Usage query failed ({} in a row): {e}",
                    self.consecutive_failures
                );
                let notice = (self.consecutive_failures == FAILURE_NOTICE_THRESHOLD).then_some(
                    Notice::UsageUnavailable {
                        consecutive_failures: self.consecutive_failures,
                    },
                );
                UsageRefresh {
                    snapshot: self.last,
                    notice,
                    error: Some(e),
                }
            }
        }
    }

    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.clock.reset(now);
        self.last = None;
    }

    #[must_use]
    pub const fn last(&self) -> Option<UsageSnapshot> {
        self.last
    }

    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
