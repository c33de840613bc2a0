//! The learning gate: a chosen word plus a minimum dwell before unblocking.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// The word that gates one blocking episode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: i64,
    pub word: String,
    pub definition: String,
}

/// Where gating words come from and where learning is recorded
pub trait ContentStore: Send {
    /// A random word not learned yet, `None` once everything is learned
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read
    fn fetch_random_unlearned_item(&self) -> Result<Option<ContentItem>>;

    /// # Errors
    ///
    /// Returns an error if the store cannot be written
    fn mark_learned(&self, id: i64) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the store cannot be written
    fn record_session(&self, item_id: Option<i64>, dwell_seconds: u64, at: DateTime<Utc>)
        -> Result<()>;
}

/// Dwell timer started at first render of the block surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LearningGate {
    opened_at: DateTime<Utc>,
    min_dwell: Duration,
}

impl LearningGate {
    #[must_use]
    pub fn open(now: DateTime<Utc>, min_dwell_secs: u64) -> Self {
        Self {
            opened_at: now,
            min_dwell: i64::try_from(min_dwell_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
        }
    }

    #[must_use]
    pub const fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    #[must_use]
    pub fn min_dwell_secs(&self) -> u64 {
        u64::try_from(self.min_dwell.num_seconds()).unwrap_or(0)
    }

    #[must_use]
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((now - self.opened_at).num_seconds()).unwrap_or(0)
    }

    #[must_use]
    pub fn can_complete(&self, now: DateTime<Utc>) -> bool {
        now - self.opened_at >= self.min_dwell
    }

    /// Whole seconds until completion is allowed, rounded up
    #[must_use]
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        // A backwards clock with a huge minimum would overflow
        let left = self
            .min_dwell
            .checked_sub(&(now - self.opened_at))
            .unwrap_or(Duration::MAX);
        u64::try_from(left.num_milliseconds())
            .unwrap_or(0)
            .div_ceil(1000)
    }

    /// Elapsed dwell in seconds if the gate may be passed
    ///
    /// # Errors
    ///
    /// Returns `DwellNotReached` with the remaining time before the minimum
    pub fn check(&self, now: DateTime<Utc>) -> Result<u64, EngineError> {
        if self.can_complete(now) {
            Ok(self.elapsed_secs(now))
        } else {
            Err(EngineError::DwellNotReached {
                min_secs: self.min_dwell_secs(),
                remaining_secs: self.remaining_secs(now),
            })
        }
    }
}
