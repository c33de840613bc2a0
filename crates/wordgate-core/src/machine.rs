//! The tri-state enforcement lifecycle.
//!
//! Pure state: no timers, no I/O. The background monitor feeds it the
//! current time and publishes whatever events come back.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::events::BlockEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnforcementState {
    #[default]
    Inactive,
    CountingDown,
    Blocking,
}

impl EnforcementState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "INACTIVE",
            Self::CountingDown => "COUNTING_DOWN",
            Self::Blocking => "BLOCKING",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INACTIVE" => Some(Self::Inactive),
            "COUNTING_DOWN" => Some(Self::CountingDown),
            "BLOCKING" => Some(Self::Blocking),
            _ => None,
        }
    }
}

impl fmt::Display for EnforcementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What `getStatus` reports to interactive clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub state: EnforcementState,
    /// Whole seconds left while counting down
    pub seconds_remaining: Option<u64>,
    pub episode: u64,
}

/// The durable part of the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersistedMonitorState {
    pub state: EnforcementState,
    pub deadline: Option<DateTime<Utc>>,
    pub episode: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub status: MonitorStatus,
    /// False when a countdown or block was already running
    pub started: bool,
    pub events: Vec<BlockEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub events: Vec<BlockEvent>,
    pub entered_blocking: bool,
}

#[derive(Debug, Default)]
pub struct EnforcementMachine {
    state: EnforcementState,
    deadline: Option<DateTime<Utc>>,
    episode: u64,
    last_tick: Option<u64>,
    enforce_usage_threshold: bool,
}

fn ceil_seconds(remaining: Duration) -> u64 {
    let ms = u64::try_from(remaining.num_milliseconds()).unwrap_or(0);
    ms.div_ceil(1000)
}

impl EnforcementMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Let a usage snapshot over threshold end the countdown early
    #[must_use]
    pub const fn with_usage_enforcement(mut self, enabled: bool) -> Self {
        self.enforce_usage_threshold = enabled;
        self
    }

    #[must_use]
    pub const fn state(&self) -> EnforcementState {
        self.state
    }

    #[must_use]
    pub const fn episode(&self) -> u64 {
        self.episode
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    #[must_use]
    pub fn status(&self, now: DateTime<Utc>) -> MonitorStatus {
        let seconds_remaining = match (self.state, self.deadline) {
            (EnforcementState::CountingDown, Some(deadline)) => {
                Some(ceil_seconds(deadline - now))
            }
            _ => None,
        };
        MonitorStatus {
            state: self.state,
            seconds_remaining,
            episode: self.episode,
        }
    }

    /// Enter a fresh countdown of `delay_minutes`.
    ///
    /// Anything but Inactive is left alone and only reported back, so a
    /// restarted client cannot reset a running countdown. A zero delay
    /// expires on the spot.
    pub fn start(&mut self, delay_minutes: u32, now: DateTime<Utc>) -> StartOutcome {
        if self.state != EnforcementState::Inactive {
            log::debug!("Start ignored, already {}", self.state);
            return StartOutcome {
                status: self.status(now),
                started: false,
                events: Vec::new(),
            };
        }

        self.episode += 1;
        self.deadline = Some(now + Duration::minutes(i64::from(delay_minutes)));
        self.last_tick = None;
        self.state = EnforcementState::CountingDown;
        log::info!(
            "Episode {} counting down {delay_minutes} min",
            self.episode
        );

        let events = if delay_minutes == 0 {
            self.tick(now, false).events
        } else {
            Vec::new()
        };

        StartOutcome {
            status: self.status(now),
            started: true,
            events,
        }
    }

    /// Advance the countdown. Only meaningful while counting down.
    pub fn tick(&mut self, now: DateTime<Utc>, usage_should_block: bool) -> TickOutcome {
        if self.state != EnforcementState::CountingDown {
            return TickOutcome::default();
        }

        let remaining = self.deadline.map_or(Duration::zero(), |d| d - now);
        let usage_expired = self.enforce_usage_threshold && usage_should_block;
        let mut outcome = TickOutcome::default();

        if remaining > Duration::zero() && !usage_expired {
            let seconds = ceil_seconds(remaining);
            // Ticks only ever go down within an episode
            if self.last_tick.is_none_or(|last| seconds < last) {
                self.last_tick = Some(seconds);
                outcome.events.push(BlockEvent::CountdownTick {
                    seconds_remaining: seconds,
                });
            }
            return outcome;
        }

        if self.last_tick != Some(0) {
            self.last_tick = Some(0);
            outcome.events.push(BlockEvent::CountdownTick {
                seconds_remaining: 0,
            });
        }
        self.state = EnforcementState::Blocking;
        outcome.events.push(BlockEvent::BlockingStarted);
        outcome.entered_blocking = true;
        if usage_expired {
            log::info!("Episode {} blocking: usage threshold reached", self.episode);
        } else {
            log::info!("Episode {} blocking: countdown expired", self.episode);
        }
        outcome
    }

    /// Back to Inactive from CountingDown or Blocking, silently
    pub fn stop(&mut self) -> bool {
        if self.state == EnforcementState::Inactive {
            return false;
        }
        log::info!("Episode {} stopped from {}", self.episode, self.state);
        self.state = EnforcementState::Inactive;
        self.deadline = None;
        self.last_tick = None;
        true
    }

    /// End a block after the learning gate was passed
    pub fn unblock(&mut self) -> Option<BlockEvent> {
        if self.state != EnforcementState::Blocking {
            return None;
        }
        log::info!("Episode {} unblocked", self.episode);
        self.state = EnforcementState::Inactive;
        self.deadline = None;
        self.last_tick = None;
        Some(BlockEvent::Unblocked)
    }

    #[must_use]
    pub const fn persisted(&self) -> PersistedMonitorState {
        PersistedMonitorState {
            state: self.state,
            deadline: self.deadline,
            episode: self.episode,
        }
    }

    /// Adopt state saved before a restart. The caller ticks right after.
    pub fn restore(&mut self, saved: PersistedMonitorState) -> EnforcementState {
        self.episode = saved.episode;
        self.last_tick = None;
        match (saved.state, saved.deadline) {
            (EnforcementState::CountingDown, None) => {
                log::warn!("Saved countdown has no deadline, resetting to inactive");
                self.state = EnforcementState::Inactive;
                self.deadline = None;
            }
            (state, deadline) => {
                self.state = state;
                self.deadline = deadline;
            }
        }
        self.state
    }
}
