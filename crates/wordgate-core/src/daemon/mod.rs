//! The background monitor.
//!
//! Owns the single enforcement state and drives it with its own loops, so it
//! keeps running whether or not a client is attached. Exactly one loop is
//! alive at a time: the countdown loop while counting down, the foreground
//! sampling loop while blocking, none while inactive.

mod inner;
mod server;
#[cfg(test)]
mod tests;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::capability::Capabilities;
use crate::clock::Clock;
use crate::error::EngineError;
use crate::events::{EventChannel, Subscription};
use crate::foreground::ForegroundDetector;
use crate::machine::{EnforcementMachine, EnforcementState, MonitorStatus};
use crate::monitor::UsageAccounting;
use crate::notifier::Notifier;
use crate::overlay::{OverlayController, OverlaySurface, OverlayState};
use crate::scheduler::{spawn_periodic, Flow, TaskHandle};
use crate::store::StateStore;
use crate::usage::{UsageClock, UsageSnapshot, UsageTracker};
use inner::{CountdownStep, MonitorCore};

pub use server::Daemon;

/// Collaborators a monitor is assembled from
pub struct MonitorParts {
    pub clock: Arc<dyn Clock>,
    pub capabilities: Arc<dyn Capabilities>,
    pub accounting: Arc<dyn UsageAccounting>,
    pub usage_clock: Box<dyn UsageClock>,
    pub surface: Box<dyn OverlaySurface>,
    pub notifier: Box<dyn Notifier>,
    pub store: Box<dyn StateStore>,
    pub detector: ForegroundDetector,
    pub tick_interval: Duration,
    pub enforce_usage_threshold: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopKind {
    Countdown,
    Sampling,
}

impl LoopKind {
    const fn name(self) -> &'static str {
        match self {
            Self::Countdown => "countdown",
            Self::Sampling => "foreground sampling",
        }
    }
}

struct Shared {
    core: tokio::sync::Mutex<MonitorCore>,
    active_loop: Mutex<Option<TaskHandle>>,
    events: EventChannel,
    tick_interval: Duration,
}

/// Cheap to clone; clones drive the same monitor
#[derive(Clone)]
pub struct Monitor {
    shared: Arc<Shared>,
}

impl Monitor {
    #[must_use]
    pub fn new(parts: MonitorParts) -> Self {
        let events = EventChannel::new();
        let core = MonitorCore {
            clock: parts.clock,
            machine: EnforcementMachine::new().with_usage_enforcement(parts.enforce_usage_threshold),
            overlay: OverlayController::new(parts.surface),
            usage: UsageTracker::new(parts.usage_clock),
            detector: parts.detector,
            accounting: parts.accounting,
            capabilities: parts.capabilities,
            notifier: parts.notifier,
            store: parts.store,
            events: events.clone(),
            enforce_usage_threshold: parts.enforce_usage_threshold,
            notification_denied: false,
            denied_this_episode: Vec::new(),
        };
        Self {
            shared: Arc::new(Shared {
                core: tokio::sync::Mutex::new(core),
                active_loop: Mutex::new(None),
                events,
                tick_interval: parts.tick_interval,
            }),
        }
    }

    #[must_use]
    pub fn events(&self) -> &EventChannel {
        &self.shared.events
    }

    /// Subscribe to live events. Reconcile with [`Monitor::status`] afterwards.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.shared.events.subscribe()
    }

    pub async fn status(&self) -> MonitorStatus {
        self.shared.core.lock().await.status()
    }

    pub async fn overlay_state(&self) -> OverlayState {
        self.shared.core.lock().await.overlay.state()
    }

    /// Begin an episode; a running one is reported, not restarted
    pub async fn start(&self, delay_minutes: u32) -> MonitorStatus {
        let mut core = self.shared.core.lock().await;
        let outcome = core.start(delay_minutes);
        if outcome.started {
            let episode = outcome.status.episode;
            match outcome.status.state {
                EnforcementState::Blocking => self.run_loop(LoopKind::Sampling, episode, true),
                _ => self.run_loop(LoopKind::Countdown, episode, false),
            }
        }
        outcome.status
    }

    pub async fn stop(&self) -> MonitorStatus {
        let mut core = self.shared.core.lock().await;
        if core.stop() {
            self.cancel_loop();
        }
        core.status()
    }

    /// Lift a block and reset the usage clock
    pub async fn unblock(&self) -> MonitorStatus {
        let mut core = self.shared.core.lock().await;
        if core.unblock() {
            self.cancel_loop();
        }
        core.status()
    }

    /// # Errors
    ///
    /// Returns an error if no usage snapshot could be produced
    pub async fn usage(&self) -> Result<UsageSnapshot, EngineError> {
        self.shared.core.lock().await.usage()
    }

    /// Pick up where a previous process left off. The first tick runs immediately.
    pub async fn restore(&self) -> EnforcementState {
        let mut core = self.shared.core.lock().await;
        let state = core.restore();
        let episode = core.machine.episode();
        match state {
            EnforcementState::CountingDown => self.run_loop(LoopKind::Countdown, episode, true),
            EnforcementState::Blocking => self.run_loop(LoopKind::Sampling, episode, true),
            EnforcementState::Inactive => {}
        }
        state
    }

    /// Stop all loops and take the surface down, keeping the saved state
    pub async fn shutdown(&self) {
        let mut core = self.shared.core.lock().await;
        self.cancel_loop();
        core.suspend();
    }

    /// Name of the loop currently running, if any
    #[must_use]
    pub fn active_loop(&self) -> Option<&'static str> {
        self.shared
            .active_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|handle| !handle.is_finished())
            .map(TaskHandle::name)
    }

    /// Replace whatever loop is running with a fresh one for `episode`
    fn run_loop(&self, kind: LoopKind, episode: u64, immediate: bool) {
        let weak = Arc::downgrade(&self.shared);
        let handle = spawn_periodic(kind.name(), self.shared.tick_interval, immediate, move || {
            let weak = weak.clone();
            async move {
                let Some(shared) = weak.upgrade() else {
                    return Ok(Flow::Stop);
                };
                Ok(Monitor { shared }.tick(kind, episode).await)
            }
        });
        let previous = self
            .shared
            .active_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    fn cancel_loop(&self) {
        let active = self
            .shared
            .active_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = active {
            handle.cancel();
        }
    }

    async fn tick(&self, kind: LoopKind, episode: u64) -> Flow {
        let mut core = self.shared.core.lock().await;
        match kind {
            LoopKind::Countdown => match core.countdown_tick(episode) {
                CountdownStep::Continue => Flow::Continue,
                CountdownStep::Stop => Flow::Stop,
                CountdownStep::EnteredBlocking => {
                    self.run_loop(LoopKind::Sampling, episode, true);
                    Flow::Stop
                }
            },
            LoopKind::Sampling => {
                if core.sample_tick(episode) {
                    Flow::Continue
                } else {
                    Flow::Stop
                }
            }
        }
    }
}
