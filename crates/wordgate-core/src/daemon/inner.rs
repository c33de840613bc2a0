use std::sync::Arc;

use crate::capability::{Capabilities, Capability};
use crate::clock::Clock;
use crate::error::EngineError;
use crate::events::{EventChannel, Notice};
use crate::foreground::ForegroundDetector;
use crate::machine::{EnforcementMachine, EnforcementState, MonitorStatus, StartOutcome};
use crate::monitor::UsageAccounting;
use crate::notifier::Notifier;
use crate::overlay::OverlayController;
use crate::store::StateStore;
use crate::usage::{UsageSnapshot, UsageTracker};

/// What the countdown loop should do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CountdownStep {
    Continue,
    Stop,
    EnteredBlocking,
}

/// Everything the monitor mutates, behind a single lock
pub(crate) struct MonitorCore {
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) machine: EnforcementMachine,
    pub(crate) overlay: OverlayController,
    pub(crate) usage: UsageTracker,
    pub(crate) detector: ForegroundDetector,
    pub(crate) accounting: Arc<dyn UsageAccounting>,
    pub(crate) capabilities: Arc<dyn Capabilities>,
    pub(crate) notifier: Box<dyn Notifier>,
    pub(crate) store: Box<dyn StateStore>,
    pub(crate) events: EventChannel,
    pub(crate) enforce_usage_threshold: bool,
    pub(crate) notification_denied: bool,
    /// Capabilities already reported missing during the current episode
    pub(crate) denied_this_episode: Vec<Capability>,
}

impl MonitorCore {
    pub(crate) fn status(&self) -> MonitorStatus {
        self.machine.status(self.clock.now())
    }

    pub(crate) fn start(&mut self, delay_minutes: u32) -> StartOutcome {
        let outcome = self.machine.start(delay_minutes, self.clock.now());
        if outcome.started {
            self.denied_this_episode.clear();
            self.persist();
            // Blocking depends on it; say so now rather than at the deadline
            if !self.capabilities.has(Capability::QueryUsage) {
                self.report_denied(Capability::QueryUsage);
            }
            for event in &outcome.events {
                self.events.publish(*event);
            }
            match outcome.status.state {
                EnforcementState::Blocking => self.post_notification("Time to learn a word"),
                _ => self.post_notification(&format!("Learning break in {delay_minutes} min")),
            }
        }
        outcome
    }

    pub(crate) fn countdown_tick(&mut self, episode: u64) -> CountdownStep {
        if self.machine.episode() != episode
            || self.machine.state() != EnforcementState::CountingDown
        {
            return CountdownStep::Stop;
        }

        let now = self.clock.now();
        let usage_says_block = self.enforce_usage_threshold
            && self.refresh_usage(now).is_some_and(|s| s.should_block);
        let outcome = self.machine.tick(now, usage_says_block);
        for event in &outcome.events {
            self.events.publish(*event);
        }

        if outcome.entered_blocking {
            self.persist();
            self.post_notification("Time to learn a word");
            CountdownStep::EnteredBlocking
        } else {
            CountdownStep::Continue
        }
    }

    /// One foreground sample while blocking. Returns false once the loop should end.
    pub(crate) fn sample_tick(&mut self, episode: u64) -> bool {
        if self.machine.episode() != episode || self.machine.state() != EnforcementState::Blocking
        {
            return false;
        }

        // Without foreground data the user would always count as inside
        if !self.capabilities.has(Capability::QueryUsage) {
            self.abort(Capability::QueryUsage);
            return false;
        }

        if self.overlay.poll_affordance() {
            // Back in the host app; the next sample sees it
            return true;
        }

        let now = self.clock.now();
        let outside = self
            .detector
            .is_outside_host(self.accounting.as_ref(), now)
            .unwrap_or_else(|e| {
                log::warn!("Foreground sample failed, assuming inside: {e}");
                false
            });

        match self.overlay.update(true, outside, self.capabilities.as_ref()) {
            Ok(_) => true,
            Err(EngineError::CapabilityDenied(capability)) => {
                self.abort(capability);
                false
            }
            Err(e) => {
                log::error!("Overlay update failed: {e}");
                true
            }
        }
    }

    /// End the episode because a required capability is gone
    fn abort(&mut self, capability: Capability) {
        log::error!(
            "Episode {} aborted: {capability} not granted",
            self.machine.episode()
        );
        self.teardown();
        self.report_denied(capability);
        self.events.notify(Notice::EpisodeAborted {
            reason: format!("permission missing: {capability}"),
        });
    }

    pub(crate) fn stop(&mut self) -> bool {
        if self.machine.state() == EnforcementState::Inactive {
            return false;
        }
        self.teardown();
        true
    }

    pub(crate) fn unblock(&mut self) -> bool {
        let Some(event) = self.machine.unblock() else {
            return false;
        };
        self.overlay.force_hide();
        self.notifier.clear();
        self.usage.reset(self.clock.now());
        self.persist();
        self.events.publish(event);
        true
    }

    pub(crate) fn usage(&mut self) -> Result<UsageSnapshot, EngineError> {
        let now = self.clock.now();
        let refresh = self.usage.refresh(now);
        if let Some(notice) = refresh.notice.clone() {
            self.events.notify(notice);
        }
        refresh.into_result()
    }

    /// Adopt the saved state. The caller resumes the matching loop.
    pub(crate) fn restore(&mut self) -> EnforcementState {
        let saved = match self.store.load() {
            Ok(saved) => saved,
            Err(e) => {
                log::error!("Failed to load saved monitor state: {e:#}");
                None
            }
        };
        let Some(saved) = saved else {
            return EnforcementState::Inactive;
        };
        let state = self.machine.restore(saved);
        self.denied_this_episode.clear();
        log::info!("Restored episode {} in state {state}", saved.episode);
        if state == EnforcementState::Blocking {
            self.post_notification("Time to learn a word");
        }
        state
    }

    /// Hide the surface without touching the state, e.g. on daemon exit
    pub(crate) fn suspend(&mut self) {
        self.overlay.force_hide();
        self.notifier.clear();
    }

    fn teardown(&mut self) {
        self.machine.stop();
        self.overlay.force_hide();
        self.notifier.clear();
        self.persist();
    }

    fn refresh_usage(&mut self, now: chrono::DateTime<chrono::Utc>) -> Option<UsageSnapshot> {
        let refresh = self.usage.refresh(now);
        if let Some(notice) = refresh.notice {
            self.events.notify(notice);
        }
        refresh.snapshot
    }

    /// Tell subscribers about a missing capability, once per episode
    fn report_denied(&mut self, capability: Capability) {
        if !self.denied_this_episode.contains(&capability) {
            self.denied_this_episode.push(capability);
            self.events.notify(Notice::CapabilityDenied(capability));
        }
    }

    fn post_notification(&mut self, message: &str) {
        if !self.capabilities.has(Capability::PostNotification) {
            if !self.notification_denied {
                self.notification_denied = true;
                self.events
                    .notify(Notice::CapabilityDenied(Capability::PostNotification));
            }
            return;
        }
        self.notification_denied = false;
        if let Err(e) = self.notifier.post_active(message) {
            log::warn!("Failed to post notification: {e:#}");
        }
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.machine.persisted()) {
            log::error!("Failed to save monitor state: {e:#}");
        }
    }
}
