//! Client-side view of the monitor.
//!
//! Reconciles with the monitor's status on mount and on every resume,
//! follows live events in between, and runs the learning gate once a block
//! is entered. Block entry runs at most once per episode however many
//! duplicate signals arrive.

#[cfg(test)]
mod tests;

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::EngineError;
use crate::events::{BlockEvent, Subscription};
use crate::gate::{ContentItem, ContentStore, LearningGate};
use crate::machine::{EnforcementState, MonitorStatus};
use crate::service::EnforcementService;

/// What the interactive layer renders
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BlockingView {
    pub is_service_active: bool,
    pub is_blocked: bool,
    pub seconds_remaining: Option<u64>,
}

/// Result of trying to enter the block screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEntry {
    Entered,
    AlreadyInProgress,
    /// Nothing left to learn; the episode was stopped
    NoContent,
}

/// A passed learning gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedSession {
    pub item: ContentItem,
    pub dwell_seconds: u64,
    /// The view after re-arming, `None` if re-arming failed
    pub rearmed: Option<BlockingView>,
}

pub struct ClientSynchronizer {
    service: Arc<dyn EnforcementService>,
    content: Box<dyn ContentStore>,
    clock: Arc<dyn Clock>,
    min_dwell_secs: u64,
    rearm_delay_minutes: u32,
    subscription: Option<Subscription>,
    view: BlockingView,
    in_progress: bool,
    /// Monitor episode the last observed status belonged to
    episode: Option<u64>,
    /// The episode was stopped for lack of content; its signals are spent
    abandoned: bool,
    selection: Option<ContentItem>,
    gate: Option<LearningGate>,
    block_entries: u64,
    last_entry: Option<BlockEntry>,
}

impl ClientSynchronizer {
    #[must_use]
    pub fn new(
        service: Arc<dyn EnforcementService>,
        content: Box<dyn ContentStore>,
        clock: Arc<dyn Clock>,
        min_dwell_secs: u64,
        rearm_delay_minutes: u32,
    ) -> Self {
        Self {
            service,
            content,
            clock,
            min_dwell_secs,
            rearm_delay_minutes,
            subscription: None,
            view: BlockingView::default(),
            in_progress: false,
            episode: None,
            abandoned: false,
            selection: None,
            gate: None,
            block_entries: 0,
            last_entry: None,
        }
    }

    #[must_use]
    pub const fn view(&self) -> BlockingView {
        self.view
    }

    /// The word gating the current episode, fixed once chosen
    #[must_use]
    pub const fn selection(&self) -> Option<&ContentItem> {
        self.selection.as_ref()
    }

    /// The selection, or why there is none
    ///
    /// # Errors
    ///
    /// `NoContent` when the last block had nothing to gate with, otherwise
    /// `NotBlocked`
    pub fn gating_item(&self) -> Result<&ContentItem, EngineError> {
        match (&self.selection, self.last_entry) {
            (Some(item), _) => Ok(item),
            (None, Some(BlockEntry::NoContent)) => Err(EngineError::NoContent),
            (None, _) => Err(EngineError::NotBlocked),
        }
    }

    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    /// How many times the block-entry side effect has run
    #[must_use]
    pub const fn block_entries(&self) -> u64 {
        self.block_entries
    }

    /// Outcome of the most recent block-entry attempt
    #[must_use]
    pub const fn last_entry(&self) -> Option<BlockEntry> {
        self.last_entry
    }

    pub fn set_rearm_delay(&mut self, minutes: u32) {
        self.rearm_delay_minutes = minutes;
    }

    /// Attach: subscribe first, then reconcile, so nothing falls in between
    ///
    /// # Errors
    ///
    /// Returns an error if the monitor cannot be reached
    pub async fn mount(&mut self) -> Result<BlockingView> {
        self.subscription = Some(self.service.subscribe().await?);
        self.reconcile().await
    }

    /// The host app came back to the foreground
    ///
    /// # Errors
    ///
    /// Returns an error if the monitor cannot be reached
    pub async fn on_resume(&mut self) -> Result<BlockingView> {
        if self.subscription.is_none() {
            self.subscription = Some(self.service.subscribe().await?);
        }
        self.reconcile().await
    }

    /// Pull the monitor's status and adopt it.
    ///
    /// Events queued before the pull are older than its answer and dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the monitor cannot be reached
    pub async fn reconcile(&mut self) -> Result<BlockingView> {
        self.discard_pending();
        let status = self.service.status().await?;
        self.apply_status(status).await?;
        Ok(self.view)
    }

    /// Periodic poll: drain pushed events, then reconcile
    ///
    /// # Errors
    ///
    /// Returns an error if the monitor cannot be reached
    pub async fn poll(&mut self) -> Result<BlockingView> {
        self.pump().await?;
        self.reconcile().await
    }

    /// Apply every event already delivered; returns how many there were
    ///
    /// # Errors
    ///
    /// Returns an error if a block entry needed the monitor and it failed
    pub async fn pump(&mut self) -> Result<usize> {
        let mut events = Vec::new();
        if let Some(subscription) = self.subscription.as_mut() {
            while let Some(event) = subscription.try_recv() {
                events.push(event);
            }
        }
        for event in &events {
            self.apply_event(*event).await?;
        }
        Ok(events.len())
    }

    /// Wait for the next live event and apply it; `None` once the stream ends
    ///
    /// # Errors
    ///
    /// Returns an error if a block entry needed the monitor and it failed
    pub async fn next_event(&mut self) -> Result<Option<BlockEvent>> {
        let Some(subscription) = self.subscription.as_mut() else {
            return Ok(None);
        };
        let Some(event) = subscription.recv().await else {
            self.subscription = None;
            return Ok(None);
        };
        self.apply_event(event).await?;
        Ok(Some(event))
    }

    /// # Errors
    ///
    /// Returns an error if a block entry needed the monitor and it failed
    pub async fn apply_event(&mut self, event: BlockEvent) -> Result<()> {
        match event {
            BlockEvent::CountdownTick { seconds_remaining } if seconds_remaining > 0 => {
                // A block in progress only ends through completion or a status pull
                if self.in_progress {
                    return Ok(());
                }
                self.abandoned = false;
                self.view.is_service_active = true;
                self.view.seconds_remaining = Some(seconds_remaining);
            }
            BlockEvent::CountdownTick { .. } | BlockEvent::BlockingStarted => {
                if self.abandoned {
                    log::debug!("Ignoring {event:?} for an episode stopped without content");
                    return Ok(());
                }
                if !self.in_progress {
                    // Events carry no episode number; the next status pull fills it in
                    self.episode = None;
                }
                self.view.is_service_active = true;
                self.view.is_blocked = true;
                self.view.seconds_remaining = Some(0);
                self.enter_block().await?;
            }
            BlockEvent::Unblocked => {
                // Ended elsewhere, e.g. by another client
                self.view = BlockingView::default();
                self.abandoned = false;
                self.clear_episode();
            }
        }
        Ok(())
    }

    /// Arm the monitor, showing the full countdown right away
    ///
    /// # Errors
    ///
    /// Returns an error if the monitor cannot be reached
    pub async fn start_blocking(&mut self, delay_minutes: u32) -> Result<BlockingView> {
        self.view.is_service_active = true;
        self.view.seconds_remaining = Some(u64::from(delay_minutes) * 60);
        let status = self.service.start(delay_minutes).await?;
        self.apply_status(status).await?;
        Ok(self.view)
    }

    /// Disarm the monitor
    ///
    /// # Errors
    ///
    /// Returns an error if the monitor cannot be reached
    pub async fn stop_blocking(&mut self) -> Result<BlockingView> {
        self.service.stop().await?;
        self.discard_pending();
        self.view = BlockingView::default();
        self.abandoned = false;
        self.clear_episode();
        Ok(self.view)
    }

    /// Start the dwell timer at first render; later calls return the same gate
    pub fn open_gate(&mut self) -> Option<LearningGate> {
        self.selection.as_ref()?;
        let now = self.clock.now();
        let min_dwell = self.min_dwell_secs;
        Some(*self.gate.get_or_insert_with(|| LearningGate::open(now, min_dwell)))
    }

    #[must_use]
    pub const fn gate(&self) -> Option<LearningGate> {
        self.gate
    }

    /// Whether the completion affordance is enabled right now
    #[must_use]
    pub fn can_complete(&self) -> bool {
        self.gate
            .is_some_and(|gate| gate.can_complete(self.clock.now()))
    }

    /// Pass the learning gate: unblock, forget the episode, record the word, re-arm.
    ///
    /// Before the minimum dwell nothing happens and the remaining time is
    /// reported.
    ///
    /// # Errors
    ///
    /// Returns `DwellNotReached` too early, `NotBlocked` without an open
    /// gate or once the monitor no longer holds this block, or an error if
    /// the monitor cannot be reached
    pub async fn complete_learning_session(&mut self) -> Result<CompletedSession> {
        let (Some(gate), Some(item)) = (self.gate, self.selection.clone()) else {
            return Err(EngineError::NotBlocked.into());
        };
        let now = self.clock.now();
        let dwell_seconds = gate.check(now)?;

        // Disarmed or replaced elsewhere: nothing to complete, nothing to re-arm
        let status = self.service.status().await?;
        let replaced = self.episode.is_some_and(|known| known != status.episode);
        if status.state != EnforcementState::Blocking || replaced {
            log::info!("Block already ended elsewhere, not completing");
            self.discard_pending();
            self.clear_episode();
            self.apply_status(status).await?;
            return Err(EngineError::NotBlocked.into());
        }

        let after = self.service.unblock().await?;
        if after.state != EnforcementState::Inactive {
            log::warn!("Monitor did not unblock (now {}), not completing", after.state);
            self.discard_pending();
            self.apply_status(after).await?;
            return Err(EngineError::NotBlocked.into());
        }
        // Whatever is queued belongs to the episode just completed
        self.discard_pending();
        self.view = BlockingView::default();
        self.clear_episode();

        if let Err(e) = self.content.mark_learned(item.id) {
            log::error!("Failed to mark '{}' learned: {e:#}", item.word);
        }
        if let Err(e) = self.content.record_session(Some(item.id), dwell_seconds, now) {
            log::error!("Failed to record learning session: {e:#}");
        }
        log::info!("Learned '{}' after {dwell_seconds}s", item.word);

        let rearmed = match self.start_blocking(self.rearm_delay_minutes).await {
            Ok(view) => Some(view),
            Err(e) => {
                log::error!("Failed to re-arm monitor: {e:#}");
                None
            }
        };

        Ok(CompletedSession {
            item,
            dwell_seconds,
            rearmed,
        })
    }

    async fn apply_status(&mut self, status: MonitorStatus) -> Result<()> {
        // Anything observed after an abandoning stop belongs to a newer episode
        self.abandoned = false;
        let previous = self.episode.replace(status.episode);
        match status.state {
            EnforcementState::Blocking => {
                if self.in_progress && previous.is_some_and(|known| known != status.episode) {
                    log::info!("Episode {} replaced the one in progress", status.episode);
                    self.clear_episode();
                }
                self.view.is_service_active = true;
                self.view.is_blocked = true;
                self.view.seconds_remaining = Some(0);
                self.enter_block().await?;
            }
            EnforcementState::CountingDown => {
                if self.in_progress {
                    // The block ended elsewhere and a new countdown began
                    self.clear_episode();
                }
                self.view.is_service_active = true;
                self.view.is_blocked = false;
                self.view.seconds_remaining = status.seconds_remaining;
            }
            EnforcementState::Inactive => {
                self.view = BlockingView::default();
                self.clear_episode();
            }
        }
        Ok(())
    }

    /// The block-entry side effect, guarded by the in-progress flag
    async fn enter_block(&mut self) -> Result<()> {
        let entry = self.try_enter_block().await?;
        self.last_entry = Some(entry);
        Ok(())
    }

    async fn try_enter_block(&mut self) -> Result<BlockEntry> {
        if self.in_progress {
            return Ok(BlockEntry::AlreadyInProgress);
        }
        self.in_progress = true;
        self.block_entries += 1;

        if self.selection.is_none() {
            let fetched = self.content.fetch_random_unlearned_item().unwrap_or_else(|e| {
                log::error!("Failed to fetch a word: {e:#}");
                None
            });
            self.selection = fetched;
        }
        if self.selection.is_some() {
            return Ok(BlockEntry::Entered);
        }

        log::warn!("No unlearned word available, stopping the block");
        self.service.stop().await?;
        self.discard_pending();
        self.view = BlockingView::default();
        self.clear_episode();
        self.abandoned = true;
        Ok(BlockEntry::NoContent)
    }

    fn discard_pending(&mut self) {
        if let Some(subscription) = self.subscription.as_mut() {
            while subscription.try_recv().is_some() {}
        }
    }

    fn clear_episode(&mut self) {
        self.in_progress = false;
        self.selection = None;
        self.gate = None;
    }
}
