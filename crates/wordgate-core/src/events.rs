//! Event channel from the background monitor to interactive listeners.
//!
//! Delivery is best-effort: a subscriber only sees events published after it
//! attached, and a lagging subscriber skips what it missed. Subscribers must
//! reconcile through the status query when they attach.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::capability::Capability;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockEvent {
    CountdownTick { seconds_remaining: u64 },
    BlockingStarted,
    Unblocked,
}

/// Non-fatal conditions the user should be told about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notice {
    CapabilityDenied(Capability),
    UsageUnavailable { consecutive_failures: u32 },
    EpisodeAborted { reason: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapabilityDenied(capability) => write!(
                f,
                "Permission missing: {capability}. To fix: {}",
                capability.grant_hint()
            ),
            Self::UsageUnavailable {
                consecutive_failures,
            } => write!(
                f,
                "Usage data unavailable ({consecutive_failures} failed queries in a row)"
            ),
            Self::EpisodeAborted { reason } => write!(f, "Blocking stopped: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventChannel {
    events: broadcast::Sender<BlockEvent>,
    notices: broadcast::Sender<Notice>,
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl EventChannel {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (notices, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { events, notices }
    }

    /// Publish to whoever is listening right now; returns the receiver count
    pub fn publish(&self, event: BlockEvent) -> usize {
        log::debug!("Publishing {event:?}");
        self.events.send(event).unwrap_or(0)
    }

    pub fn notify(&self, notice: Notice) -> usize {
        log::warn!("Notice: {notice:?}");
        self.notices.send(notice).unwrap_or(0)
    }

    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            source: Source::Local(self.events.subscribe()),
        }
    }

    #[must_use]
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

/// A live subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    source: Source,
}

#[derive(Debug)]
enum Source {
    Local(broadcast::Receiver<BlockEvent>),
    Remote {
        rx: mpsc::Receiver<BlockEvent>,
        reader: JoinHandle<()>,
    },
}

impl Subscription {
    /// Subscription fed by a reader task, e.g. one draining a socket
    #[must_use]
    pub fn remote(rx: mpsc::Receiver<BlockEvent>, reader: JoinHandle<()>) -> Self {
        Self {
            source: Source::Remote { rx, reader },
        }
    }

    /// Wait for the next event; `None` once the publisher is gone
    pub async fn recv(&mut self) -> Option<BlockEvent> {
        match &mut self.source {
            Source::Local(rx) => loop {
                match rx.recv().await {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Subscriber lagged, {skipped} events skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
            Source::Remote { rx, .. } => rx.recv().await,
        }
    }

    /// Next already-delivered event, without waiting
    pub fn try_recv(&mut self) -> Option<BlockEvent> {
        match &mut self.source {
            Source::Local(rx) => loop {
                match rx.try_recv() {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                        log::warn!("Subscriber lagged, {skipped} events skipped");
                    }
                    Err(_) => return None,
                }
            },
            Source::Remote { rx, .. } => rx.try_recv().ok(),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Source::Remote { reader, .. } = &self.source {
            reader.abort();
        }
    }
}
