//! Periodic, independently cancellable background tasks.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// What a periodic task wants after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Handle to a periodic task. Cancelling or dropping it stops the task.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn cancel(self) {
        log::debug!("Cancelling {} loop", self.name);
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        let _ = self.cancel.send(true);
        self.join.abort();
    }
}

/// Run `task` every `period` until it returns [`Flow::Stop`] or the handle is cancelled.
///
/// Ticks never overlap. A failed tick is logged and the loop keeps going.
/// With `immediate` the first tick fires right away, otherwise after one period.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    immediate: bool,
    mut task: F,
) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<Flow>> + Send + 'static,
{
    let (cancel, mut cancelled) = watch::channel(false);
    let join = tokio::spawn(async move {
        let first = if immediate {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut ticker = interval_at(first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancelled.changed() => break,
            }
            if *cancelled.borrow() {
                break;
            }
            match task().await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(e) => log::error!("{name} tick failed: {e:#}"),
            }
        }
        log::debug!("{name} loop exited");
    });

    TaskHandle { name, cancel, join }
}
