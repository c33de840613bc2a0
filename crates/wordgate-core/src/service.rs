//! The monitor as seen by interactive clients, in-process or over IPC.

use anyhow::Result;
use async_trait::async_trait;

use crate::daemon::Monitor;
use crate::events::Subscription;
use crate::ipc::{IpcClient, IpcRequest};
use crate::machine::MonitorStatus;
use crate::usage::UsageSnapshot;

#[async_trait]
pub trait EnforcementService: Send + Sync {
    async fn status(&self) -> Result<MonitorStatus>;

    /// Begin an episode, or report the one already running
    async fn start(&self, delay_minutes: u32) -> Result<MonitorStatus>;

    async fn stop(&self) -> Result<MonitorStatus>;

    async fn unblock(&self) -> Result<MonitorStatus>;

    async fn usage(&self) -> Result<UsageSnapshot>;

    /// Live events from now on; earlier ones are missed
    async fn subscribe(&self) -> Result<Subscription>;
}

#[async_trait]
impl EnforcementService for Monitor {
    async fn status(&self) -> Result<MonitorStatus> {
        Ok(Self::status(self).await)
    }

    async fn start(&self, delay_minutes: u32) -> Result<MonitorStatus> {
        Ok(Self::start(self, delay_minutes).await)
    }

    async fn stop(&self) -> Result<MonitorStatus> {
        Ok(Self::stop(self).await)
    }

    async fn unblock(&self) -> Result<MonitorStatus> {
        Ok(Self::unblock(self).await)
    }

    async fn usage(&self) -> Result<UsageSnapshot> {
        Ok(Self::usage(self).await?)
    }

    async fn subscribe(&self) -> Result<Subscription> {
        Ok(Self::subscribe(self))
    }
}

#[async_trait]
impl EnforcementService for IpcClient {
    async fn status(&self) -> Result<MonitorStatus> {
        self.expect_status(IpcRequest::Status).await
    }

    async fn start(&self, delay_minutes: u32) -> Result<MonitorStatus> {
        self.expect_status(IpcRequest::Start { delay_minutes }).await
    }

    async fn stop(&self) -> Result<MonitorStatus> {
        self.expect_status(IpcRequest::Stop).await
    }

    async fn unblock(&self) -> Result<MonitorStatus> {
        self.expect_status(IpcRequest::Unblock).await
    }

    async fn usage(&self) -> Result<UsageSnapshot> {
        self.fetch_usage().await
    }

    async fn subscribe(&self) -> Result<Subscription> {
        Self::subscribe(self).await
    }
}
