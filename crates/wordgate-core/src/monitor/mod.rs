use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EngineError;

pub mod ledger;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "linux")]
pub mod linux;

pub use ledger::ActivityLedger;

/// Application activity information
#[derive(Debug, Clone)]
pub struct AppActivity {
    pub app_id: String,
    pub app_name: String,
    pub window_title: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// System monitor trait for platform-specific implementations
#[async_trait]
pub trait SystemMonitor: Send + Sync {
    /// Get current foreground application, `None` when nothing is focused
    async fn get_active_app(&self) -> Result<Option<AppActivity>>;
}

/// Per-app usage over a queried window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub app_id: String,
    pub last_used: DateTime<Utc>,
    pub foreground_seconds: u64,
}

/// Source of foreground usage accounting
pub trait UsageAccounting: Send + Sync {
    /// Apps used within `[since, until]`
    ///
    /// # Errors
    ///
    /// Returns an error if the accounting source cannot be read
    fn recent_activity(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, EngineError>;

    /// Foreground seconds of `app_id` within `[since, until]`
    ///
    /// # Errors
    ///
    /// Returns an error if the accounting source cannot be read
    fn foreground_seconds(
        &self,
        app_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64, EngineError>;
}

/// Create platform-specific monitor
///
/// # Errors
///
/// Returns an error if the current platform is not supported
pub fn create_monitor() -> Result<Box<dyn SystemMonitor>> {
    #[cfg(target_os = "macos")]
    {
        Ok(Box::new(macos::MacOSMonitor::new()))
    }

    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(linux::LinuxMonitor::new()))
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        anyhow::bail!("Unsupported platform")
    }
}
