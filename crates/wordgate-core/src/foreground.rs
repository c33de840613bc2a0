//! Is the user inside the host app or somewhere else?

use chrono::{DateTime, Duration, Utc};

use crate::error::EngineError;
use crate::monitor::UsageAccounting;

#[derive(Debug, Clone)]
pub struct ForegroundDetector {
    host_app_id: String,
    window: Duration,
}

impl ForegroundDetector {
    #[must_use]
    pub fn new(host_app_id: impl Into<String>, window: std::time::Duration) -> Self {
        Self {
            host_app_id: host_app_id.into(),
            window: Duration::from_std(window).unwrap_or(Duration::seconds(10)),
        }
    }

    #[must_use]
    pub fn host_app_id(&self) -> &str {
        &self.host_app_id
    }

    /// Whether the most recently used app in the sampling window is not the host.
    ///
    /// An empty window counts as inside.
    ///
    /// # Errors
    ///
    /// Returns an error if the accounting source cannot be read
    pub fn is_outside_host(
        &self,
        accounting: &dyn UsageAccounting,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let records = accounting.recent_activity(now - self.window, now)?;
        let latest = records.iter().max_by_key(|record| record.last_used);
        Ok(latest.is_some_and(|record| record.app_id != self.host_app_id))
    }
}
