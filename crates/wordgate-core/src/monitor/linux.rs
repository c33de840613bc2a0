use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;

use super::{AppActivity, SystemMonitor};

/// X11 foreground detection through `xdotool`
pub struct LinuxMonitor;

impl LinuxMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn xdotool(args: &[&str]) -> Result<Option<String>> {
        let output = Command::new("xdotool")
            .args(args)
            .output()
            .await
            .context("Failed to run xdotool")?;
        if !output.status.success() {
            // No focused window (e.g. locked screen)
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!text.is_empty()).then_some(text))
    }
}

impl Default for LinuxMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemMonitor for LinuxMonitor {
    async fn get_active_app(&self) -> Result<Option<AppActivity>> {
        let Some(pid) = Self::xdotool(&["getactivewindow", "getwindowpid"]).await? else {
            return Ok(None);
        };
        let comm = tokio::fs::read_to_string(format!("/proc/{pid}/comm"))
            .await
            .with_context(|| format!("Failed to read process name of pid {pid}"))?;
        let app_id = comm.trim().to_string();
        let window_title = Self::xdotool(&["getactivewindow", "getwindowname"]).await?;

        log::debug!("Active app: {app_id} (pid {pid}) - window: {window_title:?}");

        Ok(Some(AppActivity {
            app_name: app_id.clone(),
            app_id,
            window_title,
            timestamp: Utc::now(),
        }))
    }
}
