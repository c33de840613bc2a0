//! The "blocker active" notification that stays up while an episode runs.

use anyhow::{Context, Result};
use std::process::Command;

pub trait Notifier: Send {
    /// Post or replace the ongoing notification
    ///
    /// # Errors
    ///
    /// Returns an error if the notification could not be posted
    fn post_active(&mut self, message: &str) -> Result<()>;

    /// Remove the ongoing notification
    fn clear(&mut self);
}

/// Writes notifications to the log only
#[derive(Debug, Default)]
pub struct LogNotifier {
    active: Option<String>,
}

impl LogNotifier {
    #[must_use]
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }
}

impl Notifier for LogNotifier {
    fn post_active(&mut self, message: &str) -> Result<()> {
        log::info!("Notification: {message}");
        self.active = Some(message.to_string());
        Ok(())
    }

    fn clear(&mut self) {
        self.active = None;
    }
}

/// Desktop notifications through `notify-send` or `osascript`
#[derive(Debug, Default)]
pub struct DesktopNotifier {
    last: Option<String>,
}

impl DesktopNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(target_os = "macos")]
fn notify_command(message: &str) -> Command {
    let mut cmd = Command::new("osascript");
    let escaped = message.replace('"', "\\\"");
    cmd.arg("-e")
        .arg(format!("display notification \"{escaped}\" with title \"wordgate\""));
    cmd
}

#[cfg(not(target_os = "macos"))]
fn notify_command(message: &str) -> Command {
    let mut cmd = Command::new("notify-send");
    cmd.args(["--app-name=wordgate", "--urgency=low", "wordgate", message]);
    cmd
}

impl Notifier for DesktopNotifier {
    fn post_active(&mut self, message: &str) -> Result<()> {
        // Desktop notifications can't be updated in place; only post changes
        if self.last.as_deref() == Some(message) {
            return Ok(());
        }
        let status = notify_command(message)
            .status()
            .context("Failed to run notification command")?;
        if !status.success() {
            anyhow::bail!("Notification command exited with {status}");
        }
        self.last = Some(message.to_string());
        Ok(())
    }

    fn clear(&mut self) {
        self.last = None;
    }
}
