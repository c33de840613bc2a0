use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;

use super::{AppActivity, SystemMonitor};

pub struct MacOSMonitor;

impl MacOSMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for MacOSMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemMonitor for MacOSMonitor {
    async fn get_active_app(&self) -> Result<Option<AppActivity>> {
        // Bundle ID and window title from the same frontmost process
        let script = r#"
            tell application "System Events"
                set frontProc to first application process whose frontmost is true
                set bundleId to bundle identifier of frontProc
                set appName to name of frontProc
                try
                    set winTitle to name of first window of frontProc
                on error
                    set winTitle to ""
                end try
                return bundleId & "|" & appName & "|" & winTitle
            end tell
        "#;

        let output = Command::new("osascript")
            .arg("-e")
            .arg(script)
            .output()
            .await?;

        if !output.status.success() {
            anyhow::bail!(
                "osascript failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let result = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(parse_frontmost(&result))
    }
}

fn parse_frontmost(result: &str) -> Option<AppActivity> {
    let parts: Vec<&str> = result.splitn(3, '|').collect();
    if parts.len() < 2 || parts[0].is_empty() {
        return None;
    }
    let window_title = parts
        .get(2)
        .filter(|title| !title.is_empty())
        .map(|title| (*title).to_string());

    Some(AppActivity {
        app_id: parts[0].to_string(),
        app_name: parts[1].to_string(),
        window_title,
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frontmost() {
        let app = parse_frontmost("com.apple.Terminal|Terminal|wordgate learn").unwrap();
        assert_eq!(app.app_id, "com.apple.Terminal");
        assert_eq!(app.window_title.as_deref(), Some("wordgate learn"));

        let app = parse_frontmost("com.apple.finder|Finder|").unwrap();
        assert!(app.window_title.is_none());

        assert!(parse_frontmost("").is_none());
    }
}
