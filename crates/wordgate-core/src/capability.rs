//! System capabilities the engine depends on.
//!
//! Each one is independently grantable and revocable, so they are checked
//! at the point of use and never cached as "granted".

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Draw a blocking surface above other applications
    DisplayOverApps,
    /// Read foreground usage accounting
    QueryUsage,
    /// Keep a persistent "blocker active" notification
    PostNotification,
}

impl Capability {
    pub const ALL: [Self; 3] = [
        Self::DisplayOverApps,
        Self::QueryUsage,
        Self::PostNotification,
    ];

    /// What the user has to do to grant it
    #[must_use]
    pub const fn grant_hint(self) -> &'static str {
        match self {
            Self::DisplayOverApps => "set `overlay_command` to an installed full-screen locker",
            Self::QueryUsage => "install a foreground-window tool (xdotool on Linux) or allow Automation access on macOS",
            Self::PostNotification => "set `notifications = true` in config.toml",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DisplayOverApps => "display over other apps",
            Self::QueryUsage => "query foreground usage",
            Self::PostNotification => "post a persistent notification",
        };
        f.write_str(name)
    }
}

pub trait Capabilities: Send + Sync {
    fn has(&self, capability: Capability) -> bool;
}

/// Capabilities that are not granted right now
#[must_use]
pub fn missing(capabilities: &dyn Capabilities) -> Vec<Capability> {
    Capability::ALL
        .into_iter()
        .filter(|c| !capabilities.has(*c))
        .collect()
}

/// Explicit grant set that can be changed at runtime
#[derive(Debug, Default)]
pub struct StaticCapabilities {
    granted: Mutex<HashSet<Capability>>,
}

impl StaticCapabilities {
    #[must_use]
    pub fn all() -> Self {
        Self::with(&Capability::ALL)
    }

    #[must_use]
    pub fn with(granted: &[Capability]) -> Self {
        Self {
            granted: Mutex::new(granted.iter().copied().collect()),
        }
    }

    pub fn grant(&self, capability: Capability) {
        self.granted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(capability);
    }

    pub fn revoke(&self, capability: Capability) {
        self.granted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&capability);
    }
}

impl Capabilities for StaticCapabilities {
    fn has(&self, capability: Capability) -> bool {
        self.granted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&capability)
    }
}

/// Desktop detection: capabilities are derived from what is installed and configured
#[derive(Debug, Clone)]
pub struct SystemCapabilities {
    overlay_program: Option<String>,
    notifications: bool,
}

impl SystemCapabilities {
    #[must_use]
    pub fn new(overlay_command: &[String], notifications: bool) -> Self {
        Self {
            overlay_program: overlay_command.first().cloned(),
            notifications,
        }
    }
}

impl Capabilities for SystemCapabilities {
    fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::DisplayOverApps => self
                .overlay_program
                .as_deref()
                .is_some_and(program_available),
            Capability::QueryUsage => usage_query_available(),
            Capability::PostNotification => self.notifications,
        }
    }
}

#[cfg(target_os = "macos")]
fn usage_query_available() -> bool {
    program_available("osascript")
}

#[cfg(target_os = "linux")]
fn usage_query_available() -> bool {
    program_available("xdotool")
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn usage_query_available() -> bool {
    false
}

/// Whether `program` is an existing path or resolvable through `PATH`
fn program_available(program: &str) -> bool {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file();
    }
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths).any(|dir| dir.join(program).is_file())
    })
}
