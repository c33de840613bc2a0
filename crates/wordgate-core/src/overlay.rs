//! The system-level blocking surface and the controller that decides when it is up.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::process::{Child, Command};

use crate::capability::{Capabilities, Capability};
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverlayState {
    #[default]
    Hidden,
    Shown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayChange {
    Unchanged,
    Shown,
    Hidden,
}

/// Something that can cover the screen
pub trait OverlaySurface: Send {
    /// Create the surface
    ///
    /// # Errors
    ///
    /// Returns an error if the surface could not be created
    fn show(&mut self) -> Result<()>;

    /// Tear the surface down
    ///
    /// # Errors
    ///
    /// Returns an error if the surface could not be removed
    fn hide(&mut self) -> Result<()>;

    /// Whether the user used the "return to app" affordance since the last call
    fn take_return_request(&mut self) -> bool;

    /// Whether the surface is still up; a surface may close on its own
    fn is_open(&mut self) -> bool {
        true
    }

    /// Bring the host app to the front
    ///
    /// # Errors
    ///
    /// Returns an error if the host app could not be activated
    fn return_to_host(&mut self) -> Result<()>;
}

pub struct OverlayController {
    surface: Box<dyn OverlaySurface>,
    state: OverlayState,
}

impl OverlayController {
    #[must_use]
    pub fn new(surface: Box<dyn OverlaySurface>) -> Self {
        Self {
            surface,
            state: OverlayState::Hidden,
        }
    }

    #[must_use]
    pub const fn state(&self) -> OverlayState {
        self.state
    }

    /// Bring the surface in line with `blocking && outside`.
    ///
    /// Repeated signals in the same direction are no-ops. While blocking,
    /// a missing overlay permission tears the surface down and is reported
    /// so the caller can abort the episode.
    ///
    /// # Errors
    ///
    /// Returns `CapabilityDenied` when blocking without the overlay permission
    pub fn update(
        &mut self,
        blocking: bool,
        outside: bool,
        capabilities: &dyn Capabilities,
    ) -> Result<OverlayChange, EngineError> {
        if blocking && !capabilities.has(Capability::DisplayOverApps) {
            self.force_hide();
            return Err(EngineError::CapabilityDenied(Capability::DisplayOverApps));
        }

        match (self.state, blocking && outside) {
            (OverlayState::Hidden, true) => match self.surface.show() {
                Ok(()) => {
                    log::info!("Overlay shown");
                    self.state = OverlayState::Shown;
                    Ok(OverlayChange::Shown)
                }
                Err(e) => {
                    // Retried on the next sample
                    log::error!("Failed to show overlay: {e:#}");
                    Ok(OverlayChange::Unchanged)
                }
            },
            (OverlayState::Shown, false) => {
                self.teardown();
                Ok(OverlayChange::Hidden)
            }
            _ => Ok(OverlayChange::Unchanged),
        }
    }

    /// Handle the surface's single affordance. Returns true if the user asked
    /// to go back to the host app.
    pub fn poll_affordance(&mut self) -> bool {
        if self.state != OverlayState::Shown {
            return false;
        }
        if self.surface.take_return_request() {
            log::info!("Overlay: returning to host app");
            self.teardown();
            if let Err(e) = self.surface.return_to_host() {
                log::error!("Failed to return to host app: {e:#}");
            }
            return true;
        }
        if !self.surface.is_open() {
            log::debug!("Overlay closed on its own");
            self.state = OverlayState::Hidden;
        }
        false
    }

    /// Hide regardless of inputs; used on every teardown path
    pub fn force_hide(&mut self) -> bool {
        if self.state == OverlayState::Hidden {
            return false;
        }
        self.teardown();
        true
    }

    fn teardown(&mut self) {
        if let Err(e) = self.surface.hide() {
            log::warn!("Failed to hide overlay: {e:#}");
        }
        self.state = OverlayState::Hidden;
        log::info!("Overlay hidden");
    }
}

/// Desktop surface: an external full-screen program.
///
/// The program exiting successfully is the "return to app" affordance and
/// triggers `return_command`.
#[derive(Debug)]
pub struct CommandOverlay {
    show_command: Vec<String>,
    return_command: Vec<String>,
    child: Option<Child>,
}

impl CommandOverlay {
    #[must_use]
    pub fn new(show_command: Vec<String>, return_command: Vec<String>) -> Self {
        Self {
            show_command,
            return_command,
            child: None,
        }
    }
}

fn spawn(argv: &[String]) -> Result<Child> {
    let (program, args) = argv.split_first().context("Empty command")?;
    Command::new(program)
        .args(args)
        .spawn()
        .with_context(|| format!("Failed to spawn {program}"))
}

impl OverlaySurface for CommandOverlay {
    fn show(&mut self) -> Result<()> {
        if self.child.is_none() {
            self.child = Some(spawn(&self.show_command)?);
        }
        Ok(())
    }

    fn hide(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            child.kill().ok();
            child.wait().context("Failed to reap overlay process")?;
        }
        Ok(())
    }

    fn take_return_request(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                self.child = None;
                status.success()
            }
            Ok(None) => false,
            Err(e) => {
                log::warn!("Failed to poll overlay process: {e}");
                false
            }
        }
    }

    fn is_open(&mut self) -> bool {
        self.child.is_some()
    }

    fn return_to_host(&mut self) -> Result<()> {
        if self.return_command.is_empty() {
            return Ok(());
        }
        let mut child = spawn(&self.return_command)?;
        std::thread::spawn(move || child.wait());
        Ok(())
    }
}

impl Drop for CommandOverlay {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            child.kill().ok();
            child.wait().ok();
        }
    }
}
