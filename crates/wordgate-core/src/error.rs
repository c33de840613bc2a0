//! Domain errors of the enforcement engine.

use thiserror::Error;

use crate::capability::Capability;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A system capability the operation needs was not granted
    #[error("permission missing: {0}")]
    CapabilityDenied(Capability),

    /// Usage accounting could not be queried this time
    #[error("usage accounting unavailable: {0}")]
    UsageUnavailable(String),

    /// The content store has nothing left to gate a block with
    #[error("no unlearned word is available")]
    NoContent,

    /// The learning gate was completed before the minimum dwell time
    #[error(
        "You need to spend at least {min_secs} seconds learning this word. {remaining_secs} seconds remaining."
    )]
    DwellNotReached { min_secs: u64, remaining_secs: u64 },

    /// Completion was requested with no block in progress
    #[error("no learning session is in progress")]
    NotBlocked,

    /// Talking to the background monitor failed
    #[error("monitor connection failed: {0}")]
    Ipc(String),
}
