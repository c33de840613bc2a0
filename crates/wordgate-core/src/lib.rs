pub mod capability;
pub mod clock;
pub mod config;
pub mod daemon;
pub mod error;
pub mod events;
pub mod foreground;
pub mod gate;
pub mod ipc;
pub mod machine;
pub mod monitor;
pub mod notifier;
pub mod overlay;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod sync;
pub mod usage;

pub use capability::{Capabilities, Capability, StaticCapabilities};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use daemon::{Daemon, Monitor, MonitorParts};
pub use error::EngineError;
pub use events::{BlockEvent, EventChannel, Notice, Subscription};
pub use gate::{ContentItem, ContentStore, LearningGate};
pub use ipc::IpcClient;
pub use machine::{EnforcementMachine, EnforcementState, MonitorStatus};
pub use service::EnforcementService;
pub use sync::{BlockEntry, BlockingView, ClientSynchronizer, CompletedSession};
pub use usage::{UsageMode, UsageSnapshot};
