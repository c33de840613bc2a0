use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use wordgate_storage::Database;

use super::{Monitor, MonitorParts};
use crate::capability::SystemCapabilities;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::foreground::ForegroundDetector;
use crate::ipc::{listen, IpcHandler};
use crate::monitor::{create_monitor, ActivityLedger, SystemMonitor};
use crate::notifier::DesktopNotifier;
use crate::overlay::CommandOverlay;
use crate::usage::{FastTestUsageClock, ProductionUsageClock, UsageClock, UsageMode};

/// The detached background process: monitor, usage recorder and IPC server
pub struct Daemon {
    monitor: Monitor,
    ledger: Arc<ActivityLedger>,
    system_monitor: Arc<dyn SystemMonitor>,
    clock: Arc<dyn Clock>,
    sample_interval: Duration,
    sock_path: PathBuf,
    shutdown_signal: Arc<AtomicBool>,
}

impl Daemon {
    /// Assemble the desktop monitor from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the platform has no foreground monitor
    pub fn new(config: &EngineConfig, database: Database, sock_path: PathBuf) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let capabilities = Arc::new(SystemCapabilities::new(
            &config.overlay_command,
            config.notifications,
        ));
        let ledger = Arc::new(ActivityLedger::new(config.tick_interval()));

        let usage_clock: Box<dyn UsageClock> = match config.mode {
            UsageMode::FastTest => Box::new(FastTestUsageClock::new(
                config.threshold_secs(),
                clock.now(),
            )),
            UsageMode::Production => Box::new(ProductionUsageClock::new(
                ledger.clone(),
                capabilities.clone(),
                config.host_app_id.clone(),
                config.threshold_secs(),
            )),
        };

        let monitor = Monitor::new(MonitorParts {
            clock: clock.clone(),
            capabilities,
            accounting: ledger.clone(),
            usage_clock,
            surface: Box::new(CommandOverlay::new(
                config.overlay_command.clone(),
                config.return_command.clone(),
            )),
            notifier: Box::new(DesktopNotifier::new()),
            store: Box::new(database),
            detector: ForegroundDetector::new(config.host_app_id.clone(), config.sample_window()),
            tick_interval: config.tick_interval(),
            enforce_usage_threshold: config.enforce_usage_threshold,
        });

        Ok(Self {
            monitor,
            ledger,
            system_monitor: Arc::from(create_monitor()?),
            clock,
            sample_interval: config.tick_interval(),
            sock_path,
            shutdown_signal: Arc::new(AtomicBool::new(false)),
        })
    }

    #[must_use]
    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Serve until Ctrl-C or an IPC shutdown request
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon cannot start serving
    pub async fn run_with_signals(&mut self) -> Result<()> {
        let recorder = self.ledger.spawn_recorder(
            self.system_monitor.clone(),
            self.clock.clone(),
            self.monitor.events().clone(),
            self.sample_interval,
        );

        let restored = self.monitor.restore().await;
        log::info!("Monitor restored in state {restored}");

        let ipc_handler = Arc::new(IpcHandler::new(
            self.monitor.clone(),
            self.shutdown_signal.clone(),
        ));
        let sock_path = self.sock_path.clone();
        let listener = tokio::spawn(async move {
            if let Err(e) = listen(ipc_handler, &sock_path).await {
                log::error!("IPC listener failed: {e}");
            }
        });

        let mut interval = interval(Duration::from_millis(250));
        log::info!("Daemon started with signal handling and IPC");

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Received Ctrl-C, shutting down...");
                    self.shutdown_signal.store(true, Ordering::SeqCst);
                }
            }

            if self.shutdown_signal.load(Ordering::SeqCst) {
                break;
            }
        }

        listener.abort();
        recorder.cancel();
        self.monitor.shutdown().await;
        if self.sock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.sock_path) {
                log::warn!("Failed to remove socket: {e}");
            }
        }
        log::info!("Daemon shut down gracefully.");
        Ok(())
    }
}
