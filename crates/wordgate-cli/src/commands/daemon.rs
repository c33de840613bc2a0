//! Starting, stopping and querying the background monitor process
use anyhow::{Context, Result};
use std::{
    env, fs,
    path::{Path, PathBuf},
    process::Command,
    time::Duration,
};
use sysinfo::{Pid, System};
use wordgate_core::{
    config::get_data_dir,
    ipc::{IpcClient, IpcRequest, IpcResponse},
    Daemon, EngineConfig, EnforcementState, MonitorStatus,
};
use wordgate_storage::Database;

use super::helpers::format_remaining;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Files the monitor process leaves in the data directory
struct RuntimeFiles {
    pid: PathBuf,
    sock: PathBuf,
}

impl RuntimeFiles {
    fn in_dir(data_dir: &Path) -> Self {
        Self {
            pid: data_dir.join("wordgate.pid"),
            sock: data_dir.join("wordgate.sock"),
        }
    }

    fn read_pid(&self) -> Option<usize> {
        fs::read_to_string(&self.pid).ok()?.trim().parse().ok()
    }

    fn remove_socket(&self) -> Result<()> {
        if self.sock.exists() {
            fs::remove_file(&self.sock)
                .with_context(|| format!("Cannot remove {}", self.sock.display()))?;
        }
        Ok(())
    }
}

fn is_alive(pid: usize) -> bool {
    System::new().refresh_process(Pid::from(pid))
}

fn kill(pid: usize) -> bool {
    let mut sys = System::new();
    sys.refresh_process(Pid::from(pid)) && sys.process(Pid::from(pid)).is_some_and(|p| p.kill())
}

// The monitor process outlives this one and is never waited on
#[allow(clippy::zombie_processes)]
pub fn start_daemon(data_dir: &Path) -> Result<()> {
    let files = RuntimeFiles::in_dir(data_dir);

    if let Some(pid) = files.read_pid() {
        if is_alive(pid) {
            log::info!("Monitor is already running (PID: {pid}).");
            return Ok(());
        }
    }
    if files.pid.exists() {
        log::warn!("Removing stale PID file.");
        let _ = fs::remove_file(&files.pid);
    }
    files.remove_socket()?;

    fs::create_dir_all(data_dir)?;
    log::info!("Starting wordgate monitor...");

    let child = Command::new(env::current_exe()?)
        .arg("daemon-internal-start")
        .current_dir(env::current_dir()?)
        .spawn()
        .context("Failed to spawn the monitor process")?;

    fs::write(&files.pid, child.id().to_string())?;
    log::info!("Monitor started (PID: {}).", child.id());
    Ok(())
}

pub async fn run_daemon_process() -> Result<()> {
    // Fresh process: stderr goes nowhere, so log into the data directory
    if let Err(e) = setup_daemon_logging() {
        eprintln!("Failed to set up monitor logging: {e:#}");
        return Err(e);
    }

    let result = run_monitor().await;
    if let Err(e) = &result {
        log::error!("Monitor exited with a fatal error: {e:#}");
    }
    result
}

async fn run_monitor() -> Result<()> {
    let config = EngineConfig::load(&EngineConfig::default_path()?)?;
    log::info!(
        "Monitor up: mode {}, threshold {}s, host app '{}'",
        config.mode,
        config.threshold_secs(),
        config.host_app_id
    );
    let db = Database::new(None)?;
    let mut daemon = Daemon::new(&config, db, get_data_dir()?.join("wordgate.sock"))?;
    daemon.run_with_signals().await
}

pub async fn stop_daemon(data_dir: &Path) -> Result<()> {
    let files = RuntimeFiles::in_dir(data_dir);

    let Some(pid) = files.read_pid() else {
        log::info!("Monitor is not running.");
        let _ = fs::remove_file(&files.pid);
        return files.remove_socket();
    };

    log::info!("Stopping wordgate monitor (PID: {pid})...");
    let client = IpcClient::new(&files.sock);
    match client.send_command(IpcRequest::Shutdown).await {
        Ok(IpcResponse::Shutdown) => {
            tokio::time::sleep(SHUTDOWN_GRACE).await;
            if !is_alive(pid) {
                log::info!("Monitor stopped.");
            } else if kill(pid) {
                log::warn!("Monitor ignored the shutdown request and was killed.");
            }
        }
        Ok(other) => log::error!("Unexpected answer to shutdown: {other:?}"),
        Err(e) => {
            log::error!("Shutdown request failed: {e:#}");
            if kill(pid) {
                log::info!("Monitor process killed.");
            }
        }
    }

    fs::remove_file(&files.pid)?;
    files.remove_socket()
}

pub async fn show_status(data_dir: &Path, json: bool) -> Result<()> {
    let files = RuntimeFiles::in_dir(data_dir);

    let status = if files.sock.exists() {
        match IpcClient::new(&files.sock)
            .send_command(IpcRequest::Status)
            .await
        {
            Ok(IpcResponse::Status(status)) => Some(status),
            Ok(other) => anyhow::bail!("Unexpected answer to status: {other:?}"),
            Err(e) => {
                log::debug!("Monitor not responding: {e:#}");
                None
            }
        }
    } else {
        None
    };

    if json {
        let value = match status {
            Some(status) => serde_json::json!({ "running": true, "status": status }),
            None => serde_json::json!({ "running": false }),
        };
        println!("{value}");
        return Ok(());
    }

    match status {
        Some(status) => print_status(&status),
        None => println!("Monitor: not running (start it with `wordgate start`)"),
    }
    Ok(())
}

fn print_status(status: &MonitorStatus) {
    println!("Monitor: running");
    match status.state {
        EnforcementState::Inactive => println!("State: idle (arm with `wordgate arm`)"),
        EnforcementState::CountingDown => println!(
            "State: counting down, learning break in {}",
            format_remaining(status.seconds_remaining.unwrap_or(0))
        ),
        EnforcementState::Blocking => println!("State: blocking (run `wordgate learn`)"),
    }
    if status.episode > 0 {
        println!("Episode: {}", status.episode);
    }
}

fn setup_daemon_logging() -> Result<()> {
    let data_dir = get_data_dir()?;
    fs::create_dir_all(&data_dir)?;

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(data_dir.join("wordgate.log"))?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .format_timestamp_secs()
        .init();
    Ok(())
}
