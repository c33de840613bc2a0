/// Commands that talk to the running monitor
use anyhow::Result;
use std::path::Path;
use wordgate_core::{
    capability::{missing, SystemCapabilities},
    BlockEvent, Capability, EngineConfig, EnforcementService, EnforcementState, IpcClient,
    MonitorStatus,
};
use wordgate_storage::Database;

use super::helpers::format_remaining;

/// Client for the running monitor, or an actionable error if there is none
pub fn connect(data_dir: &Path) -> Result<IpcClient> {
    let sock_path = data_dir.join("wordgate.sock");
    if !sock_path.exists() {
        anyhow::bail!("The monitor is not running. Start it with `wordgate start`.");
    }
    Ok(IpcClient::new(&sock_path))
}

pub async fn arm(data_dir: &Path, minutes: Option<u32>) -> Result<()> {
    let db = Database::new(None)?;
    let delay = match minutes {
        Some(minutes) => {
            db.set_delay_minutes(minutes)?;
            minutes
        }
        None => db.get_settings()?.delay_minutes,
    };

    let client = connect(data_dir)?;
    let before = client.status().await?;
    if before.state != EnforcementState::Inactive {
        println!("Already running, not restarted.");
        print_state(&before);
        return Ok(());
    }

    let status = client.start(delay).await?;
    print_state(&status);
    Ok(())
}

pub async fn disarm(data_dir: &Path) -> Result<()> {
    let client = connect(data_dir)?;
    let status = client.stop().await?;
    print_state(&status);
    Ok(())
}

pub async fn watch(data_dir: &Path, json: bool) -> Result<()> {
    let client = connect(data_dir)?;
    // Subscribe before asking for the status so nothing falls in between
    let mut events = client.subscribe().await?;
    let status = client.status().await?;
    if json {
        println!("{}", serde_json::json!({ "status": status }));
    } else {
        print_state(&status);
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) if json => println!("{}", serde_json::to_string(&event)?),
                Some(event) => print_event(event),
                None => {
                    println!("The monitor went away.");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

pub async fn show_usage(data_dir: &Path) -> Result<()> {
    let client = connect(data_dir)?;
    let usage = client.usage().await?;
    let mode = if usage.is_fast_mode {
        "fast-test"
    } else {
        "today"
    };
    println!(
        "Usage ({mode}): {} of {}",
        format_remaining(usage.elapsed_seconds),
        format_remaining(usage.threshold_seconds)
    );
    if usage.should_block {
        println!("Threshold reached.");
    }
    Ok(())
}

pub fn check_permissions() -> Result<()> {
    let config = EngineConfig::load(&EngineConfig::default_path()?)?;
    let capabilities = SystemCapabilities::new(&config.overlay_command, config.notifications);
    let denied = missing(&capabilities);

    for capability in Capability::ALL {
        let mark = if denied.contains(&capability) {
            "missing"
        } else {
            "ok"
        };
        println!("  [{mark:^7}] {capability}");
    }

    if denied.is_empty() {
        println!("\nAll permissions granted.");
        return Ok(());
    }
    println!("\nTo fix:");
    for capability in denied {
        println!("  {capability}: {}", capability.grant_hint());
    }
    Ok(())
}

fn print_state(status: &MonitorStatus) {
    match status.state {
        EnforcementState::Inactive => println!("Idle."),
        EnforcementState::CountingDown => println!(
            "Learning break in {}.",
            format_remaining(status.seconds_remaining.unwrap_or(0))
        ),
        EnforcementState::Blocking => println!("Blocking. Run `wordgate learn` to continue."),
    }
}

fn print_event(event: BlockEvent) {
    match event {
        BlockEvent::CountdownTick { seconds_remaining } => {
            println!("Learning break in {}", format_remaining(seconds_remaining));
        }
        BlockEvent::BlockingStarted => println!("Blocking. Run `wordgate learn` to continue."),
        BlockEvent::Unblocked => println!("Unblocked."),
    }
}
