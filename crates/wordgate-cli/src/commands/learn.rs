/// The learning gate in the terminal
use anyhow::Result;
use chrono::Utc;
use std::{
    io::{self, Write},
    path::Path,
    sync::Arc,
    time::Duration,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use wordgate_core::{ClientSynchronizer, EngineConfig, EngineError, SystemClock};
use wordgate_storage::Database;

use super::helpers::format_remaining;
use super::monitor::connect;

pub async fn run_learning_gate(data_dir: &Path) -> Result<()> {
    let client = Arc::new(connect(data_dir)?);
    let config = EngineConfig::load(&EngineConfig::default_path()?)?;
    let db = Database::new(None)?;
    let rearm_delay = db.get_settings()?.delay_minutes;

    let mut sync = ClientSynchronizer::new(
        client,
        Box::new(db),
        Arc::new(SystemClock),
        config.min_dwell_seconds,
        rearm_delay,
    );

    let view = sync.mount().await?;
    if let Err(EngineError::NoContent) = sync.gating_item() {
        println!("{}, blocking stopped.", EngineError::NoContent);
        println!("Add some with `wordgate word add <word> <definition>`.");
        return Ok(());
    }
    if !view.is_blocked {
        match view.seconds_remaining {
            Some(secs) if view.is_service_active => {
                println!("Not blocked yet. Next break in {}.", format_remaining(secs));
            }
            _ => println!("Not blocked. Arm the monitor with `wordgate arm`."),
        }
        return Ok(());
    }

    let item = sync.gating_item()?.clone();
    let Some(gate) = sync.open_gate() else {
        anyhow::bail!("Blocked, but the learning gate did not open");
    };

    println!();
    println!("  {}", item.word);
    println!();
    println!("  {}", item.definition);
    println!();
    println!(
        "Take at least {}s with it, then press Enter to continue.",
        gate.min_dwell_secs()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut announced_ready = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sync.pump().await?;
                if sync.gate().is_none() {
                    println!("The block was ended elsewhere.");
                    return Ok(());
                }
                if announced_ready {
                    continue;
                }
                if sync.can_complete() {
                    println!("\rReady. Press Enter to continue.   ");
                    announced_ready = true;
                } else {
                    print!("\rAvailable in {}s ", gate.remaining_secs(Utc::now()));
                    io::stdout().flush()?;
                }
            }
            line = lines.next_line() => {
                if line?.is_none() {
                    // stdin closed; the block stays up
                    return Ok(());
                }
                match sync.complete_learning_session().await {
                    Ok(done) => {
                        println!("Learned '{}' in {}s.", done.item.word, done.dwell_seconds);
                        match done.rearmed.and_then(|view| view.seconds_remaining) {
                            Some(secs) => println!("Next break in {}.", format_remaining(secs)),
                            None => println!("The monitor could not be re-armed."),
                        }
                        return Ok(());
                    }
                    Err(e) => match e.downcast_ref::<EngineError>() {
                        Some(EngineError::DwellNotReached { .. }) => println!("{e}"),
                        _ => return Err(e),
                    },
                }
            }
        }
    }
}
