/// Configuration management command handlers
use anyhow::Result;
use clap::Subcommand;
use wordgate_core::EngineConfig;
use wordgate_storage::Database;

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print one option
    Get { key: String },
    /// Change one option
    Set { key: String, value: String },
    /// Print every option
    List,
}

pub fn handle_config_command(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get { key } => handle_config_get(&key),
        ConfigAction::Set { key, value } => handle_config_set(&key, &value),
        ConfigAction::List => handle_config_list(),
    }
}

fn handle_config_get(key: &str) -> Result<()> {
    let config = EngineConfig::load(&EngineConfig::default_path()?)?;
    match config.get_value(key) {
        Some(value) => println!("{key} = {value}"),
        None => anyhow::bail!("Unknown config key: {key}"),
    }
    Ok(())
}

fn handle_config_set(key: &str, value: &str) -> Result<()> {
    let path = EngineConfig::default_path()?;
    let mut config = EngineConfig::load(&path)?;
    config.set_value(key, value)?;
    config.save(&path)?;

    // The stored delay preference overrides the file, keep them together
    if key == "delay_minutes" {
        let db = Database::new(None)?;
        db.set_delay_minutes(config.delay_minutes)?;
    }

    println!("Set {key} = {value}");
    if key != "delay_minutes" {
        println!("Restart the monitor for the change to take effect.");
    }
    Ok(())
}

fn handle_config_list() -> Result<()> {
    let path = EngineConfig::default_path()?;
    let config = EngineConfig::load(&path)?;

    println!("Configuration ({}):", path.display());
    for key in EngineConfig::KEYS {
        if let Some(value) = config.get_value(key) {
            println!("  {key} = {value}");
        }
    }

    let db = Database::new(None)?;
    let settings = db.get_settings()?;
    println!("\nStored preferences:");
    println!("  delay_minutes = {}", settings.delay_minutes);
    Ok(())
}
