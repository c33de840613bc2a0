mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use wordgate_core::config::get_data_dir;

use commands::config::ConfigAction;
use commands::word::WordAction;

#[derive(Parser)]
#[command(name = "wordgate")]
#[command(about = "Forced learning breaks: blocks the screen until you learn a word", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the background monitor
    Start,
    /// (Internal) Run the daemon process
    #[command(hide = true)]
    DaemonInternalStart,
    /// Stop the background monitor
    Stop,
    /// Show the monitor state
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Follow countdown and blocking events as they happen
    Watch {
        /// Print one JSON object per event
        #[arg(long)]
        json: bool,
    },
    /// Begin a countdown to the next learning break
    Arm {
        /// Minutes until blocking; saved as the new default
        minutes: Option<u32>,
    },
    /// Cancel the countdown or block without learning
    Disarm,
    /// Open the learning gate for the current block
    Learn,
    /// Show today's usage against the threshold
    Usage,
    /// Check the permissions the monitor needs
    Permissions,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Manage the words used to gate blocks
    Word {
        #[command(subcommand)]
        action: WordAction,
    },
    /// Learning statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if !matches!(cli.command, Commands::DaemonInternalStart) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_secs()
            .init();
    }

    let data_dir = get_data_dir()?;

    match cli.command {
        Commands::Start => commands::daemon::start_daemon(&data_dir),
        Commands::DaemonInternalStart => commands::daemon::run_daemon_process().await,
        Commands::Stop => commands::daemon::stop_daemon(&data_dir).await,
        Commands::Status { json } => commands::daemon::show_status(&data_dir, json).await,
        Commands::Watch { json } => commands::monitor::watch(&data_dir, json).await,
        Commands::Arm { minutes } => commands::monitor::arm(&data_dir, minutes).await,
        Commands::Disarm => commands::monitor::disarm(&data_dir).await,
        Commands::Learn => commands::learn::run_learning_gate(&data_dir).await,
        Commands::Usage => commands::monitor::show_usage(&data_dir).await,
        Commands::Permissions => commands::monitor::check_permissions(),
        Commands::Config { action } => commands::config::handle_config_command(action),
        Commands::Word { action } => commands::word::handle_word_command(action),
        Commands::Stats => commands::word::show_stats(),
    }
}
