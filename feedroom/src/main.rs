mod config;
mod logging;
mod replay;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use config::load_config;

#[derive(Parser, Debug)]
#[command(name = "feedroom")]
#[command(about = "Videoroom feed controller", long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, global = true, env = "FEEDROOM_CONFIG_PATH")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a recorded signaling transcript against the in-memory gateway
    Replay {
        /// JSON-lines transcript
        transcript: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    logging::init_logging(&config.logging)?;
    info!(room = %config.client.room, "feedroom starting");

    match cli.command {
        Command::Replay { transcript } => {
            let summary = replay::replay_file(&transcript, config.client).await?;
            println!(
                "start: {:?}\napplied: {}\nskipped: {}\nfeeds: {}\nremoved on teardown: {}\nrelease failures: {}",
                summary.start,
                summary.applied,
                summary.skipped,
                summary
                    .final_feeds
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
                summary.teardown.feeds_removed,
                summary.teardown.failures.len(),
            );
        }
    }

    Ok(())
}
