use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod tree_file;

use commands::{ConfigCommand, DiffCommand, EnvelopeCommand, PushCommand, StatusCommand};
use config::Config;

#[derive(Parser)]
#[command(name = "catsync")]
#[command(version)]
#[command(about = "Diff and push nested catalog trees", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the changeset between two tree files
    Diff(DiffCommand),

    /// Show the envelope a push would send
    Envelope(EnvelopeCommand),

    /// Push a working copy to the server
    Push(PushCommand),

    /// Manage configuration
    Config(ConfigCommand),

    /// Show server status
    Status(StatusCommand),
}

fn main() {
    init_tracing();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "catsync=warn,catalog_sync_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let cli_config_path = cli.config.clone();
    let config = Config::load(cli.config)?;

    match &cli.command {
        Some(Commands::Diff(cmd)) => cmd.run(&config)?,
        Some(Commands::Envelope(cmd)) => cmd.run(&config)?,
        Some(Commands::Push(cmd)) => cmd.run(&config)?,
        Some(Commands::Config(cmd)) => cmd.run(&config, cli_config_path)?,
        Some(Commands::Status(cmd)) => cmd.run(&config)?,
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
