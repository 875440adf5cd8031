//! catalogsync Admin CLI
//!
//! Offline management of the trees stored by catalogsync-server.
//!
//! # Usage
//!
//! ```bash
//! catalogsync-admin root seed P1 catalog.json
//! catalogsync-admin root list
//! catalogsync-admin root show P1
//! catalogsync-admin root remove P1
//! ```
//!
//! # Environment Variables
//!
//! - `CATALOGSYNC_DATA_DIR`: Directory where the server stores data (default: ~/.local/share/catalogsync-server)

use catalog_sync_core::{Identity, Root};
use catalogsync::server::{Config, ServerStorage};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "catalogsync-admin")]
#[command(version)]
#[command(about = "catalogsync server administration tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage stored trees
    Root(RootCommand),
}

#[derive(Args)]
struct RootCommand {
    #[command(subcommand)]
    command: RootSubcommand,
}

#[derive(Subcommand)]
enum RootSubcommand {
    /// Store a tree from a JSON file, replacing any existing one
    Seed {
        /// Root ID to store under
        root_id: String,
        /// Tree file (JSON)
        file: PathBuf,
    },
    /// List stored roots
    List,
    /// Print a stored tree
    Show {
        root_id: String,
    },
    /// Remove a stored tree and its assets
    Remove {
        root_id: String,
    },
}

fn storage() -> ServerStorage {
    ServerStorage::new(Config::from_env().data_dir)
}

fn seed(root_id: String, file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(&file)?;
    let mut root: Root = serde_json::from_str(&contents)?;
    root.id = Identity::existing(root_id.clone());
    root.clear_dirty();

    if root
        .groups
        .iter()
        .any(|g| g.id.is_new() || g.leaves.iter().any(|l| l.id.is_new()))
    {
        eprintln!("Error: seeded trees may only contain server ids");
        std::process::exit(1);
    }

    storage().save(&root_id, &root)?;
    println!("Stored root: {}", root_id);
    println!("  Groups: {}", root.groups.len());
    println!(
        "  Leaves: {}",
        root.groups.iter().map(|g| g.leaves.len()).sum::<usize>()
    );
    Ok(())
}

fn list() -> Result<(), Box<dyn std::error::Error>> {
    let storage = storage();
    let ids = storage.list()?;

    if ids.is_empty() {
        println!("No roots stored.");
        return Ok(());
    }

    println!("{:<40} {:<10} {:<10}", "ROOT", "GROUPS", "LEAVES");
    println!("{}", "-".repeat(60));
    for id in &ids {
        if let Some(root) = storage.load(id)? {
            let leaves: usize = root.groups.iter().map(|g| g.leaves.len()).sum();
            println!("{:<40} {:<10} {:<10}", id, root.groups.len(), leaves);
        }
    }
    println!();
    println!("Total: {} root(s)", ids.len());
    Ok(())
}

fn show(root_id: String) -> Result<(), Box<dyn std::error::Error>> {
    match storage().load(&root_id)? {
        Some(root) => {
            println!("{}", serde_json::to_string_pretty(&root)?);
            Ok(())
        }
        None => {
            eprintln!("Error: Root '{}' not found", root_id);
            std::process::exit(1);
        }
    }
}

fn remove(root_id: String) -> Result<(), Box<dyn std::error::Error>> {
    if !storage().remove(&root_id)? {
        eprintln!("Error: Root '{}' not found", root_id);
        std::process::exit(1);
    }
    println!("Removed root: {}", root_id);
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Root(root_cmd) => match root_cmd.command {
            RootSubcommand::Seed { root_id, file } => seed(root_id, file),
            RootSubcommand::List => list(),
            RootSubcommand::Show { root_id } => show(root_id),
            RootSubcommand::Remove { root_id } => remove(root_id),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
