use clap::Args;

use catalog_sync_core::check_server;

use crate::config::Config;

/// Show the configured server and whether it responds
#[derive(Debug, Args)]
pub struct StatusCommand;

impl StatusCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let rt = tokio::runtime::Runtime::new()?;

        println!("Sync Configuration");
        println!("==================");
        println!();
        println!(
            "Server:  {} ({})",
            config.server_url.value, config.server_url.source
        );
        println!(
            "API key: {}",
            if config.api_key.value.is_some() {
                "set"
            } else {
                "not set"
            }
        );
        println!();

        print!("Server status: ");
        if rt.block_on(check_server(&config.server_url.value)) {
            println!("✓ reachable");
        } else {
            println!("✗ unreachable");
        }
        Ok(())
    }
}
