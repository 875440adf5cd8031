use clap::{Args, Subcommand};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use super::OutputFormat;
use crate::config::Config;

#[derive(Debug, Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Initialize configuration file
    Init,
}

const DEFAULT_CONFIG: &str = r#"# catsync configuration

# Server to push changesets to
server_url: http://localhost:8080

# Bearer token (or set CATSYNC_API_KEY)
# api_key: your-key

# Request timeout in seconds
# timeout_secs: 30

# How changed entities are detected: structural or dirty_flag
# change_detection: structural
"#;

impl ConfigCommand {
    pub fn run(
        &self,
        config: &Config,
        cli_config_path: Option<PathBuf>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("server_url: {}", config.server_url.value);
                        println!("  source: {}", config.server_url.source);
                        println!();

                        let key = if config.api_key.value.is_some() {
                            "********"
                        } else {
                            "(not set)"
                        };
                        println!("api_key: {}", key);
                        println!("  source: {}", config.api_key.source);
                        println!();

                        println!("timeout_secs: {}", config.timeout_secs.value);
                        println!("  source: {}", config.timeout_secs.source);
                        println!();

                        println!(
                            "change_detection: {:?}",
                            config.change_detection.value
                        );
                        println!("  source: {}", config.change_detection.source);
                    }
                }
                Ok(())
            }

            ConfigSubcommand::Init => {
                let config_path = cli_config_path.unwrap_or_else(Config::default_config_path);
                init_config_file(&config_path)
            }
        }
    }
}

fn init_config_file(config_path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    // Check if config already exists
    if config_path.exists() {
        println!("Config file already exists: {}", config_path.display());
        println!("Use 'catsync config show' to view current configuration.");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::File::create(config_path)?;
    file.write_all(DEFAULT_CONFIG.as_bytes())?;

    println!("Created config file: {}", config_path.display());
    println!("\nEdit this file to customize your settings.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSource;
    use tempfile::tempdir;

    #[test]
    fn test_init_writes_loadable_config() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.yaml");

        init_config_file(&path).unwrap();
        let config = Config::load(Some(path.clone())).unwrap();
        assert_eq!(config.config_file, Some(path));
        assert_eq!(config.timeout_secs.source, ConfigSource::Default);
    }

    #[test]
    fn test_init_keeps_existing_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "server_url: http://mine:1\n").unwrap();

        init_config_file(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "server_url: http://mine:1\n");
    }
}
