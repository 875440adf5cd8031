use clap::Args;
use std::path::PathBuf;

use catalog_sync_core::{check_invariants, diff_with, Changeset, DiffOptions};

use super::{DetectionArg, OutputFormat};
use crate::config::Config;
use crate::tree_file::read_tree;

/// Show what changed between a baseline and a working copy
#[derive(Debug, Args)]
pub struct DiffCommand {
    /// Baseline tree file (JSON)
    pub baseline: PathBuf,

    /// Working copy tree file (JSON)
    pub working: PathBuf,

    /// Override the configured change detection
    #[arg(long, value_enum)]
    pub detection: Option<DetectionArg>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

impl DiffCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let baseline = read_tree(&self.baseline)?;
        let working = read_tree(&self.working)?;
        check_invariants(&baseline, &working)?;

        let options = DiffOptions {
            detection: self
                .detection
                .map(Into::into)
                .unwrap_or(config.change_detection.value),
        };
        let changeset = diff_with(&baseline, &working, options);

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&changeset)?),
            OutputFormat::Text => print!("{}", summarize(&changeset)),
        }
        Ok(())
    }
}

/// One line per changed entity.
pub fn summarize(changeset: &Changeset) -> String {
    if changeset.is_empty() {
        return "No changes.\n".to_string();
    }

    let mut out = String::new();
    for group in &changeset.create_groups {
        out.push_str(&format!(
            "+ group {} ({} leaves)\n",
            group.id,
            group.leaves.len()
        ));
    }
    for group in &changeset.update_groups {
        out.push_str(&format!("~ group {}\n", group.id));
    }
    for id in &changeset.delete_group_ids {
        out.push_str(&format!("- group {}\n", id));
    }
    for (group_id, values) in &changeset.values {
        for leaf in &values.create_values {
            out.push_str(&format!("+ leaf {}/{}\n", group_id, leaf.id));
        }
        for leaf in &values.update_values {
            out.push_str(&format!("~ leaf {}/{}\n", group_id, leaf.id));
        }
        for id in &values.delete_values_id {
            out.push_str(&format!("- leaf {}/{}\n", group_id, id));
        }
    }
    out.push_str(&format!("{} change(s)\n", changeset.entry_count()));
    out
}
