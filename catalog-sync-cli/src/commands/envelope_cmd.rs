use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use catalog_sync_core::{build_envelope, check_invariants, diff_with, DiffOptions, TransportEnvelope};

use super::{DetectionArg, OutputFormat};
use crate::commands::push::require_server_id;
use crate::config::Config;
use crate::tree_file::read_tree;

/// Print the multipart envelope a push would send
#[derive(Debug, Args)]
pub struct EnvelopeCommand {
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

#[derive(Debug, Serialize)]
struct EnvelopeReport {
    root_id: String,
    changeset: serde_json::Value,
    parts: Vec<PartReport>,
}

#[derive(Debug, Serialize)]
struct PartReport {
    name: String,
    bytes: usize,
}

impl EnvelopeCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let baseline = read_tree(&self.baseline)?;
        let working = read_tree(&self.working)?;
        let root_id = require_server_id(&baseline)?;
        check_invariants(&baseline, &working)?;

        let options = DiffOptions {
            detection: self
                .detection
                .map(Into::into)
                .unwrap_or(config.change_detection.value),
        };
        let changeset = diff_with(&baseline, &working, options);
        let envelope = build_envelope(&root_id, &changeset)?;
        let report = report(&envelope)?;

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Text => {
                println!("root_id: {}", report.root_id);
                println!("changeset:");
                println!("{}", serde_json::to_string_pretty(&report.changeset)?);
                if report.parts.is_empty() {
                    println!("parts: none");
                } else {
                    println!("parts:");
                    for part in &report.parts {
                        println!("  {} ({} bytes)", part.name, part.bytes);
                    }
                }
            }
        }
        Ok(())
    }
}

fn report(envelope: &TransportEnvelope) -> Result<EnvelopeReport, serde_json::Error> {
    Ok(EnvelopeReport {
        root_id: envelope.root_id.to_string(),
        changeset: serde_json::from_str(&envelope.structured_diff)?,
        parts: envelope
            .binary_parts
            .iter()
            .map(|(name, bytes)| PartReport {
                name: name.clone(),
                bytes: bytes.len(),
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_sync_core::{diff, AssetRef, Group, Identity, Leaf, Root, ServerId};

    #[test]
    fn test_report_lists_parts() {
        let baseline = Root::new(Identity::existing("P1"))
            .with_group(Group::new(Identity::existing("F1")));
        let working = Root::new(Identity::existing("P1")).with_group(
            Group::new(Identity::existing("F1")).with_leaf(
                Leaf::new(Identity::local("V2"))
                    .with_assets("icon", vec![AssetRef::pending(vec![0u8; 4])]),
            ),
        );

        let envelope = build_envelope(&ServerId::new("P1"), &diff(&baseline, &working)).unwrap();
        let report = report(&envelope).unwrap();
        assert_eq!(report.root_id, "P1");
        assert_eq!(report.parts.len(), 1);
        assert_eq!(report.parts[0].name, "V2:icon_0");
        assert_eq!(report.parts[0].bytes, 4);
        assert_eq!(
            report.changeset["values"]["F1"]["create_values"][0]["assets"]["icon"][0],
            "V2:icon_0"
        );
    }
}
