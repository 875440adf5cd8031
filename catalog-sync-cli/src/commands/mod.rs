mod config_cmd;
mod diff_cmd;
mod envelope_cmd;
mod push;
mod status;

pub use config_cmd::ConfigCommand;
pub use diff_cmd::DiffCommand;
pub use envelope_cmd::EnvelopeCommand;
pub use push::PushCommand;
pub use status::StatusCommand;

use catalog_sync_core::ChangeDetection;
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Command-line spelling of [`ChangeDetection`].
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DetectionArg {
    Structural,
    DirtyFlag,
}

impl From<DetectionArg> for ChangeDetection {
    fn from(arg: DetectionArg) -> Self {
        match arg {
            DetectionArg::Structural => ChangeDetection::Structural,
            DetectionArg::DirtyFlag => ChangeDetection::DirtyFlag,
        }
    }
}
