use anyhow::Result;
use clap::Parser;

use crate::viewer::{self, ViewerCliArgs, ViewerConfig};

/// Show a live camera feed annotated by a remote QR/barcode detection service.
#[derive(Debug, Parser)]
#[command(name = "qr-overlay", version)]
pub struct Cli {
    #[command(flatten)]
    pub viewer: ViewerCliArgs,
}

pub fn handle_commands() -> Result<()> {
    let cli = Cli::parse();
    let config = ViewerConfig::try_from(cli.viewer)?;
    viewer::run(config)
}
