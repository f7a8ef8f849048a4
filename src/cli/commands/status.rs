//! Status command
//!
//! Connects without the file-transfer channel and prints the row counts of
//! the staging and target tables.

use clap::Args;
use std::path::Path;

use crate::cli::commands::{ConnectionArgs, build_config, runtime};
use crate::cli::error::CliError;
use crate::pipeline::{Pipeline, StatusReport};
use crate::signal::shutdown_signal;

/// Status command arguments
#[derive(Debug, Clone, Default, Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

/// Print staging and target row counts
pub fn handle_status(config_path: Option<&Path>, args: &StatusArgs) -> Result<StatusReport, CliError> {
    let config = build_config(config_path, &args.connection)?;
    config.validate(false)?;

    let rt = runtime()?;
    let report = rt.block_on(Pipeline::new(&config).status(shutdown_signal()))?;

    println!("{}", report);
    Ok(report)
}
