//! Load command
//!
//! Runs the full ingestion pipeline and prints the run summary.

use clap::Args;
use std::path::{Path, PathBuf};

use crate::cli::commands::{ConnectionArgs, runtime};
use crate::cli::error::CliError;
use crate::config::PipelineConfig;
use crate::pipeline::{Pipeline, RunSummary};
use crate::script::StatementSplitter;
use crate::signal::shutdown_signal;

/// Load command arguments
#[derive(Debug, Clone, Default, Args)]
pub struct LoadArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Absolute root directory of the data on the SSH host [env: REMOTE_ROOT]
    #[arg(long)]
    pub remote_root: Option<String>,
    /// Users subdirectory relative to the root [env: USERS_SUBDIR]
    #[arg(long)]
    pub users_subdir: Option<String>,
    /// Purchases subdirectory relative to the root [env: PURCHASES_SUBDIR]
    #[arg(long)]
    pub purchases_subdir: Option<String>,
    /// Encoding of the CSV files [env: CSV_ENCODING, default: UTF8]
    #[arg(long)]
    pub encoding: Option<String>,

    /// Truncate target and staging tables before loading
    #[arg(long)]
    pub clear_tables: bool,
    /// SQL script applied before loading
    #[arg(long)]
    pub schema_script: Option<PathBuf>,
    /// SQL script applied after loading
    #[arg(long)]
    pub transform_script: Option<PathBuf>,
    /// How scripts are split into statements
    #[arg(long, value_enum)]
    pub splitter: Option<StatementSplitter>,
}

impl LoadArgs {
    /// Apply the flags that were given on top of `config`
    pub fn apply(&self, config: &mut PipelineConfig) {
        self.connection.apply(config);

        if let Some(root) = &self.remote_root {
            config.remote.root = root.clone();
        }
        if let Some(subdir) = &self.users_subdir {
            config.remote.users_subdir = subdir.clone();
        }
        if let Some(subdir) = &self.purchases_subdir {
            config.remote.purchases_subdir = subdir.clone();
        }
        if let Some(encoding) = &self.encoding {
            config.remote.encoding = encoding.clone();
        }

        if self.clear_tables {
            config.pipeline.clear_tables = true;
        }
        if let Some(path) = &self.schema_script {
            config.pipeline.schema_script = Some(path.clone());
        }
        if let Some(path) = &self.transform_script {
            config.pipeline.transform_script = Some(path.clone());
        }
        if let Some(splitter) = self.splitter {
            config.pipeline.splitter = splitter;
        }
    }
}

/// Run the ingestion pipeline
pub fn handle_load(config_path: Option<&Path>, args: &LoadArgs) -> Result<RunSummary, CliError> {
    let mut config = PipelineConfig::load(config_path)?;
    args.apply(&mut config);
    config.validate(true)?;

    let rt = runtime()?;
    let summary = rt.block_on(Pipeline::new(&config).run(shutdown_signal()))?;

    println!("{}", summary);
    Ok(summary)
}
