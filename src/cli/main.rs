//! CLI binary entry point for tunnel-ingest

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tunnel_ingest::cli::commands::load::{LoadArgs, handle_load};
use tunnel_ingest::cli::commands::status::{StatusArgs, handle_status};
use tunnel_ingest::cli::error::{CliError, EXIT_SUCCESS};
use tunnel_ingest::logging::{LogLevel, init_logging};
use tunnel_ingest::sample_config;

#[derive(Parser)]
#[command(name = "tunnel-ingest")]
#[command(about = "Stream remote CSV files into PostgreSQL over an SSH tunnel")]
#[command(version)]
struct Cli {
    /// TOML configuration file (overridden by environment and flags)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Log warnings and errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the users and purchases CSV files and apply optional scripts
    Load(LoadArgs),
    /// Print staging and target table row counts
    Status(StatusArgs),
    /// Print an example configuration file
    SampleConfig,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(LogLevel::from_flags(cli.verbose, cli.quiet)) {
        let e = CliError::from(e);
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Load(args) => handle_load(config_path, &args).map(|_| ()),
        Commands::Status(args) => handle_status(config_path, &args).map(|_| ()),
        Commands::SampleConfig => {
            print!("{}", sample_config());
            Ok(())
        }
    };

    match result {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}
