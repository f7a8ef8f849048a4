//! CLI command implementations

use clap::Args;
use std::path::{Path, PathBuf};

use crate::cli::error::CliError;
use crate::config::PipelineConfig;

pub mod load;
pub mod status;

/// Connection and layout flags shared by every command
///
/// Each flag overrides the corresponding environment variable, which in turn
/// overrides the configuration file.
#[derive(Debug, Clone, Default, Args)]
pub struct ConnectionArgs {
    /// SSH host [env: SSH_HOST]
    #[arg(long)]
    pub ssh_host: Option<String>,
    /// SSH user [env: SSH_USER]
    #[arg(long)]
    pub ssh_user: Option<String>,
    /// SSH port [env: SSH_PORT, default: 22]
    #[arg(long)]
    pub ssh_port: Option<u16>,
    /// SSH password [env: SSH_PASSWORD]
    #[arg(long, conflicts_with = "ssh_key")]
    pub ssh_password: Option<String>,
    /// SSH private key path [env: SSH_PRIVATE_KEY]
    #[arg(long)]
    pub ssh_key: Option<PathBuf>,
    /// Database name [env: DB_NAME]
    #[arg(long)]
    pub db_name: Option<String>,
    /// Database user [env: DB_USER]
    #[arg(long)]
    pub db_user: Option<String>,
    /// Database password [env: DB_PASSWORD]
    #[arg(long)]
    pub db_password: Option<String>,
    /// Database port on the SSH host [env: DB_PORT, default: 5432]
    #[arg(long)]
    pub db_port: Option<u16>,
}

impl ConnectionArgs {
    /// Apply the flags that were given on top of `config`
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(host) = &self.ssh_host {
            config.ssh.host = host.clone();
        }
        if let Some(user) = &self.ssh_user {
            config.ssh.user = user.clone();
        }
        if let Some(port) = self.ssh_port {
            config.ssh.port = port;
        }
        config
            .ssh
            .override_credential(self.ssh_password.clone(), self.ssh_key.clone());

        if let Some(name) = &self.db_name {
            config.database.name = name.clone();
        }
        if let Some(user) = &self.db_user {
            config.database.user = user.clone();
        }
        if let Some(password) = &self.db_password {
            config.database.password = password.clone();
        }
        if let Some(port) = self.db_port {
            config.database.port = port;
        }
    }
}

/// Assemble the configuration: file, then environment, then flags
pub fn build_config(
    config_path: Option<&Path>,
    connection: &ConnectionArgs,
) -> Result<PipelineConfig, CliError> {
    let mut config = PipelineConfig::load(config_path)?;
    connection.apply(&mut config);
    Ok(config)
}

/// Current-thread runtime for one command
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Runtime(e.to_string()))
}
