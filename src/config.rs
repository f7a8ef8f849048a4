//! Pipeline configuration
//!
//! Handles parsing of the optional TOML configuration file, environment
//! variable overrides and validation. The result is one immutable
//! [`PipelineConfig`] handed by reference to every component; nothing below
//! this module reads the environment.
//!
//! Precedence, lowest first: built-in defaults, configuration file,
//! environment variables, command-line flags (applied by the CLI).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::database::TableTarget;
use crate::script::StatementSplitter;
use crate::validation::input::{ValidationError, normalize_encoding, validate_remote_root};

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default PostgreSQL port on the remote host
pub const DEFAULT_DB_PORT: u16 = 5432;

/// Default keep-alive probe interval for SSH connections, in seconds
pub const DEFAULT_KEEPALIVE_SECS: u64 = 30;

/// Default encoding of the remote CSV files
pub const DEFAULT_ENCODING: &str = "UTF8";

/// Environment variable for the SSH host
pub const ENV_SSH_HOST: &str = "SSH_HOST";

/// Environment variable for the SSH user
pub const ENV_SSH_USER: &str = "SSH_USER";

/// Environment variable for the SSH port
pub const ENV_SSH_PORT: &str = "SSH_PORT";

/// Environment variable for the SSH password
pub const ENV_SSH_PASSWORD: &str = "SSH_PASSWORD";

/// Environment variable for the SSH private key path
pub const ENV_SSH_PRIVATE_KEY: &str = "SSH_PRIVATE_KEY";

/// Environment variable for the database user
pub const ENV_DB_USER: &str = "DB_USER";

/// Environment variable for the database password
pub const ENV_DB_PASSWORD: &str = "DB_PASSWORD";

/// Environment variable for the database name
pub const ENV_DB_NAME: &str = "DB_NAME";

/// Environment variable for the database port
pub const ENV_DB_PORT: &str = "DB_PORT";

/// Environment variable for the remote root directory
pub const ENV_REMOTE_ROOT: &str = "REMOTE_ROOT";

/// Environment variable for the users subdirectory
pub const ENV_USERS_SUBDIR: &str = "USERS_SUBDIR";

/// Environment variable for the purchases subdirectory
pub const ENV_PURCHASES_SUBDIR: &str = "PURCHASES_SUBDIR";

/// Environment variable for the CSV encoding
pub const ENV_CSV_ENCODING: &str = "CSV_ENCODING";

/// Error type for configuration handling
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read config {path}: {message}")]
    Read { path: PathBuf, message: String },

    /// Failed to parse the configuration file
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// An environment variable holds an unusable value
    #[error("Invalid value for {var}: {message}")]
    InvalidEnv { var: &'static str, message: String },

    /// A required setting is missing
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    /// SSH credential selection is ambiguous or absent
    #[error("Exactly one of SSH password or private key must be set")]
    Credential,

    /// A setting failed validation
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Credential used to authenticate an SSH connection
#[derive(Clone, PartialEq, Eq)]
pub enum SshCredential {
    /// Password authentication
    Password(String),
    /// Public key authentication with a private key file
    PrivateKey(PathBuf),
}

impl fmt::Debug for SshCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshCredential::Password(_) => write!(f, "Password(****)"),
            SshCredential::PrivateKey(path) => f.debug_tuple("PrivateKey").field(path).finish(),
        }
    }
}

/// SSH connection section
#[derive(Clone, Serialize, Deserialize)]
pub struct SshSection {
    /// SSH host
    #[serde(default)]
    pub host: String,

    /// SSH user
    #[serde(default)]
    pub user: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Password (mutually exclusive with `private_key`)
    #[serde(default)]
    pub password: Option<String>,

    /// Private key path (mutually exclusive with `password`)
    #[serde(default)]
    pub private_key: Option<PathBuf>,

    /// Keep-alive probe interval in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_keepalive_secs() -> u64 {
    DEFAULT_KEEPALIVE_SECS
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: String::new(),
            port: DEFAULT_SSH_PORT,
            password: None,
            private_key: None,
            keepalive_secs: DEFAULT_KEEPALIVE_SECS,
        }
    }
}

impl fmt::Debug for SshSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshSection")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("private_key", &self.private_key)
            .field("keepalive_secs", &self.keepalive_secs)
            .finish()
    }
}

impl SshSection {
    /// Resolve the single configured credential
    ///
    /// Private-key paths beginning with `~/` are expanded against the
    /// current user's home directory.
    pub fn credential(&self) -> ConfigResult<SshCredential> {
        let password = self.password.as_deref().filter(|p| !p.is_empty());
        let key = self
            .private_key
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty());

        match (password, key) {
            (Some(password), None) => Ok(SshCredential::Password(password.to_string())),
            (None, Some(key)) => Ok(SshCredential::PrivateKey(expand_home(key))),
            _ => Err(ConfigError::Credential),
        }
    }

    /// Replace the credential from a higher-precedence source
    ///
    /// Supplying only one kind of credential clears the other, so a password
    /// given on the command line wins over a key path from the file.
    /// Supplying both keeps both, and validation rejects the result.
    pub fn override_credential(&mut self, password: Option<String>, private_key: Option<PathBuf>) {
        match (password, private_key) {
            (None, None) => {}
            (Some(password), None) => {
                self.password = Some(password);
                self.private_key = None;
            }
            (None, Some(key)) => {
                self.password = None;
                self.private_key = Some(key);
            }
            (Some(password), Some(key)) => {
                self.password = Some(password);
                self.private_key = Some(key);
            }
        }
    }

    /// Target address as `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Database section
///
/// The host is not configurable: the database is always reached through the
/// local end of the SSH tunnel.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    /// Database name
    #[serde(default)]
    pub name: String,

    /// Database user
    #[serde(default)]
    pub user: String,

    /// Database password
    #[serde(default)]
    pub password: String,

    /// Port the database listens on, on the remote host
    #[serde(default = "default_db_port")]
    pub port: u16,
}

fn default_db_port() -> u16 {
    DEFAULT_DB_PORT
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            name: String::new(),
            user: String::new(),
            password: String::new(),
            port: DEFAULT_DB_PORT,
        }
    }
}

impl fmt::Debug for DatabaseSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSection")
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"****")
            .field("port", &self.port)
            .finish()
    }
}

/// Remote file layout section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSection {
    /// Absolute root directory on the remote host
    #[serde(default)]
    pub root: String,

    /// Users subdirectory, relative to `root`
    #[serde(default = "default_users_subdir")]
    pub users_subdir: String,

    /// Purchases subdirectory, relative to `root`
    #[serde(default = "default_purchases_subdir")]
    pub purchases_subdir: String,

    /// Encoding of the CSV files
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_users_subdir() -> String {
    "data/user_data".to_string()
}

fn default_purchases_subdir() -> String {
    "data/purchase_data".to_string()
}

fn default_encoding() -> String {
    DEFAULT_ENCODING.to_string()
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            root: String::new(),
            users_subdir: default_users_subdir(),
            purchases_subdir: default_purchases_subdir(),
            encoding: default_encoding(),
        }
    }
}

impl RemoteSection {
    /// Remote directory holding the users CSV files
    pub fn users_dir(&self) -> String {
        join_remote(&self.root, &self.users_subdir)
    }

    /// Remote directory holding the purchases CSV files
    pub fn purchases_dir(&self) -> String {
        join_remote(&self.root, &self.purchases_subdir)
    }
}

/// Staging and target table names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablesSection {
    /// Staging table for raw user records
    #[serde(default = "default_users_staging")]
    pub users_staging: TableTarget,

    /// Staging table for raw purchase records
    #[serde(default = "default_purchases_staging")]
    pub purchases_staging: TableTarget,

    /// Target table for transformed user records
    #[serde(default = "default_users_target")]
    pub users_target: TableTarget,

    /// Target table for transformed purchase records
    #[serde(default = "default_purchases_target")]
    pub purchases_target: TableTarget,
}

fn default_users_staging() -> TableTarget {
    TableTarget::builtin("raw", "users_raw")
}

fn default_purchases_staging() -> TableTarget {
    TableTarget::builtin("raw", "purchases_raw")
}

fn default_users_target() -> TableTarget {
    TableTarget::builtin("public", "users")
}

fn default_purchases_target() -> TableTarget {
    TableTarget::builtin("public", "purchases")
}

impl Default for TablesSection {
    fn default() -> Self {
        Self {
            users_staging: default_users_staging(),
            purchases_staging: default_purchases_staging(),
            users_target: default_users_target(),
            purchases_target: default_purchases_target(),
        }
    }
}

/// Optional pipeline steps
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineSection {
    /// Truncate target and staging tables before loading
    #[serde(default)]
    pub clear_tables: bool,

    /// Schema script applied before loading
    #[serde(default)]
    pub schema_script: Option<PathBuf>,

    /// Transform script applied after loading
    #[serde(default)]
    pub transform_script: Option<PathBuf>,

    /// How scripts are split into statements
    #[serde(default)]
    pub splitter: StatementSplitter,
}

/// Main configuration structure
///
/// Represents the TOML configuration file format and, once assembled, the
/// immutable settings of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    /// SSH connection
    #[serde(default)]
    pub ssh: SshSection,

    /// Database connection
    #[serde(default)]
    pub database: DatabaseSection,

    /// Remote file layout
    #[serde(default)]
    pub remote: RemoteSection,

    /// Table names
    #[serde(default)]
    pub tables: TablesSection,

    /// Optional steps
    #[serde(default)]
    pub pipeline: PipelineSection,
}

impl PipelineConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble defaults, the optional configuration file and the process
    /// environment
    pub fn load(config_path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        // Apply environment variable overrides
        config.apply_env_overrides()?;

        Ok(config)
    }

    /// Read and parse a configuration file
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Convert configuration to TOML string
    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply environment variable overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_env_overrides_from(|var| std::env::var(var).ok())
    }

    /// Apply environment variable overrides from an arbitrary lookup
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_SSH_HOST) {
            self.ssh.host = host;
        }
        if let Some(user) = lookup(ENV_SSH_USER) {
            self.ssh.user = user;
        }
        if let Some(port) = lookup(ENV_SSH_PORT) {
            self.ssh.port = parse_port(ENV_SSH_PORT, &port)?;
        }
        self.ssh.override_credential(
            lookup(ENV_SSH_PASSWORD),
            lookup(ENV_SSH_PRIVATE_KEY).map(PathBuf::from),
        );

        if let Some(user) = lookup(ENV_DB_USER) {
            self.database.user = user;
        }
        if let Some(password) = lookup(ENV_DB_PASSWORD) {
            self.database.password = password;
        }
        if let Some(name) = lookup(ENV_DB_NAME) {
            self.database.name = name;
        }
        if let Some(port) = lookup(ENV_DB_PORT) {
            self.database.port = parse_port(ENV_DB_PORT, &port)?;
        }

        if let Some(root) = lookup(ENV_REMOTE_ROOT) {
            self.remote.root = root;
        }
        if let Some(subdir) = lookup(ENV_USERS_SUBDIR) {
            self.remote.users_subdir = subdir;
        }
        if let Some(subdir) = lookup(ENV_PURCHASES_SUBDIR) {
            self.remote.purchases_subdir = subdir;
        }
        if let Some(encoding) = lookup(ENV_CSV_ENCODING) {
            self.remote.encoding = encoding;
        }

        Ok(())
    }

    /// Validate the assembled configuration
    ///
    /// `want_remote_files` is false for runs that never touch the remote
    /// file tree (row-count status checks).
    pub fn validate(&self, want_remote_files: bool) -> ConfigResult<()> {
        if self.ssh.host.trim().is_empty() {
            return Err(ConfigError::Missing("ssh host"));
        }
        if self.ssh.user.trim().is_empty() {
            return Err(ConfigError::Missing("ssh user"));
        }
        self.ssh.credential()?;

        if self.database.name.trim().is_empty() {
            return Err(ConfigError::Missing("database name"));
        }
        if self.database.user.trim().is_empty() {
            return Err(ConfigError::Missing("database user"));
        }

        if want_remote_files {
            validate_remote_root(&self.remote.root)?;
            normalize_encoding(&self.remote.encoding)?;
        }

        Ok(())
    }
}

fn parse_port(var: &'static str, value: &str) -> ConfigResult<u16> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|e| ConfigError::InvalidEnv {
            var,
            message: format!("'{}' is not a valid port: {}", value, e),
        })
}

/// Join a remote root and a relative subdirectory with `/`
pub fn join_remote(root: &str, subdir: &str) -> String {
    format!(
        "{}/{}",
        root.trim_end_matches('/'),
        subdir.trim_matches('/')
    )
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match directories::BaseDirs::new() {
            Some(dirs) => dirs.home_dir().join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Generate a sample configuration file content
pub fn sample_config() -> &'static str {
    r#"# tunnel-ingest configuration
# Values here are overridden by environment variables, which are
# overridden by command-line flags.

[ssh]
host = "10.10.0.8"
user = "loader"
port = 22
# Exactly one of password / private_key
# password = "secret"
private_key = "~/.ssh/id_ed25519"
keepalive_secs = 30

[database]
name = "ecommerce"
user = "appuser"
# password = "secret"
port = 5432

[remote]
root = "/home/loader/simple_pipeline"
users_subdir = "data/user_data"
purchases_subdir = "data/purchase_data"
encoding = "UTF8"

[tables]
# schema.table; names fold to lower case like unquoted SQL identifiers
users_staging = "raw.users_raw"
purchases_staging = "raw.purchases_raw"
users_target = "public.users"
purchases_target = "public.purchases"

[pipeline]
clear_tables = false
# schema_script = "sql/database_setup.sql"
# transform_script = "sql/transform_data.sql"
# tokenizer (default), naive or batch
splitter = "tokenizer"
"#
}
