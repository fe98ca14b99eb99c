//! Module for application configuration settings.
//!
//! Settings come from an optional TOML file and from command-line flags; flags win. The merged
//! [`Config`] is checked by [`Config::validate`], which yields the [`MountConfig`] the daemon runs
//! with.

use secrecy::{ExposeSecret as _, SecretString};
use sqlx::postgres::PgConnectOptions;
use thiserror::Error;
use tracing::debug;

use std::path::{Path, PathBuf};

use serde::Deserialize;

use dbfs::source::LoadPolicy;

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_LIST_FILE: &str = "./dbfs.config";

fn current_uid() -> u32 {
    nix::unistd::Uid::current().as_raw()
}

fn current_gid() -> u32 {
    nix::unistd::Gid::current().as_raw()
}

/// Database connection settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DatabaseConfig {
    /// Database name.
    pub name: Option<String>,
    /// Role to connect as.
    pub user: Option<String>,
    /// Server address.
    pub host: Option<String>,
    /// Server port.
    pub port: Option<u16>,
    /// Password, if the server asks for one.
    pub password: Option<SecretString>,
}

/// Which tables to serve.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TablesConfig {
    /// Serve every table owned by this role.
    pub owner: Option<String>,
    /// Serve the tables named in this file, one per line.
    pub list_file: Option<PathBuf>,
}

/// Application configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub tables: TablesConfig,

    /// The mount point for the filesystem.
    pub mount_point: Option<PathBuf>,

    /// Mount even if the mount point is not empty.
    #[serde(default)]
    pub allow_nonempty: bool,

    /// Log at debug level and dump every loaded table.
    #[serde(default)]
    pub debug: bool,

    /// The user owning the files. If not specified, the current user.
    #[serde(default = "current_uid")]
    pub uid: u32,

    /// The group owning the files. If not specified, the current group.
    #[serde(default = "current_gid")]
    pub gid: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            tables: TablesConfig::default(),
            mount_point: None,
            allow_nonempty: false,
            debug: false,
            uid: current_uid(),
            gid: current_gid(),
        }
    }
}

/// Command-line settings. Anything given here replaces the config file's value.
#[derive(Debug, Default, clap::Args)]
pub struct CliOverrides {
    /// Mount point.
    #[arg(short = 'm', long)]
    pub mount_point: Option<PathBuf>,

    /// Database name.
    #[arg(short = 'd', long)]
    pub database: Option<String>,

    /// Database user.
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Database server address.
    #[arg(short = 'a', long, visible_alias = "address")]
    pub host: Option<String>,

    /// Database server port.
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Database password.
    #[arg(short = 'P', long, env = "DBFS_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Serve every table owned by this role. Takes precedence over --list-file.
    #[arg(short = 'o', long)]
    pub owner: Option<String>,

    /// File listing the tables to serve, one per line.
    #[arg(short = 'f', long)]
    pub list_file: Option<PathBuf>,

    /// Debug logging, including a dump of every loaded table.
    #[arg(short = 'D', long)]
    pub debug: bool,

    /// Mount even if the mount point is not empty.
    #[arg(long)]
    pub allow_nonempty: bool,
}

/// Validated settings the daemon runs with.
#[derive(Debug, Clone)]
pub struct MountConfig {
    pub mount_point: PathBuf,
    pub allow_nonempty: bool,
    pub debug: bool,
    pub uid: u32,
    pub gid: u32,
    pub database: PgConnectOptions,
    pub policy: LoadPolicy,
    /// Problems worth telling the user about that do not stop the mount.
    pub warnings: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Config {
    /// Applies command-line overrides on top of this configuration.
    #[must_use]
    pub fn merge_cli(mut self, cli: CliOverrides) -> Self {
        fn set<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        set(&mut self.mount_point, cli.mount_point);
        set(&mut self.database.name, cli.database);
        set(&mut self.database.user, cli.user);
        set(&mut self.database.host, cli.host);
        set(&mut self.database.port, cli.port);
        set(&mut self.database.password, cli.password.map(SecretString::from));
        set(&mut self.tables.owner, cli.owner);
        set(&mut self.tables.list_file, cli.list_file);
        self.debug |= cli.debug;
        self.allow_nonempty |= cli.allow_nonempty;
        self
    }

    /// Validate the correctness of the configuration.
    ///
    /// Returns:
    /// - `Ok(MountConfig)` if the configuration is valid.
    /// - `Err(Vec<String>)` containing every validation error message otherwise.
    pub fn validate(self) -> Result<MountConfig, Vec<String>> {
        fn required<'a>(
            errors: &mut Vec<String>,
            value: Option<&'a str>,
            what: &str,
        ) -> Option<&'a str> {
            match value {
                Some(v) if !v.is_empty() => Some(v),
                _ => {
                    errors.push(format!("{what} is required."));
                    None
                }
            }
        }

        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let mount_point = self
            .mount_point
            .clone()
            .filter(|p| !p.as_os_str().is_empty());
        if mount_point.is_none() {
            errors.push("Mount point (-m) is required.".to_owned());
        }
        let name = required(&mut errors, self.database.name.as_deref(), "Database name (-d)");
        let user = required(&mut errors, self.database.user.as_deref(), "Database user (-u)");
        let host = required(&mut errors, self.database.host.as_deref(), "Database address (-a)");

        let policy = match (&self.tables.owner, &self.tables.list_file) {
            (Some(owner), list_file) if !owner.is_empty() => {
                if list_file.is_some() {
                    warnings.push(
                        "Both a table owner and a table list file were given; the list file is \
                         ignored."
                            .to_owned(),
                    );
                }
                LoadPolicy::ByOwner(owner.clone())
            }
            (_, Some(list_file)) => LoadPolicy::ByList(list_file.clone()),
            (_, None) => LoadPolicy::ByList(PathBuf::from(DEFAULT_LIST_FILE)),
        };

        let (Some(mount_point), Some(name), Some(user), Some(host)) =
            (mount_point, name, user, host)
        else {
            return Err(errors);
        };

        let mut database = PgConnectOptions::new()
            .host(host)
            .port(self.database.port.unwrap_or(DEFAULT_PORT))
            .username(user)
            .database(name);
        if let Some(password) = &self.database.password {
            database = database.password(password.expose_secret());
        }

        Ok(MountConfig {
            mount_point,
            allow_nonempty: self.allow_nonempty,
            debug: self.debug,
            uid: self.uid,
            gid: self.gid,
            database,
            policy,
            warnings,
        })
    }

    /// Returns config file paths in descending priority order.
    /// On macOS, skips `dirs::config_dir()` (resolves to ~/Library/Application Support/).
    fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        #[cfg(not(target_os = "macos"))]
        if let Some(xdg) = dirs::config_dir() {
            paths.push(xdg.join("dbfs").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("dbfs").join("config.toml"));
        }

        paths.push(PathBuf::from("/etc/dbfs/config.toml"));

        paths
    }

    /// Finds the first existing config file from search paths.
    fn find_config_file() -> Option<PathBuf> {
        Self::config_search_paths().into_iter().find(|p| p.exists())
    }

    /// Loads config from a single TOML file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = ?path, "Loading configuration file.");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads configuration from the external path if given, else from the first config file
    /// found, else the defaults. Errors if a config file exists but is malformed.
    pub fn load(external_config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = external_config_path {
            return Self::load_from_file(path);
        }

        Self::find_config_file().map_or_else(|| Ok(Self::default()), |p| Self::load_from_file(&p))
    }
}
