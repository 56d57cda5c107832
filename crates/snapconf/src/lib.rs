//! Minimal configuration loading for snapguard.
//!
//! This crate is imported by every snapguard crate, so it keeps its
//! dependencies to serde, toml and directories.
//!
//! # Usage
//!
//! ```rust,no_run
//! use snapconf::GuardConfig;
//!
//! let config = GuardConfig::load().expect("Failed to load config");
//!
//! println!("store: {}", config.paths.store_dir.display());
//! println!("http: {}", config.bind.addr());
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/snapguard/config.toml` (system)
//! 2. `~/.config/snapguard/config.toml` (user)
//! 3. `--config FILE`, or `./snapguard.toml` when no file is given
//! 4. Environment variables (`SNAPGUARD_*`)
//!
//! Files are merged table by table, so a local file only needs the keys it
//! changes.
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! store_dir = "~/.snapguard/store"
//! socket_path = "/run/snapguard.sock"
//!
//! [bind]
//! http_port = 12345
//!
//! [cluster]
//! address_prefix = "10.22.1."
//! address_offset = 1
//!
//! [cluster.nodes]
//! 3 = "gpu3.lab:12345"
//!
//! [tool]
//! criu_path = "/usr/sbin/criu"
//! timeout_secs = 120
//!
//! [security]
//! token = "s3cret"
//! ```

pub mod cluster;
pub mod infra;
pub mod loader;
pub mod operations;

pub use cluster::{ClusterConfig, SecurityConfig};
pub use infra::{BindConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use operations::{ExecutorConfig, PublishConfig, StoreConfig, ToolConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Config file not found: {0}")]
    Missing(PathBuf),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Complete guard configuration.
///
/// Built once at startup and shared read-only by every component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub tool: ToolConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub publish: PublishConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

impl GuardConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, using `config_path` in place of `./snapguard.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::Missing(path.to_path_buf()));
            }
        }

        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, Path::new("<merged>"))?;
        loader::apply_env_overrides(&mut config, &mut sources)?;
        loader::expand_config_paths(&mut config);

        Ok((config, sources))
    }

    /// Parse a single TOML document on top of the compiled defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let path = Path::new("<string>");
        let table = loader::parse_table(contents, path)?;
        let mut config = loader::from_table(table, path)?;
        loader::expand_config_paths(&mut config);
        Ok(config)
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> String {
        let body = toml::to_string_pretty(self)
            .unwrap_or_else(|e| format!("# failed to serialize config: {}\n", e));
        format!("# snapguard configuration\n\n{}", body)
    }
}
