//! Config file discovery, table merging, and environment variable overlay.

use crate::{ConfigError, GuardConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/snapguard/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("snapguard/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    // CLI override takes precedence over local
    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("snapguard.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file into a raw table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

pub(crate) fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Deserialize a merged table; missing keys take their compiled defaults.
pub(crate) fn from_table(table: toml::Table, path: &Path) -> Result<GuardConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`. Nested tables merge key by key; any other
/// value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply `SNAPGUARD_*` (and a few standard) environment variables.
pub fn apply_env_overrides(
    config: &mut GuardConfig,
    sources: &mut ConfigSources,
) -> Result<(), ConfigError> {
    apply_overrides_from(config, sources, env::vars())
}

/// Apply overrides from an explicit set of variables.
pub fn apply_overrides_from<I>(
    config: &mut GuardConfig,
    sources: &mut ConfigSources,
    vars: I,
) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        let applied = match key.as_str() {
            "SNAPGUARD_STORE_DIR" => {
                config.paths.store_dir = expand_path(&value);
                true
            }
            "SNAPGUARD_SOCKET" => {
                config.paths.socket_path = expand_path(&value);
                true
            }
            "SNAPGUARD_WORK_DIR" => {
                config.paths.work_dir = expand_path(&value);
                true
            }
            "SNAPGUARD_BIND_HOST" => {
                config.bind.host = value;
                true
            }
            "SNAPGUARD_HTTP_PORT" => {
                config.bind.http_port = parse_value(&key, &value)?;
                true
            }
            "SNAPGUARD_CRIU" => {
                config.tool.criu_path = expand_path(&value);
                true
            }
            "SNAPGUARD_TOOL_TIMEOUT_SECS" => {
                config.tool.timeout_secs = parse_value(&key, &value)?;
                true
            }
            "SNAPGUARD_TOKEN" => {
                config.security.token = Some(value);
                true
            }
            // Also support the standard OTEL and RUST_LOG variables
            "SNAPGUARD_OTLP_ENDPOINT" | "OTEL_EXPORTER_OTLP_ENDPOINT" => {
                config.telemetry.otlp_endpoint = value;
                true
            }
            "SNAPGUARD_LOG_LEVEL" | "RUST_LOG" => {
                config.telemetry.log_level = value;
                true
            }
            _ => false,
        };

        if applied {
            sources.env_overrides.push(key);
        }
    }

    Ok(())
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Expand `~` and `$VAR` prefixes in the local filesystem paths.
pub(crate) fn expand_config_paths(config: &mut GuardConfig) {
    config.paths.store_dir = expand_path(&config.paths.store_dir.to_string_lossy());
    config.paths.socket_path = expand_path(&config.paths.socket_path.to_string_lossy());
    config.paths.work_dir = expand_path(&config.paths.work_dir.to_string_lossy());
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // Handle $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}
