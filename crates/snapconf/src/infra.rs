//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths for guard state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the snapshot store (archives, sidecars, staging).
    /// Default: /tmp/checkpoint_store
    pub store_dir: PathBuf,

    /// Unix socket for the trusted local control channel.
    /// Default: /tmp/guard.sock
    pub socket_path: PathBuf,

    /// Where temporary dump/extract workspaces are created.
    /// Default: the system temp dir
    pub work_dir: PathBuf,
}

impl PathsConfig {
    fn default_store_dir() -> PathBuf {
        PathBuf::from("/tmp/checkpoint_store")
    }

    fn default_socket_path() -> PathBuf {
        PathBuf::from("/tmp/guard.sock")
    }

    fn default_work_dir() -> PathBuf {
        std::env::temp_dir()
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            store_dir: Self::default_store_dir(),
            socket_path: Self::default_socket_path(),
            work_dir: Self::default_work_dir(),
        }
    }
}

/// Network bind address for the peer-facing HTTP channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindConfig {
    /// Default: 0.0.0.0
    pub host: String,

    /// Default: 12345
    pub http_port: u16,
}

impl BindConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_http_port() -> u16 {
        12345
    }

    /// `host:port` string suitable for a TCP listener.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            http_port: Self::default_http_port(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint for OpenTelemetry. Empty disables export.
    /// Default: "" (stdout logging only)
    pub otlp_endpoint: String,

    /// Log level or full EnvFilter directive.
    /// Default: info
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    /// Whether OTLP export is configured.
    pub fn otlp_enabled(&self) -> bool {
        !self.otlp_endpoint.trim().is_empty()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: String::new(),
            log_level: Self::default_log_level(),
        }
    }
}
