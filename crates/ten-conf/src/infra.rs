use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths the runtime reads/writes outside of the graph itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Base directory addon discovery scans for `ten_packages/*` manifests.
    /// Default: ~/.local/share/ten/addons
    #[serde(default = "PathsConfig::default_addon_dir")]
    pub addon_dir: PathBuf,
}

impl PathsConfig {
    fn default_addon_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/ten/addons"))
            .unwrap_or_else(|| PathBuf::from(".local/share/ten/addons"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            addon_dir: Self::default_addon_dir(),
        }
    }
}

/// Network bind addresses for this app's inbound `msgpack://` transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindConfig {
    /// ZMQ ROUTER address this app listens on for other apps' remotes.
    /// Default: tcp://0.0.0.0:5570
    #[serde(default = "BindConfig::default_router")]
    pub router: String,
}

impl BindConfig {
    fn default_router() -> String {
        "tcp://0.0.0.0:5570".to_string()
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            router: Self::default_router(),
        }
    }
}

/// Timers and housekeeping cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimersConfig {
    /// How often the path table is swept for expired entries, in
    /// milliseconds. Default: 30000 (30s)
    #[serde(default = "TimersConfig::default_path_sweep_ms")]
    pub path_sweep_interval_ms: u64,

    /// Default cmd_result timeout applied to a path if the connection edge
    /// doesn't specify one, in milliseconds. `0` means no default timeout
    /// (paths never expire on their own).
    /// Default: 0
    #[serde(default)]
    pub default_path_timeout_ms: u64,
}

impl TimersConfig {
    fn default_path_sweep_ms() -> u64 {
        30_000
    }
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            path_sweep_interval_ms: Self::default_path_sweep_ms(),
            default_path_timeout_ms: 0,
        }
    }
}

/// Log level passed to the `tracing` subscriber installed by whatever binary
/// links this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// Infrastructure configuration — cannot change once the process is up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub bind: BindConfig,
    #[serde(default)]
    pub timers: TimersConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_defaults() {
        let bind = BindConfig::default();
        assert_eq!(bind.router, "tcp://0.0.0.0:5570");
    }

    #[test]
    fn timers_defaults() {
        let timers = TimersConfig::default();
        assert_eq!(timers.path_sweep_interval_ms, 30_000);
        assert_eq!(timers.default_path_timeout_ms, 0);
    }

    #[test]
    fn telemetry_defaults() {
        assert_eq!(TelemetryConfig::default().log_level, "info");
    }
}
