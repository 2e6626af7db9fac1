//! Process configuration for the extension-graph runtime: bind addresses,
//! addon discovery paths, timer cadence and log level, loaded through a
//! layered defaults -> system -> user -> local -> env precedence.

pub mod infra;
pub mod loader;

pub use infra::{BindConfig, InfraConfig, PathsConfig, TelemetryConfig, TimersConfig};
pub use loader::{ConfigError, ConfigSources, RuntimeConfig};
