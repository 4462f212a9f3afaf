/// TOML configuration (`lekha.toml`)
pub mod toml_config;

pub use toml_config::{ConfigError, LekhaConfig, LogFormat, LoggingConfig};
