// Configuration management module
// This module handles TOML configuration management and settings

pub mod settings;

pub use settings::{
    Config, ConfigError, EmbeddingBackend, EmbeddingConfig, MatchStrategy, RemoteConfig,
    RetrieverConfig,
};

/// Get the default configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_config_dir()
}
