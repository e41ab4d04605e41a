// In crates/app-config/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to render settings as TOML: {0}")]
    TomlError(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
