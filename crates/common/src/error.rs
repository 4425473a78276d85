//! Configuration errors shared by the CLI crates

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("could not determine home directory; set KAMUI_CONFIG to choose a config file")]
    HomeDirNotFound,
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
