//! Crate-level error type.
//!
//! Each component has its own error enum; this type collects them for
//! callers that drive a whole command (directory sync, report export).

use thiserror::Error;

use crate::config::ConfigError;
use crate::directory::DirectoryError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
