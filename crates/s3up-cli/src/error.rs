//! CLI error types

use s3up_client::{ConfigError, StoreError, UploadError};
use thiserror::Error;

/// Errors raised while parsing arguments or moving a single file
#[derive(Error, Debug)]
pub enum CliError {
    #[error("invalid target {0:?}: expected bucket[/prefix]")]
    InvalidTarget(String),

    #[error("invalid size {0:?}: expected a byte count such as 512k, 5MiB or 4GiB")]
    InvalidSize(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("shutdown requested")]
    Interrupted,
}

impl CliError {
    /// Whether the batch should stop after this error
    pub fn is_interrupt(&self) -> bool {
        matches!(
            self,
            Self::Interrupted | Self::Upload(UploadError::Cancelled { .. })
        )
    }
}
