//! Error types for the CLI

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Kindling(#[from] kindling_common::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
