//! Error types shared across the workspace.

use std::path::PathBuf;
use thiserror::Error;

/// Workspace-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Invalid config {path}: {message}")]
    Config { path: PathBuf, message: String },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
