//! CLI command implementations.

pub mod level;
pub mod simulate;

use thiserror::Error;

/// Errors raised by the CLI itself.
#[derive(Debug, Error)]
pub enum CliError {
    /// `--format` was neither `text` nor `json`.
    #[error("unknown output format {0:?}, expected text or json")]
    UnknownFormat(String),

    /// A numeric option is out of range.
    #[error("invalid option: {0}")]
    InvalidOption(String),
}
