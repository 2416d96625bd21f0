//! CLI error type and exit codes.

use splitfetch::{ConfigError, DownloadError};
use thiserror::Error;

/// Exit code for a failed download.
pub const EXIT_DOWNLOAD_FAILED: u8 = 1;

/// Exit code for unusable configuration.
pub const EXIT_CONFIG: u8 = 2;

/// Errors surfaced to the user by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Download(#[from] DownloadError),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::Config(err.to_string())
    }
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Config(_) | CliError::Download(DownloadError::InvalidConfig(_)) => EXIT_CONFIG,
            CliError::Download(_) => EXIT_DOWNLOAD_FAILED,
        }
    }

    /// Whether a download was attempted, i.e. a final failure line applies.
    pub fn is_download_failure(&self) -> bool {
        self.exit_code() == EXIT_DOWNLOAD_FAILED
    }
}
