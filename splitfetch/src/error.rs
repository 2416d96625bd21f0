//! Error types for segmented downloads.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Errors that end a download run.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The HEAD request could not be sent or returned a non-success status.
    #[error("HEAD request to {url} failed: {reason}")]
    HeadRequestFailed { url: String, reason: String },

    /// The HEAD response carried no usable Content-Length header.
    #[error("url file has no Content-Length header: {url}")]
    MissingContentLength { url: String },

    /// Planned ranges do not add up to the file size.
    ///
    /// This is a logic defect in the planner, never a transient condition.
    #[error("planned ranges cover {actual} bytes but file size is {expected}")]
    PlanningInvariantViolation { expected: u64, actual: u64 },

    /// One or more segments failed to download.
    #[error("{} of {total} parts failed: {failed:?}", .failed.len())]
    SegmentsFailed { failed: Vec<u32>, total: u32 },

    /// Concatenating segments into the output file failed.
    #[error("failed to merge parts into {}: {source}", .path.display())]
    MergeFailed { path: PathBuf, source: io::Error },

    /// The scratch directory for segment files could not be created.
    #[error("failed to create segment directory: {0}")]
    TempDir(#[source] io::Error),

    /// The HTTP client could not be built.
    #[error("failed to create HTTP client: {0}")]
    Client(String),

    /// Invalid configuration values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors that abort a single segment fetch.
///
/// A fetch error never escapes its own task; the orchestrator collects them
/// and turns the whole batch into [`DownloadError::SegmentsFailed`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, timeout or body-streaming failure.
    #[error("request for part {part} failed: {reason}")]
    Request { part: u32, reason: String },

    /// The server answered with something other than partial content.
    #[error("part {part}: unexpected status {status}")]
    UnexpectedStatus { part: u32, status: u16 },

    /// The body did not match the requested range length.
    #[error("part {part}: expected {expected} bytes, received {actual}")]
    LengthMismatch { part: u32, expected: u64, actual: u64 },

    /// Writing the segment file failed.
    #[error("part {part}: failed to write {}: {source}", .path.display())]
    Write {
        part: u32,
        path: PathBuf,
        source: io::Error,
    },

    /// The fetch was cancelled because a sibling segment failed.
    #[error("part {part} cancelled")]
    Cancelled { part: u32 },
}

impl FetchError {
    /// Id of the segment this error belongs to.
    pub fn part(&self) -> u32 {
        match self {
            Self::Request { part, .. }
            | Self::UnexpectedStatus { part, .. }
            | Self::LengthMismatch { part, .. }
            | Self::Write { part, .. }
            | Self::Cancelled { part } => *part,
        }
    }
}
