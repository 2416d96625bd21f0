//! Splitfetch - segmented HTTP downloads
//!
//! This library downloads a single large file by splitting it into byte-range
//! segments, fetching the segments concurrently, and reassembling them into
//! the final file.

pub mod config;
pub mod download;
pub mod error;
pub mod size;

pub use config::{ConfigError, ConfigFile, DownloadConfig};
pub use download::{DownloadOutcome, SegmentedDownloader};
pub use error::{DownloadError, DownloadResult, FetchError};
