//! Segmented download orchestrator.
//!
//! Drives one download through its phases:
//!
//! ```text
//! Planning ──► Fetching ──┬──► Merging ────► Done
//!                         └──► CleaningUp ─► Failed
//! ```
//!
//! During `Fetching` one task per planned range and one progress aggregator
//! task run concurrently. The orchestrator waits for every fetcher before
//! deciding between merge and cleanup, unless eager cancellation is enabled,
//! in which case the first failure cancels the remaining fetchers (they are
//! still joined before cleanup starts).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::http::RangeFetcher;
use super::merge::{merge, remove_segments};
use super::plan::plan;
use super::progress::{ConsoleProgress, ProgressAggregator, ProgressEvent, ProgressSink};
use super::segment::{file_name_from_url, SegmentDescriptor};
use crate::config::DownloadConfig;
use crate::error::{DownloadError, DownloadResult, FetchError};
use crate::size::format_size;

/// Phase of a download run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPhase {
    Planning,
    Fetching,
    Merging,
    CleaningUp,
    Done,
    Failed,
}

impl fmt::Display for DownloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Planning => "planning",
            Self::Fetching => "fetching",
            Self::Merging => "merging",
            Self::CleaningUp => "cleaning up",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Summary of a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    /// Where the file was written.
    pub output_path: PathBuf,
    /// Size reported by the server and written to disk.
    pub total_size: u64,
    /// Number of segments fetched.
    pub parts: usize,
    /// Bytes reported through the progress channel.
    pub bytes_reported: u64,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

/// Downloads one URL in concurrent byte-range segments.
#[derive(Debug, Clone)]
pub struct SegmentedDownloader {
    config: DownloadConfig,
    fetcher: RangeFetcher,
}

impl SegmentedDownloader {
    /// Create a downloader, validating the configuration.
    pub fn new(config: DownloadConfig) -> DownloadResult<Self> {
        config
            .validate()
            .map_err(|e| DownloadError::InvalidConfig(e.to_string()))?;
        let fetcher = RangeFetcher::with_settings(config.connect_timeout, config.read_buffer_size)?;
        Ok(Self { config, fetcher })
    }

    /// Get the active configuration.
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Download `url`, printing status and progress to stdout.
    ///
    /// `output` defaults to the last path segment of the URL in the working
    /// directory.
    pub async fn download(
        &self,
        url: &str,
        output: Option<&Path>,
    ) -> DownloadResult<DownloadOutcome> {
        self.download_with_sink(url, output, ConsoleProgress::new())
            .await
    }

    /// Download `url`, sending status and progress lines to `sink`.
    pub async fn download_with_sink<S: ProgressSink>(
        &self,
        url: &str,
        output: Option<&Path>,
        mut sink: S,
    ) -> DownloadResult<DownloadOutcome> {
        let started = Instant::now();
        let file_name = file_name_from_url(url);
        let output_path = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(&file_name));

        enter(DownloadPhase::Planning);
        let total_size = self.fetcher.content_length(url).await?;
        sink.status(&format!(
            "File size : {} ({})",
            total_size,
            format_size(total_size)
        ));

        let plan = plan(
            total_size,
            Some(self.config.min_chunk_size),
            Some(self.config.max_chunk_size),
        )?;

        if plan.ranges.is_empty() {
            tokio::fs::File::create(&output_path)
                .await
                .map_err(|source| DownloadError::MergeFailed {
                    path: output_path.clone(),
                    source,
                })?;
            enter(DownloadPhase::Done);
            return Ok(DownloadOutcome {
                output_path,
                total_size,
                parts: 0,
                bytes_reported: 0,
                elapsed: started.elapsed(),
            });
        }

        sink.status(&format!(
            "file total parts {} each part is almost {}",
            plan.parts(),
            format_size(plan.nominal_chunk_size)
        ));

        // Dropped on every return path below, removing the directory.
        let segment_dir = self.segment_dir()?;
        let segments = SegmentDescriptor::for_plan(&plan, segment_dir.path(), &file_name);
        let total_parts = segments.len() as u32;

        enter(DownloadPhase::Fetching);
        sink.status("download started");

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let aggregator = tokio::spawn(
            ProgressAggregator::new(
                rx,
                total_size,
                total_parts,
                self.config.progress_interval,
                sink,
            )
            .run(),
        );

        let failed = self.fetch_all(url, &segments, tx).await;

        let (state, mut sink) = match aggregator.await {
            Ok(report) => report,
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        };
        info!(
            bytes = state.bytes_downloaded,
            parts = state.segments_finished,
            "all parts finished"
        );

        if !failed.is_empty() {
            enter(DownloadPhase::CleaningUp);
            sink.status("deleting partial parts");
            remove_segments(segments.iter().map(|s| s.file_path.as_path())).await;
            enter(DownloadPhase::Failed);
            return Err(DownloadError::SegmentsFailed {
                failed,
                total: total_parts,
            });
        }

        enter(DownloadPhase::Merging);
        sink.status("merging parts");
        let ids: Vec<u32> = segments.iter().map(|s| s.id).collect();
        if let Err(e) = merge(&output_path, segment_dir.path(), &file_name, &ids).await {
            enter(DownloadPhase::CleaningUp);
            remove_segments(segments.iter().map(|s| s.file_path.as_path())).await;
            enter(DownloadPhase::Failed);
            return Err(e);
        }

        enter(DownloadPhase::Done);
        Ok(DownloadOutcome {
            output_path,
            total_size,
            parts: segments.len(),
            bytes_reported: state.bytes_downloaded,
            elapsed: started.elapsed(),
        })
    }

    /// Run one fetch task per segment and wait for all of them.
    ///
    /// Returns the ids of segments that failed, excluding ones that were only
    /// cancelled because of a sibling failure.
    async fn fetch_all(
        &self,
        url: &str,
        segments: &[SegmentDescriptor],
        progress: mpsc::Sender<ProgressEvent>,
    ) -> Vec<u32> {
        let url: Arc<str> = Arc::from(url);
        let cancel = CancellationToken::new();
        let eager_cancel = self.config.eager_cancel;

        let handles: Vec<_> = segments
            .iter()
            .cloned()
            .map(|segment| {
                let fetcher = self.fetcher.clone();
                let progress = progress.clone();
                let cancel = cancel.clone();
                let url = Arc::clone(&url);

                tokio::spawn(async move {
                    let result = fetcher.fetch(&url, &segment, &progress, &cancel).await;
                    if let Err(ref e) = result {
                        if !matches!(e, FetchError::Cancelled { .. }) {
                            warn!(part = segment.id, error = %e, "part failed");
                            if eager_cancel {
                                cancel.cancel();
                            }
                        }
                    }
                    result
                })
            })
            .collect();

        // Only the fetch tasks hold senders from here on.
        drop(progress);

        let mut failed = Vec::new();
        for (segment, joined) in segments.iter().zip(join_all(handles).await) {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(FetchError::Cancelled { .. })) => {
                    info!(part = segment.id, "part cancelled");
                }
                Ok(Err(_)) => failed.push(segment.id),
                Err(e) => {
                    warn!(part = segment.id, error = %e, "fetch task aborted");
                    failed.push(segment.id);
                }
            }
        }
        failed
    }

    /// Create the scratch directory for segment files.
    fn segment_dir(&self) -> DownloadResult<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("splitfetch-");
        match self.config.temp_dir {
            Some(ref parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(DownloadError::TempDir)
    }
}

fn enter(phase: DownloadPhase) {
    info!(phase = %phase, "download phase");
}
