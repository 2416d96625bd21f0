//! HTTP range fetching.
//!
//! This module provides the network side of a segmented download:
//! - File size discovery via a HEAD request
//! - Streaming a single byte range into its segment file
//! - Progress reporting over the shared channel, with backpressure

use std::time::Duration;

use reqwest::header::{HeaderMap, CONTENT_LENGTH, RANGE};
use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::progress::ProgressEvent;
use super::segment::SegmentDescriptor;
use crate::config::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_READ_BUFFER_SIZE};
use crate::error::{DownloadError, DownloadResult, FetchError};

/// Buffer size for writing segment files (1 MiB).
const WRITE_BUFFER_SIZE: usize = 1024 * 1024;

/// Downloads byte ranges of a URL into segment files.
///
/// Only a connect timeout is configured. Once a response is streaming, an
/// idle connection can stall the segment indefinitely.
#[derive(Debug, Clone)]
pub struct RangeFetcher {
    client: Client,
    pub(crate) connect_timeout: Duration,
    pub(crate) read_buffer_size: usize,
}

impl RangeFetcher {
    /// Create a fetcher with the default timeout and event size.
    pub fn new() -> DownloadResult<Self> {
        Self::with_settings(
            Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            DEFAULT_READ_BUFFER_SIZE,
        )
    }

    /// Create a fetcher with a custom connect timeout and per-event byte cap.
    pub fn with_settings(connect_timeout: Duration, read_buffer_size: usize) -> DownloadResult<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| DownloadError::Client(e.to_string()))?;

        Ok(Self {
            client,
            connect_timeout,
            read_buffer_size: read_buffer_size.max(1),
        })
    }

    /// Query the file size via a HEAD request.
    pub async fn content_length(&self, url: &str) -> DownloadResult<u64> {
        let response = self.client.head(url).send().await.map_err(|e| {
            DownloadError::HeadRequestFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        if !response.status().is_success() {
            return Err(DownloadError::HeadRequestFailed {
                url: url.to_string(),
                reason: format!("HEAD request failed with status {}", response.status()),
            });
        }

        parse_content_length(response.headers()).ok_or_else(|| {
            DownloadError::MissingContentLength {
                url: url.to_string(),
            }
        })
    }

    /// Fetch one segment into its file.
    ///
    /// Exactly one [`ProgressEvent::SegmentFinished`] is sent when this
    /// returns, whether the fetch succeeded, failed, or was cancelled.
    /// Returns the number of bytes written.
    pub async fn fetch(
        &self,
        url: &str,
        segment: &SegmentDescriptor,
        progress: &mpsc::Sender<ProgressEvent>,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled { part: segment.id }),
            result = self.fetch_range(url, segment, progress) => result,
        };

        // A closed channel only means nobody is watching progress any more.
        let _ = progress.send(ProgressEvent::SegmentFinished).await;
        result
    }

    async fn fetch_range(
        &self,
        url: &str,
        segment: &SegmentDescriptor,
        progress: &mpsc::Sender<ProgressEvent>,
    ) -> Result<u64, FetchError> {
        let part = segment.id;
        let range = segment.range;
        debug!(part, range = %range, "requesting part");

        let mut response = self
            .client
            .get(url)
            .header(RANGE, range.header_value())
            .send()
            .await
            .map_err(|e| FetchError::Request {
                part,
                reason: e.to_string(),
            })?;

        // A 200 means the server ignored the Range header. That body is only
        // usable when this single range already is the whole file.
        let status = response.status();
        let whole_file = range.start == 0 && response.content_length() == Some(range.len());
        if status != StatusCode::PARTIAL_CONTENT && !(status == StatusCode::OK && whole_file) {
            return Err(FetchError::UnexpectedStatus {
                part,
                status: status.as_u16(),
            });
        }

        let write_err = |source: std::io::Error| FetchError::Write {
            part,
            path: segment.file_path.clone(),
            source,
        };

        let file = File::create(&segment.file_path).await.map_err(write_err)?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
        let mut reporter = ProgressReporter::new(progress, self.read_buffer_size as u64);
        let mut written: u64 = 0;

        while let Some(chunk) = response.chunk().await.map_err(|e| FetchError::Request {
            part,
            reason: format!("read error: {}", e),
        })? {
            writer.write_all(&chunk).await.map_err(write_err)?;
            written += chunk.len() as u64;
            reporter.record(chunk.len() as u64).await;
        }

        writer.flush().await.map_err(write_err)?;
        reporter.flush().await;

        if written != range.len() {
            return Err(FetchError::LengthMismatch {
                part,
                expected: range.len(),
                actual: written,
            });
        }

        debug!(part, bytes = written, "part complete");
        Ok(written)
    }
}

/// Coalesces received byte counts into progress events.
///
/// Counts are forwarded immediately while the channel has room. When it is
/// full, bytes accumulate locally until `cap` is reached, at which point the
/// fetcher waits for the aggregator. No event ever exceeds `cap` and no byte
/// is dropped.
struct ProgressReporter<'a> {
    sender: &'a mpsc::Sender<ProgressEvent>,
    cap: u64,
    pending: u64,
}

impl<'a> ProgressReporter<'a> {
    fn new(sender: &'a mpsc::Sender<ProgressEvent>, cap: u64) -> Self {
        Self {
            sender,
            cap: cap.max(1),
            pending: 0,
        }
    }

    async fn record(&mut self, bytes: u64) {
        self.pending += bytes;
        if self.pending >= self.cap {
            self.flush().await;
        } else if let Ok(permit) = self.sender.try_reserve() {
            permit.send(ProgressEvent::Received(self.pending));
            self.pending = 0;
        }
    }

    async fn flush(&mut self) {
        while self.pending > 0 {
            let amount = self.pending.min(self.cap);
            self.pending -= amount;
            if self.sender.send(ProgressEvent::Received(amount)).await.is_err() {
                self.pending = 0;
            }
        }
    }
}

/// Read a Content-Length header.
///
/// The header is parsed directly because a HEAD response has no body for
/// the client to size.
pub fn parse_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}
