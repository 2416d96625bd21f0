//! Progress aggregation for segmented downloads.
//!
//! Range fetchers push [`ProgressEvent`]s into a bounded channel. A single
//! [`ProgressAggregator`] task polls the channel once per tick, drains
//! whatever is queued, and renders one progress line through a
//! [`ProgressSink`]. The sink is owned by exactly one task at a time, so
//! console output never interleaves.
//!
//! ```text
//!  fetcher 1 ──┐
//!  fetcher 2 ──┼──► mpsc (bounded) ──► ProgressAggregator ──► ProgressSink
//!  fetcher N ──┘        Received(n) / SegmentFinished
//! ```

use std::io::{self, Write};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, warn};

use crate::size::{format_rate, format_size};

/// Width of the rendered progress bar in cells.
pub const BAR_WIDTH: u64 = 50;

/// A progress report from a range fetcher.
///
/// Events carry no segment id; aggregation is over the whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Bytes received by some segment since its previous report.
    Received(u64),
    /// One segment stopped sending byte events.
    SegmentFinished,
}

impl ProgressEvent {
    /// Signed-integer form of the completion sentinel.
    pub const FINISHED_SENTINEL: i64 = -1;

    /// Signed-integer form: positive byte counts, `-1` for completion.
    pub fn as_wire(&self) -> i64 {
        match *self {
            Self::Received(n) => i64::try_from(n).unwrap_or(i64::MAX),
            Self::SegmentFinished => Self::FINISHED_SENTINEL,
        }
    }

    /// Parse the signed-integer form. Zero and other negatives are rejected.
    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            Self::FINISHED_SENTINEL => Some(Self::SegmentFinished),
            n if n > 0 => Some(Self::Received(n as u64)),
            _ => None,
        }
    }
}

/// Running totals, owned by the aggregator loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateState {
    pub bytes_downloaded: u64,
    pub segments_finished: u32,
}

/// Destination for user-facing download output.
///
/// Status lines are emitted by the orchestrator between phases; progress
/// lines only by the aggregator while segments are in flight.
pub trait ProgressSink: Send + 'static {
    /// A one-off status line such as "download started".
    fn status(&mut self, line: &str);

    /// A refreshed progress line.
    fn progress(&mut self, line: &str);

    /// Called once when the aggregator stops.
    fn finish_progress(&mut self) {}
}

/// Writes status and progress lines to stdout.
///
/// Progress lines overwrite each other with a carriage return.
#[derive(Debug, Default)]
pub struct ConsoleProgress {
    line_open: bool,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for ConsoleProgress {
    fn status(&mut self, line: &str) {
        let mut out = io::stdout().lock();
        if self.line_open {
            let _ = writeln!(out);
            self.line_open = false;
        }
        let _ = writeln!(out, "{}", line);
    }

    fn progress(&mut self, line: &str) {
        let mut out = io::stdout().lock();
        let _ = write!(out, "\r{}", line);
        let _ = out.flush();
        self.line_open = true;
    }

    fn finish_progress(&mut self) {
        if self.line_open {
            let _ = writeln!(io::stdout().lock());
            self.line_open = false;
        }
    }
}

/// Discards all output.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn status(&mut self, _line: &str) {}
    fn progress(&mut self, _line: &str) {}
}

/// Values needed to render one progress line.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSnapshot {
    pub bytes_downloaded: u64,
    pub total_size: u64,
    /// Bytes received during the last tick; must be non-zero.
    pub delta: u64,
    pub interval: Duration,
}

impl ProgressSnapshot {
    /// Percent complete, rounded up and capped at 100.
    pub fn percent(&self) -> u64 {
        if self.total_size == 0 {
            return 100;
        }
        let scaled = (self.bytes_downloaded as u128 * 100).div_ceil(self.total_size as u128);
        scaled.min(100) as u64
    }

    /// Bytes per second over the last tick.
    pub fn throughput(&self) -> f64 {
        let secs = self.interval.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.delta as f64 / secs
    }

    /// Estimated seconds remaining, or `None` when nothing arrived this tick.
    pub fn eta_secs(&self) -> Option<u64> {
        if self.delta == 0 {
            return None;
        }
        let remaining = self.total_size.saturating_sub(self.bytes_downloaded);
        let secs = remaining as f64 / self.delta as f64 * self.interval.as_secs_f64();
        Some(secs.floor() as u64)
    }

    /// Render e.g. `  12.5MiB  50% [#########...      ]   4.2MiB/s ETA 0:00:03`.
    pub fn render(&self) -> String {
        let percent = self.percent();
        let filled = (percent * BAR_WIDTH / 100) as usize;
        let empty = BAR_WIDTH as usize - filled;
        let eta = self
            .eta_secs()
            .map(format_eta)
            .unwrap_or_else(|| "-:--:--".to_string());

        format!(
            "{:>10} {:>3}% [{}{}] {:>12} ETA {}",
            format_size(self.bytes_downloaded),
            percent,
            "#".repeat(filled),
            " ".repeat(empty),
            format_rate(self.throughput()),
            eta
        )
    }
}

/// Format seconds as `H:MM:SS`.
pub fn format_eta(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{}:{:02}:{:02}", hours, minutes, seconds)
}

/// Consumes progress events until every segment has finished.
pub struct ProgressAggregator<S: ProgressSink> {
    receiver: mpsc::Receiver<ProgressEvent>,
    total_size: u64,
    total_parts: u32,
    interval: Duration,
    sink: S,
}

impl<S: ProgressSink> ProgressAggregator<S> {
    pub fn new(
        receiver: mpsc::Receiver<ProgressEvent>,
        total_size: u64,
        total_parts: u32,
        interval: Duration,
        sink: S,
    ) -> Self {
        Self {
            receiver,
            total_size,
            total_parts,
            interval,
            sink,
        }
    }

    /// Poll the channel once per tick until `total_parts` sentinels arrived.
    ///
    /// Also stops if every sender is gone, so a fetcher task that died without
    /// sending its sentinel cannot hang the download. Returns the final totals
    /// and hands the sink back to the caller.
    pub async fn run(mut self) -> (AggregateState, S) {
        let mut state = AggregateState::default();

        while state.segments_finished < self.total_parts {
            let tick_started = Instant::now();
            let (delta, disconnected) = self.drain(&mut state);
            state.bytes_downloaded += delta;

            if delta != 0 {
                let snapshot = ProgressSnapshot {
                    bytes_downloaded: state.bytes_downloaded,
                    total_size: self.total_size,
                    delta,
                    interval: self.interval,
                };
                self.sink.progress(&snapshot.render());
            }

            if state.segments_finished >= self.total_parts {
                break;
            }
            if disconnected {
                warn!(
                    finished = state.segments_finished,
                    expected = self.total_parts,
                    "progress channel closed before all parts finished"
                );
                break;
            }

            tokio::time::sleep(self.interval.saturating_sub(tick_started.elapsed())).await;
        }

        debug!(
            bytes = state.bytes_downloaded,
            finished = state.segments_finished,
            "progress aggregator stopped"
        );
        self.sink.finish_progress();
        (state, self.sink)
    }

    /// Take every queued event without waiting. Returns the byte delta and
    /// whether the channel has been closed by all senders.
    fn drain(&mut self, state: &mut AggregateState) -> (u64, bool) {
        let mut delta = 0u64;
        loop {
            match self.receiver.try_recv() {
                Ok(ProgressEvent::Received(n)) => delta += n,
                Ok(ProgressEvent::SegmentFinished) => state.segments_finished += 1,
                Err(TryRecvError::Empty) => return (delta, false),
                Err(TryRecvError::Disconnected) => return (delta, true),
            }
        }
    }
}
