//! Segmented HTTP downloads.
//!
//! This module splits a single remote file into byte ranges and fetches them
//! concurrently:
//! - Chunk planning (`plan`)
//! - Segment descriptors and file naming (`segment`)
//! - Range requests into segment files (`http`)
//! - Progress aggregation and rendering (`progress`)
//! - Ordered reassembly and cleanup (`merge`)
//! - High-level orchestration (`orchestrator`)
//!
//! # Architecture
//!
//! ```text
//! SegmentedDownloader (orchestrator)
//!         │
//!         ├── plan()                      size ─► DownloadPlan
//!         │
//!         ├── RangeFetcher × N            one tokio task per range
//!         │       └── mpsc::Sender<ProgressEvent>
//!         │
//!         ├── ProgressAggregator          one tokio task, owns the ProgressSink
//!         │
//!         └── merge() / remove_segments() after every fetcher has joined
//! ```
//!
//! # Example
//!
//! ```ignore
//! use splitfetch::config::DownloadConfig;
//! use splitfetch::download::SegmentedDownloader;
//!
//! let downloader = SegmentedDownloader::new(DownloadConfig::default())?;
//! let outcome = downloader
//!     .download("https://example.com/big.iso", None)
//!     .await?;
//! println!("wrote {}", outcome.output_path.display());
//! ```

mod http;
mod merge;
mod orchestrator;
mod plan;
mod progress;
mod segment;

pub use http::{parse_content_length, RangeFetcher};
pub use merge::{merge, remove_segments, staging_path};
pub use orchestrator::{DownloadOutcome, DownloadPhase, SegmentedDownloader};
pub use plan::{plan, ByteRange, DownloadPlan, DEFAULT_PARTS, MAX_PARTS};
pub use progress::{
    format_eta, AggregateState, ConsoleProgress, ProgressAggregator, ProgressEvent,
    ProgressSink, ProgressSnapshot, SilentProgress, BAR_WIDTH,
};
pub use segment::{file_name_from_url, segment_path, SegmentDescriptor, FALLBACK_FILE_NAME};
