//! Segment descriptors and on-disk naming.

use std::path::{Path, PathBuf};

use reqwest::Url;

use super::plan::{ByteRange, DownloadPlan};

/// File name used when the URL path has no usable last segment.
pub const FALLBACK_FILE_NAME: &str = "download.bin";

/// One planned segment: its 1-based id, byte range, and scratch file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub id: u32,
    pub range: ByteRange,
    pub file_path: PathBuf,
}

impl SegmentDescriptor {
    /// Build descriptors for every range of `plan`, placing segment files in
    /// `segment_dir` as `<file_name>.part<N>`.
    pub fn for_plan(plan: &DownloadPlan, segment_dir: &Path, file_name: &str) -> Vec<Self> {
        plan.ranges
            .iter()
            .zip(1u32..)
            .map(|(range, id)| Self {
                id,
                range: *range,
                file_path: segment_path(segment_dir, file_name, id),
            })
            .collect()
    }
}

/// Path of segment `id` inside `segment_dir`.
pub fn segment_path(segment_dir: &Path, file_name: &str, id: u32) -> PathBuf {
    segment_dir.join(format!("{}.part{}", file_name, id))
}

/// Last path segment of `url`, without query string or fragment.
///
/// Falls back to [`FALLBACK_FILE_NAME`] when the URL cannot be parsed or
/// ends in a slash.
pub fn file_name_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty() && name != "." && name != "..")
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}
