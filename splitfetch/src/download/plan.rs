//! Chunk planning.
//!
//! Splits a file size into a small number of contiguous byte ranges. The part
//! count starts at [`DEFAULT_PARTS`], shrinks while parts would fall under the
//! minimum chunk size, and grows (up to [`MAX_PARTS`]) while parts would exceed
//! the maximum chunk size.

use std::fmt;

use tracing::error;

use crate::config::{DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MIN_CHUNK_SIZE};
use crate::error::{DownloadError, DownloadResult};

/// Part count the planner starts from.
pub const DEFAULT_PARTS: u64 = 3;

/// Hard cap on the number of parts.
pub const MAX_PARTS: u64 = 6;

/// Inclusive byte range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Create a range. An `end` below `start` yields an empty range.
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.end - self.start + 1
        }
    }

    /// True when `end` is below `start`.
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Value for the HTTP `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// The ranges a file is split into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    /// Ranges in ascending order.
    pub ranges: Vec<ByteRange>,
    /// Size every range has, except possibly the last.
    pub nominal_chunk_size: u64,
    /// Size of the whole file.
    pub total_size: u64,
}

impl DownloadPlan {
    /// Number of parts in the plan.
    pub fn parts(&self) -> usize {
        self.ranges.len()
    }

    /// Check that the ranges cover exactly `total_size` bytes.
    pub fn verify(&self) -> DownloadResult<()> {
        let actual: u64 = self.ranges.iter().map(ByteRange::len).sum();
        if actual != self.total_size {
            error!(
                expected = self.total_size,
                actual, "planned ranges do not cover the file"
            );
            return Err(DownloadError::PlanningInvariantViolation {
                expected: self.total_size,
                actual,
            });
        }
        Ok(())
    }
}

/// Plan ranges for `file_size` bytes.
///
/// `None` bounds fall back to 10 MiB / 100 MiB. A zero-byte file yields a plan
/// with no ranges. The returned plan has already been verified.
pub fn plan(
    file_size: u64,
    min_chunk_size: Option<u64>,
    max_chunk_size: Option<u64>,
) -> DownloadResult<DownloadPlan> {
    let min = min_chunk_size.unwrap_or(DEFAULT_MIN_CHUNK_SIZE);
    let max = max_chunk_size.unwrap_or(DEFAULT_MAX_CHUNK_SIZE);
    if min == 0 || max == 0 || min > max {
        return Err(DownloadError::InvalidConfig(format!(
            "chunk bounds must satisfy 0 < min <= max (min {}, max {})",
            min, max
        )));
    }

    if file_size == 0 {
        return Ok(DownloadPlan {
            ranges: Vec::new(),
            nominal_chunk_size: 0,
            total_size: 0,
        });
    }

    let parts = part_count(file_size, min, max);
    let chunk = file_size.div_ceil(parts);

    let ranges = (0..parts)
        .map(|i| i * chunk)
        .take_while(|&start| start < file_size)
        .map(|start| ByteRange::new(start, (start + chunk).min(file_size) - 1))
        .collect();

    let plan = DownloadPlan {
        ranges,
        nominal_chunk_size: chunk,
        total_size: file_size,
    };
    plan.verify()?;
    Ok(plan)
}

/// Number of parts for a non-empty file, always in `[1, MAX_PARTS]`.
fn part_count(file_size: u64, min: u64, max: u64) -> u64 {
    let mut parts = DEFAULT_PARTS;

    while parts > 1 && file_size.div_ceil(min) < parts {
        parts -= 1;
    }
    while parts < MAX_PARTS && file_size.div_ceil(max) > parts {
        parts += 1;
    }

    parts.max(1)
}
