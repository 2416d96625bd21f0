//! Reassembly of segment files and cleanup after failure.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use super::segment::segment_path;
use crate::error::{DownloadError, DownloadResult};

/// Bounded read size while copying a segment (1 MiB).
const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// Suffix of the staging file written before the final rename.
const STAGING_SUFFIX: &str = ".partial";

/// Staging path for `output`: the same path with `.partial` appended.
pub fn staging_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(STAGING_SUFFIX);
    output.with_file_name(name)
}

/// Concatenate segments into `output_path` in ascending id order.
///
/// Each segment file `<file_name>.part<id>` in `segment_dir` is deleted once
/// it has been copied. Data is written to a staging file next to the output
/// and renamed into place only after every segment was copied, so a failed
/// merge never leaves something that looks like a complete file.
///
/// Must only be called once every segment has been fetched successfully.
pub async fn merge(
    output_path: &Path,
    segment_dir: &Path,
    file_name: &str,
    segment_ids: &[u32],
) -> DownloadResult<u64> {
    let mut ids = segment_ids.to_vec();
    ids.sort_unstable();

    let staging = staging_path(output_path);
    match concat_segments(&staging, segment_dir, file_name, &ids).await {
        Ok(bytes) => {
            fs::rename(&staging, output_path)
                .await
                .map_err(|source| DownloadError::MergeFailed {
                    path: output_path.to_path_buf(),
                    source,
                })?;
            debug!(path = %output_path.display(), bytes, "merged parts");
            Ok(bytes)
        }
        Err(source) => {
            if let Err(e) = fs::remove_file(&staging).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %staging.display(), error = %e, "failed to remove staging file");
                }
            }
            Err(DownloadError::MergeFailed {
                path: output_path.to_path_buf(),
                source,
            })
        }
    }
}

async fn concat_segments(
    staging: &Path,
    segment_dir: &Path,
    file_name: &str,
    ids: &[u32],
) -> io::Result<u64> {
    let mut writer = BufWriter::new(File::create(staging).await?);
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total: u64 = 0;

    for &id in ids {
        let part = segment_path(segment_dir, file_name, id);
        let mut reader = File::open(&part).await?;
        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&buffer[..n]).await?;
            total += n as u64;
        }
        drop(reader);
        fs::remove_file(&part).await?;
        debug!(part = id, "merged part");
    }

    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    Ok(total)
}

/// Delete segment files, best effort.
///
/// Missing files are ignored. Any other error is logged and the remaining
/// files are still attempted. Returns how many files were removed.
pub async fn remove_segments<'a, I>(paths: I) -> usize
where
    I: IntoIterator<Item = &'a Path>,
{
    let mut removed = 0;
    for path in paths {
        match fs::remove_file(path).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to delete partial part");
            }
        }
    }
    removed
}
