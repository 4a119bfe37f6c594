use std::fs::FileTimes;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::StreamExt;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::{FetchError, Phase};

/// Per-process sequence for temp file names.
static PART_SEQ: AtomicU64 = AtomicU64::new(0);

/// Sibling `.part` path for an in-progress download.
///
/// Records that share a capture second map to the same final name, so
/// every call gets its own temp file: `<name>.<pid>-<seq>.part`.
fn part_path(download_path: &Path) -> PathBuf {
    let seq = PART_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut name = download_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}-{}.part", std::process::id(), seq));
    download_path.with_file_name(name)
}

/// Stream a response body to `download_path` via a `.part` file.
///
/// The final path only appears once the whole body has been written and
/// flushed; any failure removes the partial file. When two writers race
/// for one path the last rename wins, and each rename replaces a complete
/// file. Returns bytes written.
pub(crate) async fn write_body(
    response: reqwest::Response,
    download_path: &Path,
) -> Result<u64, FetchError> {
    let part = part_path(download_path);
    let result = match stream_to(response, &part).await {
        Ok(bytes) => fs::rename(&part, download_path)
            .await
            .map(|()| bytes)
            .map_err(FetchError::from),
        Err(e) => Err(e),
    };
    if result.is_err() {
        let _ = fs::remove_file(&part).await;
    }
    result
}

async fn stream_to(response: reqwest::Response, part: &Path) -> Result<u64, FetchError> {
    let mut file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(part)
        .await?;

    let mut bytes_written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| {
            tracing::debug!(
                path = %part.display(),
                bytes_so_far = bytes_written,
                "body stream error: {}",
                source
            );
            FetchError::Transport {
                phase: Phase::Content,
                source,
            }
        })?;
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(bytes_written)
}

/// Set the modification and access times of a file to the given Unix
/// timestamp.
///
/// Handles negative timestamps (dates before 1970) by stepping back from
/// the epoch, clamping to it when that underflows.
pub(crate) fn set_file_mtime(path: &Path, timestamp: i64) -> std::io::Result<()> {
    let time = if timestamp >= 0 {
        UNIX_EPOCH + Duration::from_secs(timestamp as u64)
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(timestamp.unsigned_abs()))
            .unwrap_or(SystemTime::UNIX_EPOCH)
    };
    let times = FileTimes::new().set_modified(time).set_accessed(time);
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_times(times)?;
    Ok(())
}
