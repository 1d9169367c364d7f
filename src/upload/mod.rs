//! Temporary spooling of uploaded files
//!
//! An upload is written to a uniquely named file in the upload directory,
//! forwarded, then removed. `TempUpload` owns that file: removal happens
//! explicitly through [`TempUpload::remove`] on the normal path and in `Drop`
//! on every other one, including a handler future being dropped mid-request.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

const MAX_EXTENSION_LEN: usize = 10;

/// A spooled upload, deleted when dropped
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
    file_name: String,
    size: u64,
    removed: bool,
}

impl TempUpload {
    /// Location of the spooled bytes
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name to present to the backend
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Number of bytes written
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Delete the file now, reporting any failure
    pub async fn remove(mut self) -> AppResult<()> {
        self.removed = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Removed spooled upload");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed abandoned upload"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove abandoned upload"),
        }
    }
}

/// Write a chunk stream to a new file in `dir`.
///
/// Fails with a validation error once more than `max_bytes` arrive; the
/// partial file is removed in that case like on any other error.
pub async fn spool<S, E>(
    dir: &Path,
    original_name: Option<&str>,
    chunks: S,
    max_bytes: usize,
) -> AppResult<TempUpload>
where
    S: Stream<Item = Result<Bytes, E>>,
    AppError: From<E>,
{
    let path = dir.join(unique_name(original_name));
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await?;

    let mut upload = TempUpload {
        path,
        file_name: presented_name(original_name),
        size: 0,
        removed: false,
    };

    let mut chunks = std::pin::pin!(chunks);
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        upload.size += chunk.len() as u64;
        if upload.size > max_bytes as u64 {
            return Err(AppError::Validation(format!(
                "File exceeds the {} byte upload limit",
                max_bytes
            )));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    debug!(path = %upload.path.display(), bytes = upload.size, "Spooled upload");
    Ok(upload)
}

/// Collision-free spool name: millisecond timestamp plus a random suffix,
/// keeping a short alphanumeric extension from the original name.
pub fn unique_name(original_name: Option<&str>) -> String {
    let extension = original_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();

    format!(
        "{}-{}{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        extension
    )
}

/// Base name of the client's file name, without any directory parts
fn presented_name(original_name: Option<&str>) -> String {
    original_name
        .map(|name| name.rsplit(['/', '\\']).next().unwrap_or(name).trim())
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .unwrap_or("upload")
        .to_string()
}
