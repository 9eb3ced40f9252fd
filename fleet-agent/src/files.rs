//! File responders: directory listings, bounded reads, uploads and
//! downloads requested by the server.

use std::path::Path;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};

use fleet_shared::files::FileEntry;

/// Largest file served through `get_file_content`.
pub const MAX_CONTENT_BYTES: u64 = 1024 * 1024;

pub async fn list_directory(path: &str) -> Result<Vec<FileEntry>> {
    let mut reader = tokio::fs::read_dir(path)
        .await
        .with_context(|| format!("Failed to read directory {path}"))?;

    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        // a stat failure on one entry (permissions, races) degrades to
        // zeros instead of failing the listing
        match entry.metadata().await {
            Ok(metadata) => {
                let modified = metadata
                    .modified()
                    .ok()
                    .map(|time| DateTime::<Utc>::from(time));
                entries.push(FileEntry {
                    name,
                    is_directory: metadata.is_dir(),
                    size: metadata.len(),
                    modified,
                });
            }
            Err(_) => entries.push(FileEntry {
                name,
                is_directory: false,
                size: 0,
                modified: None,
            }),
        }
    }
    Ok(entries)
}

/// Reads a text file, refusing anything over [`MAX_CONTENT_BYTES`].
pub async fn read_content(path: &str) -> Result<String> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Failed to stat {path}"))?;
    if metadata.len() > MAX_CONTENT_BYTES {
        bail!("File too large (max 1MB)");
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {path}"))
}

/// Decodes and writes an uploaded file, creating parent directories.
pub async fn write_upload(destination_path: &str, content_base64: &str) -> Result<()> {
    let bytes = BASE64
        .decode(content_base64)
        .context("Invalid base64 upload payload")?;
    if let Some(parent) = Path::new(destination_path).parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(destination_path, bytes)
        .await
        .with_context(|| format!("Failed to write {destination_path}"))?;
    Ok(())
}

/// Reads a file for download, base64-encoded for the wire.
pub async fn read_download(source_path: &str) -> Result<String> {
    let bytes = tokio::fs::read(source_path)
        .await
        .with_context(|| format!("Failed to read {source_path}"))?;
    Ok(BASE64.encode(bytes))
}
