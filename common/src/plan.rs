//! Traversal order of folder transfers
//!
//! Directories are created parents-first, so they are ordered by ascending depth. Files are
//! ordered by descending size: the largest transfers are the most likely to hit space or time
//! limits and should surface those problems first. Both sorts are stable, so items that compare
//! equal keep their scan order.

use anyhow::{Context, Result};
use async_recursion::async_recursion;
use tracing::instrument;

use crate::item::TransferItem;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Plan {
    pub directories: Vec<TransferItem>,
    pub files: Vec<TransferItem>,
}

impl Plan {
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.files
            .iter()
            .map(|file| file.size_bytes.unwrap_or(0))
            .sum()
    }
}

/// Splits scanned items into directories (depth ascending) and files (size descending).
pub fn plan(items: impl IntoIterator<Item = TransferItem>) -> Plan {
    let (mut directories, mut files): (Vec<_>, Vec<_>) =
        items.into_iter().partition(|item| item.is_directory);
    directories.sort_by_key(TransferItem::depth);
    files.sort_by_key(|file| std::cmp::Reverse(file.size_bytes.unwrap_or(0)));
    Plan { directories, files }
}

/// Recursively scans a local directory, the root itself is not reported.
#[instrument]
pub async fn scan_local(root: &std::path::Path) -> Result<Vec<TransferItem>> {
    let mut items = vec![];
    scan_dir(root, "", &mut items).await?;
    Ok(items)
}

#[async_recursion]
async fn scan_dir(
    dir: &std::path::Path,
    relative: &str,
    items: &mut Vec<TransferItem>,
) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("cannot open directory {dir:?} for reading"))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed traversing directory {dir:?}"))?
    {
        let entry_path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let entry_relative = if relative.is_empty() {
            name
        } else {
            format!("{relative}/{name}")
        };
        let metadata = tokio::fs::symlink_metadata(&entry_path)
            .await
            .with_context(|| format!("failed reading metadata from {entry_path:?}"))?;
        if metadata.is_dir() {
            items.push(TransferItem::directory(entry_relative.clone()));
            scan_dir(&entry_path, &entry_relative, items).await?;
        } else if metadata.is_file() {
            items.push(TransferItem::file(entry_relative, metadata.len()));
        } else {
            // symlinks are pushed as the file they point to, anything else is skipped
            match tokio::fs::metadata(&entry_path).await {
                Ok(target) if target.is_file() => {
                    items.push(TransferItem::file(entry_relative, target.len()));
                }
                _ => tracing::warn!("skipping {:?}: not a regular file or directory", entry_path),
            }
        }
    }
    Ok(())
}
