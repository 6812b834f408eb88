//! Packaging of mirrored folders into zip archives

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine;

use crate::error::Error;

/// Zips the contents of `root`; entry names are relative to it and use `/` separators.
pub async fn pack(root: PathBuf) -> Result<Vec<u8>, Error> {
    let display = root.display().to_string();
    tokio::task::spawn_blocking(move || pack_blocking(&root))
        .await
        .map_err(|error| Error::transfer(format!("Cannot archive '{display}'"), error))?
        .map_err(|error| Error::transfer(format!("Cannot archive '{display}'"), error))
}

fn pack_blocking(root: &Path) -> Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    let mut files = 0usize;
    for entry in walkdir::WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed traversing {root:?}"))?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("{:?} is not below {:?}", entry.path(), root))?;
        let name = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if entry.file_type().is_dir() {
            writer.add_directory(format!("{name}/"), options)?;
        } else {
            writer.start_file(name, options)?;
            let mut file = std::fs::File::open(entry.path())
                .with_context(|| format!("cannot open {:?} for reading", entry.path()))?;
            std::io::copy(&mut file, &mut writer)
                .with_context(|| format!("failed archiving {:?}", entry.path()))?;
            files += 1;
        }
    }
    let mut cursor = writer.finish()?;
    cursor.flush()?;
    tracing::debug!("archived {} files from {:?}", files, root);
    Ok(cursor.into_inner())
}

#[must_use]
pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
