use std::path::{Path, PathBuf};

use crate::error::Error;

/// Scratch directory that pulled files are mirrored into before being archived.
///
/// Call [`MirrorRoot::remove`] once done; dropping it removes the directory as well, which covers
/// cancellation and panics.
#[derive(Debug)]
pub struct MirrorRoot {
    dir: tempfile::TempDir,
}

impl MirrorRoot {
    /// Creates a fresh, uniquely named directory below `parent` (or the system temp dir).
    pub fn create(parent: Option<&Path>) -> Result<Self, Error> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("afcx-pull-");
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|source| Error::Stream {
            path: parent
                .map(|parent| parent.display().to_string())
                .unwrap_or_else(|| std::env::temp_dir().display().to_string()),
            source,
        })?;
        tracing::debug!("mirroring into {:?}", dir.path());
        Ok(Self { dir })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Local counterpart of a remote path; `.` and `..` segments are dropped.
    #[must_use]
    pub fn local_path(&self, remote_path: &str) -> PathBuf {
        let mut local = self.dir.path().to_path_buf();
        for segment in remote_path.split('/') {
            if !matches!(segment, "" | "." | "..") {
                local.push(segment);
            }
        }
        local
    }

    pub async fn remove(self) {
        if let Err(error) = tokio::fs::remove_dir_all(self.dir.path()).await {
            tracing::warn!(
                "cannot remove the scratch directory {:?}: {}",
                self.dir.path(),
                error
            );
        }
    }
}
