use std::path::{Path, PathBuf};

use tracing::instrument;

use crate::service::{BoxedRead, BoxedWrite, FileInfo, RemoteFileService, ServiceError};

/// File service rooted at a local directory.
///
/// Serves a mounted device filesystem or a simulator data directory with the same semantics the
/// device's file service has: paths are relative to the root (a leading `/` is ignored), `..`
/// segments are refused and directories are only created when their parent exists.
#[derive(Debug, Clone)]
pub struct LocalRootService {
    root: PathBuf,
}

impl LocalRootService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, ServiceError> {
        let mut resolved = self.root.clone();
        for segment in path.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(ServiceError::InvalidPath {
                        path: path.to_string(),
                    });
                }
                segment => resolved.push(segment),
            }
        }
        Ok(resolved)
    }
}

#[async_trait::async_trait]
impl RemoteFileService for LocalRootService {
    #[instrument(skip(self))]
    async fn list_directory(&self, path: &str) -> Result<Vec<String>, ServiceError> {
        let local = self.resolve(path)?;
        let mut entries = tokio::fs::read_dir(&local)
            .await
            .map_err(|err| ServiceError::from_io(path, err))?;
        let mut names = vec![];
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| ServiceError::from_io(path, err))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn file_info(&self, path: &str) -> Result<FileInfo, ServiceError> {
        let local = self.resolve(path)?;
        let metadata = tokio::fs::metadata(&local)
            .await
            .map_err(|err| ServiceError::from_io(path, err))?;
        Ok(FileInfo {
            is_dir: metadata.is_dir(),
            size: metadata.len(),
        })
    }

    #[instrument(skip(self))]
    async fn create_directory(&self, path: &str) -> Result<(), ServiceError> {
        let local = self.resolve(path)?;
        if let Err(error) = tokio::fs::create_dir(&local).await {
            if error.kind() == std::io::ErrorKind::AlreadyExists
                && tokio::fs::metadata(&local)
                    .await
                    .map(|md| md.is_dir())
                    .unwrap_or(false)
            {
                return Ok(());
            }
            return Err(ServiceError::from_io(path, error));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_directory(&self, path: &str) -> Result<(), ServiceError> {
        let local = self.resolve(path)?;
        if local == self.root {
            return Err(ServiceError::InvalidPath {
                path: path.to_string(),
            });
        }
        let metadata = tokio::fs::symlink_metadata(&local)
            .await
            .map_err(|err| ServiceError::from_io(path, err))?;
        let res = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&local).await
        } else {
            tokio::fs::remove_file(&local).await
        };
        res.map_err(|err| ServiceError::from_io(path, err))
    }

    async fn create_read_stream(&self, path: &str) -> Result<BoxedRead, ServiceError> {
        let local = self.resolve(path)?;
        let file = tokio::fs::File::open(&local)
            .await
            .map_err(|err| ServiceError::from_io(path, err))?;
        Ok(Box::new(file))
    }

    async fn create_write_stream(&self, path: &str) -> Result<BoxedWrite, ServiceError> {
        let local = self.resolve(path)?;
        let file = tokio::fs::File::create(&local)
            .await
            .map_err(|err| ServiceError::from_io(path, err))?;
        Ok(Box::new(file))
    }
}
