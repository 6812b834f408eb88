//! The remote file service consumed by the transfer engines
//!
//! The device exposes an AFC-like service: directories can be listed, created and deleted, and
//! files are read and written through streams addressed by paths relative to the service root.
//! Connection setup and the wire protocol are out of scope here; anything implementing
//! [`RemoteFileService`] can be driven by the pull and push engines.

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::io::{AsyncRead, AsyncWrite};

/// Boxed remote read stream
pub type BoxedRead = Box<dyn AsyncRead + Unpin + Send>;
/// Boxed remote write stream, a successful `shutdown` is the "close" event
pub type BoxedWrite = Box<dyn AsyncWrite + Unpin + Send>;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("OBJECT_NOT_FOUND: '{path}'")]
    NotFound { path: String },
    #[error("I/O error on '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid remote path '{path}'")]
    InvalidPath { path: String },
}

impl ServiceError {
    /// Maps an I/O error on `path`, keeping "not found" distinguishable.
    pub fn from_io(path: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            ServiceError::NotFound {
                path: path.to_string(),
            }
        } else {
            ServiceError::Io {
                path: path.to_string(),
                source,
            }
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::NotFound { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub is_dir: bool,
    pub size: u64,
}

/// One item reported by [`RemoteFileService::walk_dir`]; `path` is relative to the service root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: String,
    pub is_dir: bool,
}

/// Joins remote path segments with `/`, dropping empty segments and trailing separators.
#[must_use]
pub fn join(base: &str, relative: &str) -> String {
    let absolute = base.starts_with('/');
    let base = base.trim_end_matches('/');
    let relative = relative.trim_start_matches('/').trim_end_matches('/');
    match (base.is_empty(), relative.is_empty()) {
        (true, true) if absolute => "/".to_string(),
        (_, true) => base.to_string(),
        (true, false) if absolute => format!("/{relative}"),
        (true, false) => relative.to_string(),
        (false, false) => format!("{base}/{relative}"),
    }
}

/// Drops trailing separators, the service rejects directory paths ending in `/`.
#[must_use]
pub fn trim_trailing_separators(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" if path.starts_with('/') => "/",
        trimmed => trimmed,
    }
}

/// Parent of a remote path, "." for top-level items.
#[must_use]
pub fn dirname(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(idx) => &trimmed[..idx],
        None => ".",
    }
}

#[async_trait::async_trait]
pub trait RemoteFileService: Send + Sync {
    async fn list_directory(&self, path: &str) -> Result<Vec<String>, ServiceError>;

    async fn file_info(&self, path: &str) -> Result<FileInfo, ServiceError>;

    /// Must fail when the parent directory does not exist.
    async fn create_directory(&self, path: &str) -> Result<(), ServiceError>;

    /// Removes a directory tree or a single file.
    async fn delete_directory(&self, path: &str) -> Result<(), ServiceError>;

    async fn create_read_stream(&self, path: &str) -> Result<BoxedRead, ServiceError>;

    async fn create_write_stream(&self, path: &str) -> Result<BoxedWrite, ServiceError>;

    /// Recursively reports every item below `root` (the root itself is not reported).
    ///
    /// The default walks breadth-first using `list_directory` and `file_info`; callers must not
    /// depend on the order.
    fn walk_dir<'a>(&'a self, root: &'a str) -> BoxStream<'a, Result<WalkEntry, ServiceError>> {
        let pending = std::collections::VecDeque::from([root.to_string()]);
        futures::stream::unfold(
            (pending, Vec::<WalkEntry>::new()),
            move |(mut pending, mut ready)| async move {
                loop {
                    if let Some(entry) = ready.pop() {
                        if entry.is_dir {
                            pending.push_back(entry.path.clone());
                        }
                        return Some((Ok(entry), (pending, ready)));
                    }
                    let dir = pending.pop_front()?;
                    let names = match self.list_directory(&dir).await {
                        Ok(names) => names,
                        Err(error) => return Some((Err(error), (pending, ready))),
                    };
                    // reversed so that pop() yields entries in listing order
                    for name in names.iter().rev() {
                        if name == "." || name == ".." {
                            continue;
                        }
                        let path = join(&dir, name);
                        match self.file_info(&path).await {
                            Ok(info) => ready.push(WalkEntry {
                                path,
                                is_dir: info.is_dir,
                            }),
                            Err(error) => return Some((Err(error), (pending, ready))),
                        }
                    }
                }
            },
        )
        .boxed()
    }
}
