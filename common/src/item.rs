use crate::error::Error;

/// One file or directory to transfer, relative to the root of its operation.
///
/// Paths always use `/` separators, whatever the local platform is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    pub relative_path: String,
    pub is_directory: bool,
    /// Known for files only
    pub size_bytes: Option<u64>,
}

impl TransferItem {
    pub fn directory(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            is_directory: true,
            size_bytes: None,
        }
    }

    pub fn file(relative_path: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            relative_path: relative_path.into(),
            is_directory: false,
            size_bytes: Some(size_bytes),
        }
    }

    /// Number of non-empty path segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        depth(&self.relative_path)
    }
}

#[must_use]
pub fn depth(path: &str) -> usize {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Succeeded,
    Failed,
}

/// Result of a single file transfer.
#[derive(Debug)]
pub struct TransferOutcome {
    pub path: String,
    pub bytes: u64,
    /// Present iff the transfer failed
    pub error: Option<Error>,
}

impl TransferOutcome {
    pub fn succeeded(path: impl Into<String>, bytes: u64) -> Self {
        Self {
            path: path.into(),
            bytes,
            error: None,
        }
    }

    pub fn failed(path: impl Into<String>, error: Error) -> Self {
        Self {
            path: path.into(),
            bytes: 0,
            error: Some(error),
        }
    }

    #[must_use]
    pub fn status(&self) -> Status {
        if self.error.is_some() {
            Status::Failed
        } else {
            Status::Succeeded
        }
    }
}
