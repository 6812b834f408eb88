use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

use crate::archive;
use crate::config::TransferSettings;
use crate::error::Error;
use crate::item::{self, Status, TransferOutcome};
use crate::mirror::MirrorRoot;
use crate::progress;
use crate::service::RemoteFileService;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Summary {
    pub files_pulled: usize,
    pub files_failed: usize,
    pub directories: usize,
    pub bytes_pulled: u64,
}

impl Summary {
    #[must_use]
    pub fn files_total(&self) -> usize {
        self.files_pulled + self.files_failed
    }
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            files_pulled: self.files_pulled + other.files_pulled,
            files_failed: self.files_failed + other.files_failed,
            directories: self.directories + other.directories,
            bytes_pulled: self.bytes_pulled + other.bytes_pulled,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "pulled {} of {} files, {} folders\n\
            bytes pulled: {}",
            self.files_pulled,
            self.files_total(),
            self.directories,
            bytesize::ByteSize(self.bytes_pulled)
        )
    }
}

/// A pulled folder packaged as a zip archive.
#[derive(Debug)]
pub struct PulledFolder {
    pub archive: Vec<u8>,
    pub summary: Summary,
}

impl PulledFolder {
    #[must_use]
    pub fn to_base64(&self) -> String {
        archive::encode_base64(&self.archive)
    }
}

fn check_file_path(remote_path: &str) -> Result<(), Error> {
    if remote_path.ends_with('/') {
        return Err(Error::InvalidArgument(format!(
            "It is expected that remote path points to a file and not to a folder. '{remote_path}' is given instead"
        )));
    }
    Ok(())
}

/// Reads a whole remote file into memory.
#[instrument(skip(prog_track, service, settings))]
pub async fn pull_file(
    prog_track: &'static progress::Progress,
    service: &dyn RemoteFileService,
    remote_path: &str,
    settings: &TransferSettings,
) -> Result<Vec<u8>, Error> {
    check_file_path(remote_path)?;
    let _ops_guard = prog_track.ops.guard();
    let started = tokio::time::Instant::now();
    let read = async {
        let mut stream = service.create_read_stream(remote_path).await?;
        let mut buffer = Vec::new();
        stream
            .read_to_end(&mut buffer)
            .await
            .map_err(|source| Error::Stream {
                path: remote_path.to_string(),
                source,
            })?;
        Ok::<_, Error>(buffer)
    };
    let buffer = match tokio::time::timeout(settings.io_timeout, read).await {
        Ok(Ok(buffer)) => buffer,
        Ok(Err(error @ Error::NotFound { .. })) => return Err(error),
        Ok(Err(error)) => {
            return Err(Error::transfer(
                format!("Cannot pull '{remote_path}'"),
                error,
            ));
        }
        Err(_) => {
            return Err(Error::DeadlineExceeded {
                elapsed: started.elapsed(),
            });
        }
    };
    prog_track.files_pulled.inc();
    prog_track.bytes_transferred.add(buffer.len() as u64);
    tracing::debug!(
        "pulled '{}' ({}) in {}ms",
        remote_path,
        bytesize::ByteSize(buffer.len() as u64),
        started.elapsed().as_millis()
    );
    Ok(buffer)
}

/// Mirrors a remote directory tree into a scratch directory and packages it as a zip archive.
///
/// Individual files that fail (or do not finish within `io_timeout`) are logged and skipped; only
/// failures to walk the tree, mirror directories or build the archive fail the whole call. The
/// scratch directory is removed in every case.
#[instrument(skip(prog_track, service, settings))]
pub async fn pull_folder(
    prog_track: &'static progress::Progress,
    service: Arc<dyn RemoteFileService>,
    remote_root: &str,
    settings: &TransferSettings,
) -> Result<PulledFolder, Error> {
    settings.validate().map_err(Error::InvalidArgument)?;
    let mirror = MirrorRoot::create(settings.scratch_dir.as_deref())?;
    let res = match mirror_tree(prog_track, &service, remote_root, &mirror, settings).await {
        Ok((archive_root, summary)) => archive::pack(archive_root)
            .await
            .map(|archive| PulledFolder { archive, summary }),
        Err(error) => Err(error),
    };
    mirror.remove().await;
    res
}

async fn mirror_tree(
    prog_track: &'static progress::Progress,
    service: &Arc<dyn RemoteFileService>,
    remote_root: &str,
    mirror: &MirrorRoot,
    settings: &TransferSettings,
) -> Result<(PathBuf, Summary), Error> {
    let mut summary = Summary::default();
    // shallowest item seen so far, its parent is what gets archived
    let mut top_item: Option<(usize, PathBuf)> = None;
    let mut window = throttle::Window::new(settings.max_width);
    let mut walk = service.walk_dir(remote_root);
    while let Some(entry) = walk.next().await {
        let entry = entry
            .map_err(|error| Error::transfer(format!("Cannot walk '{remote_root}'"), error))?;
        let local_path = mirror.local_path(&entry.path);
        let local_dir = if entry.is_dir {
            local_path.as_path()
        } else {
            local_path.parent().unwrap_or(mirror.path())
        };
        tokio::fs::create_dir_all(local_dir)
            .await
            .map_err(|source| Error::Stream {
                path: local_dir.display().to_string(),
                source,
            })?;
        let depth = item::depth(&entry.path);
        if top_item
            .as_ref()
            .is_none_or(|(top_depth, _)| depth < *top_depth)
        {
            top_item = Some((depth, local_path.clone()));
        }
        if entry.is_dir {
            summary.directories += 1;
            prog_track.directories_mirrored.inc();
            continue;
        }
        let task = pull_one(
            prog_track,
            service.clone(),
            entry.path,
            local_path,
            settings.io_timeout,
        );
        for settled in window.admit(task).await {
            summary = summary + tally(settled);
        }
    }
    drop(walk);
    while let Some(settled) = window.next().await {
        summary = summary + tally(settled);
    }
    tracing::info!(
        "Pulled {} files out of {} and {} folders from '{}'",
        summary.files_pulled,
        summary.files_total(),
        summary.directories,
        remote_root
    );
    let archive_root = top_item
        .and_then(|(_, top)| top.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| mirror.path().to_path_buf());
    Ok((archive_root, summary))
}

fn tally(settled: Result<TransferOutcome, tokio::task::JoinError>) -> Summary {
    match settled {
        Ok(outcome) => match outcome.status() {
            Status::Succeeded => Summary {
                files_pulled: 1,
                bytes_pulled: outcome.bytes,
                ..Default::default()
            },
            Status::Failed => Summary {
                files_failed: 1,
                ..Default::default()
            },
        },
        Err(error) => {
            tracing::warn!("pull task did not complete: {}", error);
            Summary {
                files_failed: 1,
                ..Default::default()
            }
        }
    }
}

async fn pull_one(
    prog_track: &'static progress::Progress,
    service: Arc<dyn RemoteFileService>,
    remote_path: String,
    local_path: PathBuf,
    io_timeout: std::time::Duration,
) -> TransferOutcome {
    let _ops_guard = prog_track.ops.guard();
    let started = tokio::time::Instant::now();
    let res = match tokio::time::timeout(
        io_timeout,
        stream_to_local(service.as_ref(), &remote_path, &local_path),
    )
    .await
    {
        Ok(res) => res,
        Err(_) => Err(Error::DeadlineExceeded {
            elapsed: started.elapsed(),
        }),
    };
    match res {
        Ok(bytes) => {
            prog_track.files_pulled.inc();
            prog_track.bytes_transferred.add(bytes);
            TransferOutcome::succeeded(remote_path, bytes)
        }
        Err(error) => {
            tracing::warn!(
                "Cannot pull '{}' to '{}'. The file will be skipped. Original error: {}",
                remote_path,
                local_path.display(),
                error.full_message()
            );
            // partially written files must not end up in the archive
            if let Err(remove_error) = tokio::fs::remove_file(&local_path).await
                && remove_error.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!("cannot remove {:?}: {}", local_path, remove_error);
            }
            prog_track.files_failed.inc();
            TransferOutcome::failed(remote_path, error)
        }
    }
}

async fn stream_to_local(
    service: &dyn RemoteFileService,
    remote_path: &str,
    local_path: &Path,
) -> Result<u64, Error> {
    let mut reader = service.create_read_stream(remote_path).await?;
    let mut writer = tokio::fs::File::create(local_path)
        .await
        .map_err(|source| Error::Stream {
            path: local_path.display().to_string(),
            source,
        })?;
    let bytes = tokio::io::copy(&mut reader, &mut writer)
        .await
        .map_err(|source| Error::Stream {
            path: remote_path.to_string(),
            source,
        })?;
    writer.shutdown().await.map_err(|source| Error::Stream {
        path: local_path.display().to_string(),
        source,
    })?;
    Ok(bytes)
}
