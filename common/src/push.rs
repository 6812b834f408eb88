use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_recursion::async_recursion;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::config::{PushFileOptions, PushFolderOptions, TransferSettings};
use crate::error::Error;
use crate::plan;
use crate::progress;
use crate::service::{self, RemoteFileService};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Summary {
    pub files_pushed: usize,
    pub directories_created: usize,
    pub bytes_pushed: u64,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            files_pushed: self.files_pushed + other.files_pushed,
            directories_created: self.directories_created + other.directories_created,
            bytes_pushed: self.bytes_pushed + other.bytes_pushed,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "files pushed: {}\n\
            directories created: {}\n\
            bytes pushed: {}",
            self.files_pushed,
            self.directories_created,
            bytesize::ByteSize(self.bytes_pushed)
        )
    }
}

/// Payload of a single file push.
#[derive(Debug, Clone)]
pub enum ByteSource {
    InMemory(Vec<u8>),
    LocalFile(PathBuf),
}

impl ByteSource {
    fn describe(&self) -> String {
        match self {
            ByteSource::InMemory(payload) => {
                format!("{} in memory", bytesize::ByteSize(payload.len() as u64))
            }
            ByteSource::LocalFile(path) => format!("{}", path.display()),
        }
    }
}

/// Ensures `remote_dir` and all of its ancestors exist.
///
/// Existing directories are detected by listing them, so calling this for a path that already
/// exists creates nothing. Only a "not found" listing triggers creation of the parent first.
#[async_recursion]
pub async fn remote_mkdirp(service: &dyn RemoteFileService, remote_dir: &str) -> Result<(), Error> {
    if matches!(remote_dir, "" | "." | "/") {
        return Ok(());
    }
    match service.list_directory(remote_dir).await {
        Ok(_) => return Ok(()),
        Err(error) if error.is_not_found() => {
            tracing::trace!("'{}' does not exist yet", remote_dir);
            remote_mkdirp(service, service::dirname(remote_dir)).await?;
        }
        Err(error) => {
            return Err(Error::transfer(
                format!("Cannot list '{remote_dir}'"),
                error,
            ));
        }
    }
    service
        .create_directory(remote_dir)
        .await
        .map_err(|error| Error::transfer(format!("Cannot create '{remote_dir}'"), error))
}

async fn write_remote(
    service: &dyn RemoteFileService,
    source: &ByteSource,
    remote_path: &str,
) -> Result<u64, Error> {
    let stream_error = |source| Error::Stream {
        path: remote_path.to_string(),
        source,
    };
    let mut writer = service.create_write_stream(remote_path).await?;
    let bytes = match source {
        ByteSource::InMemory(payload) => {
            writer.write_all(payload).await.map_err(stream_error)?;
            payload.len() as u64
        }
        ByteSource::LocalFile(path) => {
            let mut reader =
                tokio::fs::File::open(path)
                    .await
                    .map_err(|source| Error::Stream {
                        path: path.display().to_string(),
                        source,
                    })?;
            tokio::io::copy(&mut reader, &mut writer)
                .await
                .map_err(stream_error)?
        }
    };
    // the transfer only counts as done once the remote side acknowledged the close
    writer.shutdown().await.map_err(stream_error)?;
    Ok(bytes)
}

/// Writes a single file, creating its remote parent directories first.
#[instrument(skip(prog_track, service, source, settings))]
pub async fn push_file(
    prog_track: &'static progress::Progress,
    service: &dyn RemoteFileService,
    source: ByteSource,
    remote_path: &str,
    options: &PushFileOptions,
    settings: &TransferSettings,
) -> Result<Summary, Error> {
    if remote_path.ends_with('/') {
        return Err(Error::InvalidArgument(format!(
            "It is expected that remote path points to a file and not to a folder. '{remote_path}' is given instead"
        )));
    }
    let _ops_guard = prog_track.ops.guard();
    let started = tokio::time::Instant::now();
    remote_mkdirp(service, service::dirname(remote_path)).await?;
    let ceiling = std::cmp::max(options.timeout, settings.min_item_timeout);
    let bytes = match tokio::time::timeout(ceiling, write_remote(service, &source, remote_path))
        .await
    {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(error)) => {
            tracing::debug!(
                "pushing '{}' failed: {}",
                remote_path,
                error.full_message()
            );
            return Err(Error::transfer(
                format!(
                    "Could not push '{}' to '{}'",
                    source.describe(),
                    remote_path
                ),
                error,
            ));
        }
        Err(_) => {
            tracing::debug!(
                "pushing '{}' did not finish within {}ms",
                remote_path,
                ceiling.as_millis()
            );
            return Err(Error::DeadlineExceeded {
                elapsed: started.elapsed(),
            });
        }
    };
    prog_track.files_pushed.inc();
    prog_track.bytes_transferred.add(bytes);
    tracing::debug!(
        "Successfully pushed the file payload ({}) to the remote location '{}' in {}ms",
        bytesize::ByteSize(bytes),
        remote_path,
        started.elapsed().as_millis()
    );
    Ok(Summary {
        files_pushed: 1,
        bytes_pushed: bytes,
        ..Default::default()
    })
}

async fn push_one(
    prog_track: &'static progress::Progress,
    service: Arc<dyn RemoteFileService>,
    local_path: PathBuf,
    remote_path: String,
    budget: throttle::Budget,
    min_item_timeout: Duration,
) -> Result<Summary, Error> {
    let _ops_guard = prog_track.ops.guard();
    // the ceiling is taken when the file actually starts, not when it was queued
    let ceiling = budget.item_timeout(min_item_timeout);
    let started = tokio::time::Instant::now();
    let source = ByteSource::LocalFile(local_path);
    let res = match tokio::time::timeout(
        ceiling,
        write_remote(service.as_ref(), &source, &remote_path),
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
            prog_track.files_pushed.inc();
            prog_track.bytes_transferred.add(bytes);
            Ok(Summary {
                files_pushed: 1,
                bytes_pushed: bytes,
                ..Default::default()
            })
        }
        Err(error) => {
            tracing::debug!(
                "pushing '{}' failed after {}ms: {}",
                remote_path,
                started.elapsed().as_millis(),
                error.full_message()
            );
            Err(Error::transfer(
                format!(
                    "Could not push '{}' to '{}'",
                    source.describe(),
                    remote_path
                ),
                error,
            ))
        }
    }
}

fn settle(res: Result<Result<Summary, Error>, tokio::task::JoinError>) -> Result<Summary, Error> {
    res.map_err(|error| Error::transfer("push task did not complete", error))?
}

/// Replaces `dest_root` with the contents of the local folder `source_root`.
///
/// The destination is deleted first and its missing ancestors are created, then every directory
/// is created parents-first, then files are written largest-first, either one at a time or through a bounded window. The whole
/// operation shares one `options.timeout` budget; each file still gets at least
/// `min_item_timeout`. The first failed file aborts the push.
#[instrument(skip(prog_track, service, settings))]
pub async fn push_folder(
    prog_track: &'static progress::Progress,
    service: Arc<dyn RemoteFileService>,
    source_root: &Path,
    dest_root: &str,
    options: &PushFolderOptions,
    settings: &TransferSettings,
) -> Result<Summary, Error> {
    settings.validate().map_err(Error::InvalidArgument)?;
    let dest_root = service::trim_trailing_separators(dest_root);
    let budget = throttle::Budget::start(options.timeout);
    let items = plan::scan_local(source_root)
        .await
        .map_err(|error| Error::transfer(format!("Cannot scan {source_root:?}"), error))?;
    tracing::debug!("Successfully scanned the tree structure of {:?}", source_root);
    let plan = plan::plan(items);
    tracing::debug!(
        "Got {} folders and {} files ({}) to push",
        plan.directories.len(),
        plan.files.len(),
        bytesize::ByteSize(plan.total_bytes())
    );
    if let Err(error) = service.delete_directory(dest_root).await {
        tracing::debug!("'{}' was not deleted: {:#}", dest_root, anyhow::Error::from(error));
    }
    remote_mkdirp(service.as_ref(), service::dirname(dest_root)).await?;
    let mut summary = Summary::default();
    for remote_dir in std::iter::once(dest_root.to_string()).chain(
        plan.directories
            .iter()
            .map(|dir| service::join(dest_root, &dir.relative_path)),
    ) {
        service
            .create_directory(&remote_dir)
            .await
            .map_err(|error| Error::transfer(format!("Cannot create '{remote_dir}'"), error))?;
        summary.directories_created += 1;
        prog_track.directories_created.inc();
    }
    tracing::debug!(
        "Successfully created the remote folder structure ({} items)",
        summary.directories_created
    );
    let jobs = plan.files.iter().map(|file| {
        (
            source_root.join(&file.relative_path),
            service::join(dest_root, &file.relative_path),
        )
    });
    let files_summary = if options.enable_parallel_push {
        push_parallel(prog_track, &service, jobs, budget, settings).await?
    } else {
        push_serial(prog_track, &service, jobs, budget, settings).await?
    };
    summary = summary + files_summary;
    tracing::debug!(
        "Successfully pushed {} folders and {} files within {}ms",
        summary.directories_created,
        summary.files_pushed,
        budget.elapsed().as_millis()
    );
    Ok(summary)
}

async fn push_serial(
    prog_track: &'static progress::Progress,
    service: &Arc<dyn RemoteFileService>,
    jobs: impl ExactSizeIterator<Item = (PathBuf, String)>,
    budget: throttle::Budget,
    settings: &TransferSettings,
) -> Result<Summary, Error> {
    let mut summary = Summary::default();
    let total = jobs.len();
    for (idx, (local_path, remote_path)) in jobs.enumerate() {
        summary = summary
            + push_one(
                prog_track,
                service.clone(),
                local_path,
                remote_path,
                budget,
                settings.min_item_timeout,
            )
            .await?;
        if idx + 1 < total {
            budget.check()?;
        }
    }
    Ok(summary)
}

async fn push_parallel(
    prog_track: &'static progress::Progress,
    service: &Arc<dyn RemoteFileService>,
    jobs: impl Iterator<Item = (PathBuf, String)>,
    budget: throttle::Budget,
    settings: &TransferSettings,
) -> Result<Summary, Error> {
    let mut summary = Summary::default();
    // dropping the window on an early return aborts whatever is still in flight
    let mut window = throttle::Window::new(settings.max_width);
    for (local_path, remote_path) in jobs {
        let settled = window.make_room().await;
        let waited = !settled.is_empty();
        for res in settled {
            summary = summary + settle(res)?;
        }
        if waited {
            budget.check()?;
        }
        window.spawn(push_one(
            prog_track,
            service.clone(),
            local_path,
            remote_path,
            budget,
            settings.min_item_timeout,
        ));
    }
    let ceiling = budget.item_timeout(settings.min_item_timeout);
    let drain = async {
        let mut drained = Summary::default();
        while let Some(res) = window.next().await {
            drained = drained + settle(res)?;
        }
        Ok::<_, Error>(drained)
    };
    match tokio::time::timeout(ceiling, drain).await {
        Ok(drained) => Ok(summary + drained?),
        Err(_) => Err(Error::DeadlineExceeded {
            elapsed: budget.elapsed(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{self, Event, InstrumentedService};
    use tracing_test::traced_test;

    static PROGRESS: std::sync::LazyLock<progress::Progress> =
        std::sync::LazyLock::new(progress::Progress::new);

    async fn device() -> anyhow::Result<(PathBuf, PathBuf)> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let device_root = tmp_dir.join("device");
        tokio::fs::create_dir(&device_root).await?;
        Ok((tmp_dir.join("foo"), device_root))
    }

    #[tokio::test]
    #[traced_test]
    async fn mkdirp_creates_missing_ancestors_once() -> anyhow::Result<()> {
        let (_, device_root) = device().await?;
        let service = InstrumentedService::new(&device_root);
        remote_mkdirp(&service, "a/b/c").await?;
        assert_eq!(service.created_directories(), vec!["a", "a/b", "a/b/c"]);
        remote_mkdirp(&service, "a/b/c").await?;
        remote_mkdirp(&service, "a/b").await?;
        assert_eq!(service.created_directories().len(), 3);
        for root in [".", "/", ""] {
            remote_mkdirp(&service, root).await?;
        }
        assert_eq!(service.created_directories().len(), 3);
        assert!(device_root.join("a/b/c").is_dir());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn push_file_creates_parents() -> anyhow::Result<()> {
        let (_, device_root) = device().await?;
        let service = InstrumentedService::new(&device_root);
        let summary = push_file(
            &PROGRESS,
            &service,
            ByteSource::InMemory(b"payload".to_vec()),
            "Documents/nested/data.bin",
            &Default::default(),
            &Default::default(),
        )
        .await?;
        assert_eq!(summary.files_pushed, 1);
        assert_eq!(summary.bytes_pushed, 7);
        assert_eq!(
            tokio::fs::read(device_root.join("Documents/nested/data.bin")).await?,
            b"payload"
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn push_file_from_local_path() -> anyhow::Result<()> {
        let (source_root, device_root) = device().await?;
        let service = InstrumentedService::new(&device_root);
        push_file(
            &PROGRESS,
            &service,
            ByteSource::LocalFile(source_root.join("bar/3.txt")),
            "/3.txt",
            &Default::default(),
            &Default::default(),
        )
        .await?;
        assert_eq!(
            tokio::fs::read_to_string(device_root.join("3.txt")).await?,
            "3333"
        );
        assert!(service.created_directories().is_empty());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn push_file_rejects_folder_path() -> anyhow::Result<()> {
        let (_, device_root) = device().await?;
        let service = InstrumentedService::new(&device_root);
        let error = push_file(
            &PROGRESS,
            &service,
            ByteSource::InMemory(vec![]),
            "Documents/",
            &Default::default(),
            &Default::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(error, Error::InvalidArgument(_)));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn push_file_write_error_is_reported() -> anyhow::Result<()> {
        let (_, device_root) = device().await?;
        let service = InstrumentedService::new(&device_root).fail_write("x.bin");
        let error = push_file(
            &PROGRESS,
            &service,
            ByteSource::InMemory(b"x".to_vec()),
            "x.bin",
            &Default::default(),
            &Default::default(),
        )
        .await
        .unwrap_err();
        assert!(!error.is_timeout());
        assert!(error.full_message().contains("injected write failure"));
        assert!(logs_contain("pushing 'x.bin' failed: "));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn push_folder_serial_replaces_destination() -> anyhow::Result<()> {
        let (source_root, device_root) = device().await?;
        // stale content must be gone after the push
        tokio::fs::create_dir_all(device_root.join("dst/old")).await?;
        tokio::fs::write(device_root.join("dst/old/stale.txt"), "stale").await?;
        let service: Arc<dyn RemoteFileService> =
            Arc::new(InstrumentedService::new(&device_root));
        let summary = push_folder(
            &PROGRESS,
            service,
            &source_root,
            "dst",
            &Default::default(),
            &Default::default(),
        )
        .await?;
        assert_eq!(
            summary,
            Summary {
                files_pushed: 6,
                directories_created: 3,
                bytes_pushed: 21,
            }
        );
        assert!(!device_root.join("dst/old").exists());
        assert_eq!(
            tokio::fs::read_to_string(device_root.join("dst/baz/5.txt")).await?,
            "555555"
        );
        assert_eq!(
            tokio::fs::read_to_string(device_root.join("dst/0.txt")).await?,
            "0"
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn destination_trailing_separator_is_trimmed() -> anyhow::Result<()> {
        let (source_root, device_root) = device().await?;
        let service = Arc::new(InstrumentedService::new(&device_root));
        let summary = push_folder(
            &PROGRESS,
            service.clone(),
            &source_root,
            "dst/",
            &Default::default(),
            &Default::default(),
        )
        .await?;
        assert_eq!(summary.files_pushed, 6);
        let mut created = service.created_directories();
        // siblings come in scan order
        created[1..].sort();
        assert_eq!(created, vec!["dst", "dst/bar", "dst/baz"]);
        assert_eq!(
            tokio::fs::read_to_string(device_root.join("dst/bar/2.txt")).await?,
            "222"
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn parallel_push_creates_dirs_first_and_respects_width() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let source_root = tmp_dir.join("src");
        tokio::fs::create_dir_all(source_root.join("d1/d2")).await?;
        for (idx, name) in ["a", "d1/b", "d1/c", "d1/d2/d", "d1/d2/e"].iter().enumerate() {
            tokio::fs::write(source_root.join(name), "x".repeat(idx + 1)).await?;
        }
        let device_root = tmp_dir.join("device");
        tokio::fs::create_dir(&device_root).await?;
        let service = Arc::new(
            InstrumentedService::new(&device_root).with_write_delay(Duration::from_millis(50)),
        );
        let summary = push_folder(
            &PROGRESS,
            service.clone(),
            &source_root,
            "app",
            &PushFolderOptions {
                enable_parallel_push: true,
                ..Default::default()
            },
            &TransferSettings {
                max_width: 2,
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(summary.files_pushed, 5);
        assert_eq!(summary.directories_created, 3);
        assert_eq!(service.created_directories(), vec!["app", "app/d1", "app/d1/d2"]);
        let events = service.events();
        let first_write = events
            .iter()
            .position(|event| matches!(event, Event::WriteOpened(_)))
            .unwrap();
        let last_dir = events
            .iter()
            .rposition(|event| matches!(event, Event::CreateDirectory(_)))
            .unwrap();
        assert!(last_dir < first_write);
        assert_eq!(service.peak_writes(), 2);
        // largest file goes first
        assert_eq!(events[first_write], Event::WriteOpened("app/d1/d2/e".to_string()));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn failing_file_aborts_push() -> anyhow::Result<()> {
        for enable_parallel_push in [false, true] {
            let (source_root, device_root) = device().await?;
            let service: Arc<dyn RemoteFileService> =
                Arc::new(InstrumentedService::new(&device_root).fail_write("dst/bar/2.txt"));
            let error = push_folder(
                &PROGRESS,
                service,
                &source_root,
                "dst",
                &PushFolderOptions {
                    enable_parallel_push,
                    ..Default::default()
                },
                &Default::default(),
            )
            .await
            .unwrap_err();
            let message = error.to_string();
            assert!(message.contains("bar/2.txt"), "{message}");
            assert!(!error.is_timeout());
            assert!(logs_contain("pushing 'dst/bar/2.txt' failed"));
        }
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn exhausted_budget_stops_serial_push() -> anyhow::Result<()> {
        let (source_root, device_root) = device().await?;
        let service: Arc<dyn RemoteFileService> = Arc::new(
            InstrumentedService::new(&device_root).with_write_delay(Duration::from_millis(100)),
        );
        let error = push_folder(
            &PROGRESS,
            service,
            &source_root,
            "dst",
            &PushFolderOptions {
                timeout: Duration::from_millis(50),
                enable_parallel_push: false,
            },
            &Default::default(),
        )
        .await
        .unwrap_err();
        assert!(error.is_timeout());
        assert!(error.to_string().starts_with("Timed out after"));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn exhausted_budget_stops_parallel_push() -> anyhow::Result<()> {
        let (source_root, device_root) = device().await?;
        let service: Arc<dyn RemoteFileService> = Arc::new(
            InstrumentedService::new(&device_root).with_write_delay(Duration::from_millis(100)),
        );
        let error = push_folder(
            &PROGRESS,
            service,
            &source_root,
            "dst",
            &PushFolderOptions {
                timeout: Duration::from_millis(50),
                enable_parallel_push: true,
            },
            &TransferSettings {
                max_width: 2,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(error.is_timeout());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn single_file_within_floor_succeeds_despite_tiny_budget() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let source_root = tmp_dir.join("src");
        tokio::fs::create_dir(&source_root).await?;
        tokio::fs::write(source_root.join("only.txt"), "only").await?;
        let device_root = tmp_dir.join("device");
        tokio::fs::create_dir(&device_root).await?;
        let service: Arc<dyn RemoteFileService> = Arc::new(
            InstrumentedService::new(&device_root).with_write_delay(Duration::from_millis(100)),
        );
        let summary = push_folder(
            &PROGRESS,
            service,
            &source_root,
            "dst",
            &PushFolderOptions {
                timeout: Duration::from_millis(10),
                enable_parallel_push: false,
            },
            &Default::default(),
        )
        .await?;
        assert_eq!(summary.files_pushed, 1);
        Ok(())
    }
}
