//! Staging of application bundles before installation
//!
//! A bundle packaged as a single file is pushed to the service root as `/<file name>`. An
//! unpacked bundle directory is pushed in parallel to `<staging root>/<bundle id>`. The staging
//! root may be shared by concurrent installations and is removed when the last holder releases it.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing::instrument;

use crate::config::{PushFileOptions, PushFolderOptions, TransferSettings};
use crate::error::Error;
use crate::progress;
use crate::push::{self, ByteSource};
use crate::service::{self, RemoteFileService};

pub const INSTALLATION_STAGING_DIR: &str = "PublicStaging";

#[derive(Debug)]
struct SharedRootInner {
    path: String,
    holders: AtomicUsize,
}

/// Ref-counted handle to a remote directory shared by concurrent operations.
///
/// Use [`SharedRoot::share`] for every additional holder and [`SharedRoot::release`] once a
/// holder is done; a handle dropped without being released keeps the directory alive.
#[derive(Debug)]
pub struct SharedRoot {
    inner: Arc<SharedRootInner>,
}

impl SharedRoot {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SharedRootInner {
                path: path.into(),
                holders: AtomicUsize::new(1),
            }),
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    #[must_use]
    pub fn holders(&self) -> usize {
        self.inner.holders.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn share(&self) -> Self {
        self.inner.holders.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: self.inner.clone(),
        }
    }

    /// Releases this holder; the last one deletes the remote directory.
    ///
    /// Returns whether the directory was removed.
    pub async fn release(self, service: &dyn RemoteFileService) -> Result<bool, Error> {
        if self.inner.holders.fetch_sub(1, Ordering::AcqRel) != 1 {
            return Ok(false);
        }
        match service.delete_directory(&self.inner.path).await {
            Ok(()) => Ok(true),
            Err(error) if error.is_not_found() => Ok(true),
            Err(error) => Err(Error::transfer(
                format!("Cannot remove '{}'", self.inner.path),
                error,
            )),
        }
    }
}

/// Pushes an application bundle to where the installer expects it, returns its remote path.
#[instrument(skip(prog_track, service, staging, settings))]
pub async fn stage_bundle(
    prog_track: &'static progress::Progress,
    service: Arc<dyn RemoteFileService>,
    app_path: &Path,
    bundle_id: &str,
    staging: &SharedRoot,
    timeout: Duration,
    settings: &TransferSettings,
) -> Result<String, Error> {
    let started = tokio::time::Instant::now();
    let metadata = tokio::fs::metadata(app_path)
        .await
        .map_err(|source| Error::Stream {
            path: app_path.display().to_string(),
            source,
        })?;
    let res = if metadata.is_dir() {
        let remote_path = service::join(staging.path(), bundle_id);
        tracing::debug!("pushing the bundle folder to '{}'", remote_path);
        push::push_folder(
            prog_track,
            service.clone(),
            app_path,
            &remote_path,
            &PushFolderOptions {
                timeout,
                enable_parallel_push: true,
            },
            settings,
        )
        .await
        .map(|_| remote_path)
    } else {
        let file_name = app_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                Error::InvalidArgument(format!("{app_path:?} does not name a bundle"))
            })?;
        let remote_path = format!("/{file_name}");
        push::push_file(
            prog_track,
            service.as_ref(),
            ByteSource::LocalFile(app_path.to_path_buf()),
            &remote_path,
            &PushFileOptions { timeout },
            settings,
        )
        .await
        .map(|_| remote_path)
    };
    match res {
        Ok(remote_path) => {
            tracing::info!(
                "The application bundle {} has been staged at '{}' in {}ms",
                bundle_id,
                remote_path,
                started.elapsed().as_millis()
            );
            Ok(remote_path)
        }
        Err(error) => {
            let mut context = format!("Cannot install the {bundle_id} application");
            if error.is_timeout() {
                context.push_str(&format!(
                    ". Consider increasing the value of the push timeout (currently {}ms)",
                    timeout.as_millis()
                ));
            }
            Err(Error::transfer(context, error))
        }
    }
}
