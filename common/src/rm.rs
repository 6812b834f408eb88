use tracing::instrument;

use crate::error::Error;
use crate::service::RemoteFileService;

/// Removes a remote file or directory tree.
#[instrument(skip(service))]
pub async fn delete_path(service: &dyn RemoteFileService, remote_path: &str) -> Result<(), Error> {
    match service.delete_directory(remote_path).await {
        Ok(()) => {
            tracing::debug!("removed '{}'", remote_path);
            Ok(())
        }
        Err(error) if error.is_not_found() => Err(Error::NotFound {
            path: remote_path.to_string(),
        }),
        Err(error) => Err(Error::transfer(
            format!("Cannot delete '{remote_path}'"),
            error,
        )),
    }
}

/// Removes a single remote file; paths ending with `/` are refused.
pub async fn delete_file(service: &dyn RemoteFileService, remote_path: &str) -> Result<(), Error> {
    if remote_path.ends_with('/') {
        return Err(Error::InvalidArgument(format!(
            "It is expected that remote path points to a file and not to a folder. '{remote_path}' is given instead"
        )));
    }
    delete_path(service, remote_path).await
}

/// Removes a remote directory tree.
pub async fn delete_folder(service: &dyn RemoteFileService, remote_path: &str) -> Result<(), Error> {
    let remote_path = if remote_path.ends_with('/') {
        remote_path.to_string()
    } else {
        format!("{remote_path}/")
    };
    delete_path(service, &remote_path).await
}
