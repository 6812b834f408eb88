//! Remote paths addressing an application's container
//!
//! `@<bundle-id>[:<container-type>]/<path>` selects the container of an installed application
//! instead of the device's media root. The `documents` container type is served with a
//! `Documents/` prefix.

use crate::error::Error;

pub const CONTAINER_PATH_MARKER: char = '@';
pub const CONTAINER_TYPE_SEPARATOR: char = ':';
pub const CONTAINER_DOCUMENTS_PATH: &str = "Documents";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPath {
    pub bundle_id: String,
    pub container_type: Option<String>,
    /// Path inside the container, may be empty
    pub path_in_container: String,
}

impl ContainerPath {
    #[must_use]
    pub fn is_container_path(remote_path: &str) -> bool {
        remote_path
            .strip_prefix(CONTAINER_PATH_MARKER)
            .and_then(|rest| rest.split_once('/'))
            .is_some_and(|(bundle, _)| !bundle.is_empty())
    }

    pub fn parse(remote_path: &str) -> Result<Self, Error> {
        let invalid = || {
            Error::InvalidArgument(format!(
                "It is expected that package identifier is separated from the relative path with a single slash. '{remote_path}' is given instead"
            ))
        };
        let rest = remote_path
            .strip_prefix(CONTAINER_PATH_MARKER)
            .ok_or_else(invalid)?;
        let (bundle, path_in_container) = rest.split_once('/').ok_or_else(invalid)?;
        if bundle.is_empty() {
            return Err(invalid());
        }
        let (bundle_id, container_type) = match bundle.find(CONTAINER_TYPE_SEPARATOR) {
            Some(pos) if pos > 0 => {
                let kind = &bundle[pos + 1..];
                (
                    bundle[..pos].to_string(),
                    (!kind.is_empty()).then(|| kind.to_lowercase()),
                )
            }
            _ => (bundle.to_string(), None),
        };
        Ok(Self {
            bundle_id,
            container_type,
            path_in_container: path_in_container.to_string(),
        })
    }

    #[must_use]
    pub fn is_documents(&self) -> bool {
        self.container_type.as_deref() == Some("documents")
    }

    /// Path relative to the root of the container service, always absolute.
    #[must_use]
    pub fn service_path(&self) -> String {
        let relative = self.path_in_container.trim_start_matches('/');
        if self.is_documents() {
            format!("/{CONTAINER_DOCUMENTS_PATH}/{relative}")
        } else {
            format!("/{relative}")
        }
    }

    /// Resolves the path inside the container against `root`, refusing anything that escapes it.
    pub fn resolve_under(&self, root: &str) -> Result<String, Error> {
        let resolved = normalize(root, &self.path_in_container);
        verify_is_sub_path(&resolved, root)?;
        Ok(resolved)
    }
}

fn normalize(root: &str, relative: &str) -> String {
    let mut segments: Vec<&str> = vec![];
    let base = if relative.starts_with('/') { "" } else { root };
    for segment in base.split('/').chain(relative.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    format!("/{}", segments.join("/"))
}

pub fn verify_is_sub_path(path: &str, root: &str) -> Result<(), Error> {
    let root = normalize(root, "");
    let prefix = if root == "/" {
        root.clone()
    } else {
        format!("{root}/")
    };
    if path == root || path.starts_with(&prefix) {
        return Ok(());
    }
    Err(Error::InvalidArgument(format!(
        "'{path}' is expected to be a subpath of '{root}'"
    )))
}
