use std::time::Duration;

use crate::service::ServiceError;

/// Error type shared by the pull and push engines.
///
/// # Logging Convention
/// Each variant only displays its own message, the causes are reachable through
/// [`std::error::Error::source`]. Log with [`Error::full_message`] (or `{:#}` once converted into
/// `anyhow::Error`) to print the whole chain:
/// ```ignore
/// tracing::error!("push failed: {}", error.full_message());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Path '{path}' does not exist on the device")]
    NotFound { path: String },
    #[error("streaming '{path}' failed")]
    Stream {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Timed out after {} ms", .elapsed.as_millis())]
    DeadlineExceeded { elapsed: Duration },
    #[error("{context}")]
    Transfer {
        context: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{0}")]
    InvalidArgument(String),
}

impl Error {
    /// Wraps `source`, keeping it reachable through the error chain.
    pub fn transfer(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Error::Transfer {
            context: context.into(),
            source: source.into(),
        }
    }

    /// This error followed by all of its causes, rendered like `anyhow`'s `{:#}`.
    #[must_use]
    pub fn full_message(&self) -> String {
        let mut message = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(error) = cause {
            message.push_str(": ");
            message.push_str(&error.to_string());
            cause = error.source();
        }
        message
    }

    /// Whether this error, or anything in its cause chain, is a deadline expiry.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::DeadlineExceeded { .. } => true,
            Error::Transfer { source, .. } => source.chain().any(|cause| {
                cause.is::<throttle::DeadlineExceeded>()
                    || matches!(
                        cause.downcast_ref::<Error>(),
                        Some(Error::DeadlineExceeded { .. })
                    )
            }),
            _ => false,
        }
    }
}

impl From<throttle::DeadlineExceeded> for Error {
    fn from(error: throttle::DeadlineExceeded) -> Self {
        Error::DeadlineExceeded {
            elapsed: error.elapsed,
        }
    }
}

impl From<ServiceError> for Error {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::NotFound { path } => Error::NotFound { path },
            other => Error::transfer("remote file service call failed", other),
        }
    }
}
