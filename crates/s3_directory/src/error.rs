use thiserror::Error;

/// A small, closed set of error kinds a caller in the consuming search engine can match on and
/// react to differently (e.g. retry `Transport`, but never retry `InvalidState`).
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// A remote `head`/`get` (or a local lookup) was made for a name that isn't in any local
    /// state and doesn't exist remotely.
    #[error("file not found: {0}")]
    NotFound(String),

    /// A network failure talking to the object store, possibly after the versioned-retry path
    /// was already exhausted.
    #[error("transport error")]
    Transport(#[source] anyhow::Error),

    /// A filesystem failure on the local cache directory.
    #[error("local I/O error")]
    LocalIO(#[source] std::io::Error),

    /// The caller did something the directory contract forbids: an operation on a closed
    /// directory, a write to a name that was never opened for output, a rename of a name with an
    /// open writer, etc.
    #[error("invalid directory state: {0}")]
    InvalidState(String),

    /// A range GET returned a different number of bytes than requested. The affected block is
    /// never marked present when this happens.
    #[error("consistency error: expected {expected} bytes, got {actual}")]
    Consistency { expected: u64, actual: u64 },
}

impl From<object_store::DownloadError> for DirectoryError {
    fn from(e: object_store::DownloadError) -> Self {
        match e {
            object_store::DownloadError::NotFound => DirectoryError::NotFound(String::new()),
            object_store::DownloadError::ByteCountMismatch { expected, actual } => {
                DirectoryError::Consistency { expected, actual }
            }
            object_store::DownloadError::Cancelled => {
                DirectoryError::Transport(anyhow::anyhow!("request cancelled"))
            }
            object_store::DownloadError::Other(e) => DirectoryError::Transport(e),
        }
    }
}

impl From<std::io::Error> for DirectoryError {
    fn from(e: std::io::Error) -> Self {
        DirectoryError::LocalIO(e)
    }
}

impl From<anyhow::Error> for DirectoryError {
    fn from(e: anyhow::Error) -> Self {
        DirectoryError::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, DirectoryError>;
