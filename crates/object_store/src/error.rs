use thiserror::Error;

/// Errors surfaced by [`crate::ObjectStore`] methods: a small, closed set of variants the caller
/// can match on, with an open `Other` bucket for everything transport-layer.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The requested key (or version of it) does not exist.
    #[error("object not found")]
    NotFound,

    /// The request was cancelled via the passed-in `CancellationToken`.
    #[error("request cancelled")]
    Cancelled,

    /// A range GET returned a different number of bytes than requested. Callers must not mark
    /// the affected block present on this error.
    #[error("expected {expected} bytes, got {actual}")]
    ByteCountMismatch { expected: u64, actual: u64 },

    /// Any other transport- or backend-level failure.
    #[error("object store request failed")]
    Other(#[source] anyhow::Error),
}

impl From<anyhow::Error> for DownloadError {
    fn from(e: anyhow::Error) -> Self {
        DownloadError::Other(e)
    }
}

/// A marker type for errors that originated from a timeout or an explicit cancellation, so
/// callers can tell "the op didn't necessarily fail" apart from "the op definitely failed".
#[derive(Debug, Error)]
#[error("timed out or was cancelled")]
pub struct TimeoutOrCancel;
