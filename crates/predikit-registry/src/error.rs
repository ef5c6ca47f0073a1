//! Cache error type.

/// Errors raised while materializing prediction resources.
///
/// The type is `Clone` so a failure observed by the downloading thread can
/// be handed to every caller waiting on the same resource.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The resource could not be downloaded.
    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },
    /// The downloaded bytes do not match the declared checksum.
    #[error("checksum mismatch for {name}: expected {expected}, got {actual}")]
    Integrity {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("i/o error: {0}")]
    Io(String),
    /// The resource name would escape the cache directory.
    #[error("invalid resource name: {0}")]
    InvalidPath(String),
    /// No per-user cache directory could be determined.
    #[error("no cache directory available on this platform")]
    CacheDirUnavailable,
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Io(e.to_string())
    }
}
