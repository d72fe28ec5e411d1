use thiserror::Error;

/// Failure while reading an object from blob storage. The OCR resolver folds
/// every variant into "not found"; the distinction only matters for logs.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob {0} not found")]
    NotFound(String),

    #[error("blob {path} returned status {status}")]
    Status { path: String, status: u16 },

    #[error("transport error fetching {path}: {message}")]
    Transport { path: String, message: String },

    #[error("failed to read blob {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid blob path {0:?}")]
    InvalidPath(String),
}

/// Returned when a locate run was superseded before it could publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("highlight computation was cancelled")]
pub struct Cancelled;
