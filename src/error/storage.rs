/// Errors returned by [`ServiceStore`](crate::storage::ServiceStore).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No service is stored under the hash.
    #[error("service {0} not found")]
    NotFound(String),
    /// A (de)serialization error occurred.
    #[error("a serialization error occurred")]
    SerdeError(#[from] serde_json::Error),
    /// Reading or writing the backing file failed.
    #[error("an io error occurred")]
    Io(#[from] std::io::Error),
    /// An internal error occurred.
    #[error("an internal error occurred")]
    InternalError(#[from] eyre::Error),
}
