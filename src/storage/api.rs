//! Service storage api.

use crate::{error::StorageError, types::Service};
use async_trait::async_trait;
use std::fmt::Debug;

/// Type alias for `Result<T, StorageError>`
pub type Result<T> = core::result::Result<T, StorageError>;

/// Storage of service records.
#[async_trait]
pub trait ServiceStore: Debug + Send + Sync {
    /// Reads a [`Service`] by its hash.
    async fn read_service(&self, hash: &str) -> Result<Service>;

    /// Writes a [`Service`], replacing the previous record with the same hash.
    async fn write_service(&self, service: &Service) -> Result<()>;

    /// Returns the hashes of all stored services.
    async fn services(&self) -> Result<Vec<String>>;
}
