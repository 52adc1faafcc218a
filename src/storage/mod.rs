//! Service storage

mod api;
pub use api::ServiceStore;
mod file;
pub use file::FileStorage;
mod memory;
pub use memory::InMemoryStorage;

use crate::types::Service;
use async_trait::async_trait;
use std::{path::PathBuf, sync::Arc};

/// Service storage interface.
#[derive(Debug, Clone)]
pub struct OperatorStorage {
    inner: Arc<dyn ServiceStore>,
}

impl OperatorStorage {
    /// Create [`OperatorStorage`] with a in-memory backend. Used for testing and dry runs.
    pub fn in_memory() -> Self {
        Self { inner: Arc::new(InMemoryStorage::default()) }
    }

    /// Create [`OperatorStorage`] keeping service records under `root`.
    pub fn file(root: impl Into<PathBuf>) -> Self {
        Self { inner: Arc::new(FileStorage::new(root)) }
    }
}

#[async_trait]
impl ServiceStore for OperatorStorage {
    async fn read_service(&self, hash: &str) -> api::Result<Service> {
        self.inner.read_service(hash).await
    }

    async fn write_service(&self, service: &Service) -> api::Result<()> {
        self.inner.write_service(service).await
    }

    async fn services(&self) -> api::Result<Vec<String>> {
        self.inner.services().await
    }
}
