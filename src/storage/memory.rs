//! Service storage implementation in-memory.

use super::{ServiceStore, api::Result};
use crate::{error::StorageError, types::Service};
use async_trait::async_trait;
use dashmap::DashMap;

/// [`ServiceStore`] implementation in-memory. Used for testing and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    services: DashMap<String, Service>,
}

#[async_trait]
impl ServiceStore for InMemoryStorage {
    async fn read_service(&self, hash: &str) -> Result<Service> {
        self.services
            .get(hash)
            .map(|service| service.clone())
            .ok_or_else(|| StorageError::NotFound(hash.to_string()))
    }

    async fn write_service(&self, service: &Service) -> Result<()> {
        self.services.insert(service.hash.clone(), service.clone());
        Ok(())
    }

    async fn services(&self) -> Result<Vec<String>> {
        let mut hashes: Vec<_> = self.services.iter().map(|entry| entry.key().clone()).collect();
        hashes.sort();
        Ok(hashes)
    }
}
