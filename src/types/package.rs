//! Package metadata consumed when minting a service.

use alloy::primitives::{B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt::Debug};

/// Metadata of a deployable service package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    /// Agent id declared by the package.
    pub agent_id: u32,
    /// Number of agent slots of the service.
    pub num_slots: u32,
    /// Declared bond per agent instance.
    pub cost_of_bond: U256,
    /// Config hash recorded in the registry, derived from the IPFS metadata hash.
    pub config_hash: B256,
}

/// Resolves package metadata by content hash.
#[async_trait]
pub trait PackageMetadataProvider: Debug + Send + Sync {
    /// Returns the metadata of the package with the given content hash.
    async fn metadata(&self, hash: &str) -> eyre::Result<PackageMetadata>;
}

/// [`PackageMetadataProvider`] backed by a fixed table, typically loaded from the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticPackageMetadata {
    packages: HashMap<String, PackageMetadata>,
}

impl StaticPackageMetadata {
    /// Adds a package to the table.
    pub fn with_package(mut self, hash: impl Into<String>, metadata: PackageMetadata) -> Self {
        self.packages.insert(hash.into(), metadata);
        self
    }
}

#[async_trait]
impl PackageMetadataProvider for StaticPackageMetadata {
    async fn metadata(&self, hash: &str) -> eyre::Result<PackageMetadata> {
        self.packages
            .get(hash)
            .cloned()
            .ok_or_else(|| eyre::eyre!("no metadata for package {hash}"))
    }
}
