//! Service storage implementation on the filesystem.

use super::{ServiceStore, api::Result};
use crate::{error::StorageError, types::Service};
use async_trait::async_trait;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::sync::Mutex;
use tracing::trace;

/// Name of the record file inside a service directory.
const SERVICE_FILE: &str = "config.json";

/// [`ServiceStore`] keeping one directory per service, named by its hash, holding the JSON
/// snapshot of the record.
///
/// Writes go to a temporary file first and are renamed into place, so a crash never leaves a
/// partially written record behind.
#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    /// Creates a storage rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), lock: Mutex::new(()) }
    }

    /// Directory holding the services.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn service_path(&self, hash: &str) -> Result<PathBuf> {
        if hash.is_empty() || hash.contains(['/', '\\']) || hash.starts_with('.') {
            return Err(StorageError::InternalError(eyre::eyre!("invalid service hash {hash:?}")));
        }
        Ok(self.root.join(hash).join(SERVICE_FILE))
    }
}

#[async_trait]
impl ServiceStore for FileStorage {
    async fn read_service(&self, hash: &str) -> Result<Service> {
        let path = self.service_path(hash)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(hash.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn write_service(&self, service: &Service) -> Result<()> {
        let path = self.service_path(&service.hash)?;
        let json = serde_json::to_vec_pretty(service)?;

        let _guard = self.lock.lock().await;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        trace!(hash = %service.hash, path = %path.display(), "service record written");
        Ok(())
    }

    async fn services(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut hashes = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if tokio::fs::try_exists(entry.path().join(SERVICE_FILE)).await? {
                hashes.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        hashes.sort();
        Ok(hashes)
    }
}
