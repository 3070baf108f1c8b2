use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use super::{EncryptedStorage, InMemoryStorage, LocalStorage, S3Storage, SyncStorage};

/// Picks a backend for the sync tag and optionally wraps it in encryption.
#[derive(Default)]
pub struct StorageBuilder {
    storage: Option<Arc<dyn SyncStorage>>,
    passphrase: Option<String>,
}

impl StorageBuilder {
    pub fn in_memory(mut self) -> Self {
        self.storage = Some(Arc::new(InMemoryStorage::new()));
        self
    }

    pub fn local<P: AsRef<Path>>(mut self, base_path: P) -> Self {
        self.storage = Some(Arc::new(LocalStorage::new(base_path)));
        self
    }

    pub fn s3(
        mut self,
        endpoint: &str,
        bucket_name: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        prefix: &str,
    ) -> Result<Self> {
        self.storage = Some(Arc::new(S3Storage::new(
            endpoint,
            bucket_name,
            region,
            access_key,
            secret_key,
            prefix,
        )?));
        Ok(self)
    }

    pub fn storage(mut self, storage: Arc<dyn SyncStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// `None` leaves the content unencrypted, which makes it easy to pass
    /// `SyncConfig::passphrase` straight through.
    pub fn encrypted(mut self, passphrase: Option<&str>) -> Self {
        self.passphrase = passphrase.map(str::to_string);
        self
    }

    pub fn build(self) -> Result<Arc<dyn SyncStorage>> {
        let storage = self
            .storage
            .ok_or_else(|| anyhow::anyhow!("No storage backend selected"))?;
        Ok(match self.passphrase {
            Some(passphrase) => Arc::new(EncryptedStorage::new(storage, &passphrase)),
            None => storage,
        })
    }
}
