use std::sync::Arc;

use anyhow::Result;

/// Blob storage for the sync tag. Paths are `/`-separated keys such as
/// `accounting/sync_database/tag`.
pub trait SyncStorage: Send + Sync {
    fn exists(&self, path: &str) -> Result<bool>;
    /// Fails if nothing is stored at `path`.
    fn get(&self, path: &str) -> Result<Vec<u8>>;
    fn put(&self, path: &str, content: &[u8]) -> Result<()>;
    /// Removing a missing path is not an error.
    fn delete(&self, path: &str) -> Result<()>;
}

// Lets an Arc<dyn SyncStorage> be passed where a SyncStorage is expected
#[derive(Clone)]
pub struct ArcStorage {
    inner: Arc<dyn SyncStorage>,
}

impl ArcStorage {
    pub fn new(target: Arc<dyn SyncStorage>) -> Self {
        Self { inner: target }
    }
}

impl SyncStorage for ArcStorage {
    fn exists(&self, path: &str) -> Result<bool> {
        self.inner.exists(path)
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.get(path)
    }

    fn put(&self, path: &str, content: &[u8]) -> Result<()> {
        self.inner.put(path, content)
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.inner.delete(path)
    }
}
