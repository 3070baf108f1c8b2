use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use anyhow::Result;

use super::SyncStorage;

/// Process-local storage. Clones share the same contents.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self
            .data
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock"))?
            .len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl SyncStorage for InMemoryStorage {
    fn exists(&self, path: &str) -> Result<bool> {
        let data = self
            .data
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock"))?;
        Ok(data.contains_key(path))
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        log::debug!("STORAGE GET: path='{}'", path);
        let data = self
            .data
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock"))?;
        let content = data
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Path not found: {}", path))?;
        log::debug!("STORAGE GET RESULT: {} bytes", content.len());
        Ok(content)
    }

    fn put(&self, path: &str, content: &[u8]) -> Result<()> {
        log::debug!("STORAGE PUT: path='{}', size={} bytes", path, content.len());
        let mut data = self
            .data
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock"))?;
        data.insert(path.to_string(), content.to_vec());
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        log::debug!("STORAGE DELETE: path='{}'", path);
        let mut data = self
            .data
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock"))?;
        data.remove(path);
        Ok(())
    }
}
