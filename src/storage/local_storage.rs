use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Result;

use super::SyncStorage;

/// Stores each path as a file below `base_path`.
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        if path.split('/').any(|part| part == "..") || Path::new(path).is_absolute() {
            return Err(anyhow::anyhow!("Invalid storage path: {}", path));
        }
        Ok(self.base_path.join(path))
    }
}

impl SyncStorage for LocalStorage {
    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.full_path(path)?.is_file())
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        log::debug!("STORAGE GET: path='{}'", path);
        let content = fs::read(self.full_path(path)?)?;
        log::debug!("STORAGE GET RESULT: {} bytes", content.len());
        Ok(content)
    }

    fn put(&self, path: &str, content: &[u8]) -> Result<()> {
        log::debug!("STORAGE PUT: path='{}', size={} bytes", path, content.len());
        let full_path = self.full_path(path)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(full_path, content)?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        log::debug!("STORAGE DELETE: path='{}'", path);
        let full_path = self.full_path(path)?;
        if full_path.is_file() {
            fs::remove_file(full_path)?;
        }
        Ok(())
    }
}
