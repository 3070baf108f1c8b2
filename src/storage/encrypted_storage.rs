use std::sync::Arc;

use age::secrecy::SecretString;
use anyhow::Result;

use super::{ArcStorage, SyncStorage};

/// Encrypts content with an age passphrase before handing it to the inner
/// storage. Paths are stored in plaintext.
#[derive(Clone)]
pub struct EncryptedStorage {
    inner: ArcStorage,
    passphrase: SecretString,
}

impl EncryptedStorage {
    pub fn new(inner: Arc<dyn SyncStorage>, passphrase: &str) -> Self {
        Self {
            inner: ArcStorage::new(inner),
            passphrase: SecretString::from(passphrase.to_string()),
        }
    }

    fn encrypt_bytes(&self, data: &[u8]) -> Result<Vec<u8>> {
        let recipient = age::scrypt::Recipient::new(self.passphrase.clone());
        Ok(age::encrypt(&recipient, data)?)
    }

    fn decrypt_bytes(&self, encrypted: &[u8]) -> Result<Vec<u8>> {
        let identity = age::scrypt::Identity::new(self.passphrase.clone());
        Ok(age::decrypt(&identity, encrypted)?)
    }
}

impl SyncStorage for EncryptedStorage {
    fn exists(&self, path: &str) -> Result<bool> {
        self.inner.exists(path)
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        log::debug!("ENCRYPTED STORAGE GET: path='{}'", path);
        let encrypted_content = self.inner.get(path)?;
        self.decrypt_bytes(&encrypted_content)
    }

    fn put(&self, path: &str, content: &[u8]) -> Result<()> {
        log::debug!(
            "ENCRYPTED STORAGE PUT: path='{}', size={} bytes",
            path,
            content.len()
        );
        let encrypted_content = self.encrypt_bytes(content)?;
        self.inner.put(path, &encrypted_content)
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.inner.delete(path)
    }
}
