mod builder;
mod encrypted_storage;
mod local_storage;
mod memory_storage;
mod s3_storage;
mod sync_storage;

pub use builder::StorageBuilder;
pub use encrypted_storage::EncryptedStorage;
pub use local_storage::LocalStorage;
pub use memory_storage::InMemoryStorage;
pub use s3_storage::S3Storage;
pub use sync_storage::{ArcStorage, SyncStorage};
