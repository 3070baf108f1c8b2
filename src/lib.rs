pub mod accounting;
pub mod administration;
pub mod db;
pub mod error;
pub mod notifier;
pub mod registry;
pub mod resource;
pub mod resource_type;
pub mod storage;
pub mod sync;
pub mod webhooks;

pub use administration::{Administration, HttpsAdministration, MockAdministration};
pub use db::Db;
pub use error::{AdministrationError, WebhookError};
pub use registry::Registry;
pub use resource_type::ResourceType;
pub use sync::{SyncConfig, SyncEngine, SyncOutcome};
pub use rusqlite;
pub use rusqlite_migration;
pub use serde_rusqlite;
