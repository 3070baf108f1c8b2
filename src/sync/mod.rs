mod applier;
mod changes;
mod config;
mod periodic;
mod push;
mod sync_engine;

pub use applier::{apply_diff, ApplyReport};
pub use changes::{get_administration_changes, AdministrationChanges, Tag};
pub use config::{SyncConfig, ThrottlePolicy};
pub use periodic::PeriodicSync;
pub use push::{delete_line, delete_resource, push_line, push_resource};
pub use sync_engine::{SyncEngine, SyncEngineBuilder, SyncEvent, SyncOutcome, SyncReport};
