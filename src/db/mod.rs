pub use self::core::Db;
pub use transaction::{DbTransaction, Scope};
pub use types::{Fields, LocalRecord};

pub mod core;
pub mod transaction;
pub mod types;
