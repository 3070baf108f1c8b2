use std::sync::{Arc, Mutex};

use anyhow::Result;
use rusqlite::{Connection, Params};
use rusqlite_migration::Migrations;
use serde::de::DeserializeOwned;

use crate::db::DbTransaction;

/// A SQLite database shared between the sync engine and the application.
/// Clones share the same connection, so the sync engine can run on a
/// background thread while the application writes.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn migrate(&self, migrations: &Migrations) -> Result<()> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Failed to acquire lock for migration"))?;

        migrations.to_latest(&mut *conn)?;

        Ok(())
    }

    /// Calls the supplied closure with a database transaction. Commits
    /// if the closure returns Ok, otherwise rolls back.
    pub fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&DbTransaction) -> Result<R>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Failed to acquire lock"))?;

        let txn = conn.transaction()?;
        let result = f(&DbTransaction::new(&txn))?;
        txn.commit()?;

        Ok(result)
    }

    /// Shortcut to run a single typed query in its own transaction.
    pub fn query<T: DeserializeOwned, P: Params>(&self, sql: &str, params: P) -> Result<Vec<T>> {
        self.transaction(|t| t.query(sql, params))
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Ok(Db {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use rusqlite_migration::{Migrations, M};
    use serde::Deserialize;

    use crate::db::Db;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Contact {
        id: i64,
        company_name: Option<String>,
    }

    fn db() -> Result<Db> {
        let db = Db::open_memory()?;
        let migrations = Migrations::new(vec![M::up(
            "CREATE TABLE contacts (id INTEGER PRIMARY KEY, company_name TEXT);",
        )]);
        db.migrate(&migrations)?;
        Ok(db)
    }

    #[test]
    fn transaction_commits_on_ok() -> Result<()> {
        let db = db()?;
        db.transaction(|t| {
            t.connection()
                .execute("INSERT INTO contacts (company_name) VALUES ('Landolfio')", [])?;
            Ok(())
        })?;
        let contacts: Vec<Contact> = db.query("SELECT * FROM contacts", [])?;
        assert_eq!(
            contacts,
            vec![Contact { id: 1, company_name: Some("Landolfio".to_string()) }]
        );
        Ok(())
    }

    #[test]
    fn transaction_rolls_back_on_err() -> Result<()> {
        let db = db()?;
        let result: Result<()> = db.transaction(|t| {
            t.connection()
                .execute("INSERT INTO contacts (company_name) VALUES ('Landolfio')", [])?;
            Err(anyhow::anyhow!("mapping failed"))
        });
        assert!(result.is_err());
        let contacts: Vec<Contact> = db.query("SELECT * FROM contacts", [])?;
        assert!(contacts.is_empty());
        Ok(())
    }
}
