//! Connection management and the transactional unit of work.
//!
//! One SQLite connection behind a mutex serves the whole process. Every
//! mutation goes through [`Store::with_tx`]; a closure error rolls the
//! whole transaction back, so a logical event commits atomically or not
//! at all.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};

use crate::error::{Error, Result};
use crate::schema;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Database(format!("creating {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("opening {}: {e}", db_path.display())))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "busy_timeout", 5_000)?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Read-only access. Prefer [`Store::with_tx`] for anything that writes.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// The transactional unit of work: commits when the closure returns
    /// `Ok`, rolls back on `Err`.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Unit of work for callers whose closures produce domain errors
    /// (correlation, state dispatch). Rollback semantics are identical to
    /// [`Store::with_tx`].
    pub fn with_tx_domain<T>(
        &self,
        f: impl FnOnce(&Transaction) -> hs_domain::Result<T>,
    ) -> hs_domain::Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(Error::from)?;
        let out = f(&tx)?;
        tx.commit().map_err(Error::from)?;
        Ok(out)
    }

    /// Cheap liveness check for the health endpoint.
    pub fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
    }
}
