//! Database connection management with pragma configuration.
//!
//! This module handles opening the SQLite database, applying required pragmas
//! for performance and concurrency (WAL mode), and running migrations. The
//! resulting [`SqliteStorage`] is the persistent [`Storage`] backend.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_rusqlite::{Connection, params};

use super::responses::SqliteCache;
use super::tables::SqliteTable;
use super::{ResponseCache, Storage, Table, migrations};
use crate::Error;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;";

/// Kind column value for key/value tables.
pub(crate) const KIND_TABLE: &str = "table";
/// Kind column value for response caches.
pub(crate) const KIND_CACHE: &str = "cache";

/// Persistent storage handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread.
#[derive(Clone, Debug)]
pub struct SqliteStorage {
    pub(crate) conn: Connection,
}

impl SqliteStorage {
    /// Open a database at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies performance pragmas,
    /// and runs any pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.to_string()))?;
        Self::prepare(conn).await
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Self::prepare(conn).await
    }

    async fn prepare(conn: Connection) -> Result<Self, Error> {
        conn.call(|conn| conn.execute_batch(PRAGMAS))
            .await
            .map_err(Error::from)?;

        migrations::run(&conn).await?;

        Ok(Self { conn })
    }

    /// Register a store name, failing if it already exists with another kind.
    async fn register(&self, name: &str, kind: &'static str) -> Result<(), Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO stores (name, kind, created_at) VALUES (?1, ?2, ?3)",
                    params![name, kind, chrono::Utc::now().to_rfc3339()],
                )?;
                let existing: String =
                    conn.query_row("SELECT kind FROM stores WHERE name = ?1", params![name], |row| row.get(0))?;
                if existing != kind {
                    return Err(Error::Storage(format!("store {name} is a {existing}, not a {kind}")));
                }
                Ok(())
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn open_table(&self, name: &str) -> Result<Arc<dyn Table>, Error> {
        self.register(name, KIND_TABLE).await?;
        Ok(Arc::new(SqliteTable::new(self.conn.clone(), name)))
    }

    async fn open_cache(&self, name: &str) -> Result<Arc<dyn ResponseCache>, Error> {
        self.register(name, KIND_CACHE).await?;
        Ok(Arc::new(SqliteCache::new(self.conn.clone(), name)))
    }

    async fn delete(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM table_entries WHERE store = ?1", params![name])?;
                tx.execute("DELETE FROM cached_responses WHERE store = ?1", params![name])?;
                let removed = tx.execute("DELETE FROM stores WHERE name = ?1", params![name])?;
                tx.commit()?;
                Ok(removed > 0)
            })
            .await
            .map_err(Error::from)
    }

    async fn names(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM stores ORDER BY name")?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(Error::from)
    }
}
