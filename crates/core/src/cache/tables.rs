//! Key/value tables persisted in SQLite.

use async_trait::async_trait;
use serde_json::Value;
use tokio_rusqlite::rusqlite::OptionalExtension;
use tokio_rusqlite::{Connection, params};

use super::Table;
use crate::Error;

/// One named table inside the shared database.
#[derive(Clone, Debug)]
pub struct SqliteTable {
    conn: Connection,
    name: String,
}

impl SqliteTable {
    pub(crate) fn new(conn: Connection, name: &str) -> Self {
        Self { conn, name: name.to_string() }
    }
}

#[async_trait]
impl Table for SqliteTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, key: &str) -> Result<Option<Value>, Error> {
        let store = self.name.clone();
        let key = key.to_string();
        let raw = self
            .conn
            .call(move |conn| -> Result<Option<String>, Error> {
                let raw = conn
                    .query_row(
                        "SELECT value_json FROM table_entries WHERE store = ?1 AND key = ?2",
                        params![store, key],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(raw)
            })
            .await
            .map_err(Error::from)?;

        raw.map(|raw| serde_json::from_str(&raw).map_err(Error::from))
            .transpose()
    }

    async fn write(&self, key: &str, value: &Value) -> Result<(), Error> {
        let store = self.name.clone();
        let key = key.to_string();
        let json = serde_json::to_string(value)?;
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO table_entries (store, key, value_json, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(store, key) DO UPDATE SET
                        value_json = excluded.value_json,
                        updated_at = excluded.updated_at",
                    params![store, key, json, chrono::Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        let store = self.name.clone();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let rows = conn.execute(
                    "DELETE FROM table_entries WHERE store = ?1 AND key = ?2",
                    params![store, key],
                )?;
                Ok(rows > 0)
            })
            .await
            .map_err(Error::from)
    }

    async fn keys(&self) -> Result<Vec<String>, Error> {
        let store = self.name.clone();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT key FROM table_entries WHERE store = ?1 ORDER BY key")?;
                let keys = stmt
                    .query_map(params![store], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(keys)
            })
            .await
            .map_err(Error::from)
    }
}
