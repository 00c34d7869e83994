//! Storage contracts and backends.
//!
//! The engine only needs two kinds of named stores:
//!
//! - key/value **tables** holding JSON documents (control state, metadata,
//!   LRU chains, age records)
//! - **response caches** holding buffered responses keyed by URL
//!
//! Two backends implement the contracts: [`SqliteStorage`] (persistent, via
//! tokio-rusqlite with versioned migrations) and [`MemoryStorage`] (in-process,
//! with write-failure injection for tests).

pub mod connection;
pub mod hash;
pub mod memory;
pub mod migrations;
pub mod responses;
pub mod tables;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::Error;
use crate::net::Response;

pub use connection::SqliteStorage;
pub use memory::MemoryStorage;

/// A named key/value table of JSON documents.
#[async_trait]
pub trait Table: Send + Sync {
    fn name(&self) -> &str;

    async fn read(&self, key: &str) -> Result<Option<Value>, Error>;

    async fn write(&self, key: &str, value: &Value) -> Result<(), Error>;

    /// Returns whether an entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, Error>;

    async fn keys(&self) -> Result<Vec<String>, Error>;
}

impl dyn Table + '_ {
    /// Read and deserialize an entry.
    pub async fn read_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        match self.read(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serialize and write an entry.
    pub async fn write_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), Error> {
        let value = serde_json::to_value(value)?;
        self.write(key, &value).await
    }
}

/// A named cache of buffered responses.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Response>, Error>;

    async fn put(&self, key: &str, res: &Response) -> Result<(), Error>;

    /// Returns whether an entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, Error>;

    async fn keys(&self) -> Result<Vec<String>, Error>;
}

/// Opens, lists and deletes named stores.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn open_table(&self, name: &str) -> Result<Arc<dyn Table>, Error>;

    async fn open_cache(&self, name: &str) -> Result<Arc<dyn ResponseCache>, Error>;

    /// Drop a store and all its entries. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, Error>;

    /// Names of every existing store.
    async fn names(&self) -> Result<Vec<String>, Error>;
}

/// Name of a key/value table owned by the agent with the given prefix.
pub fn table_name(prefix: &str, table: &str) -> String {
    format!("{prefix}:db:{table}")
}
