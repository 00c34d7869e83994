//! In-process storage backend.
//!
//! Used by tests and by hosts that do not need persistence. Writes can be made
//! to fail on demand, which is how the critical-error paths get exercised.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use super::{ResponseCache, Storage, Table};
use crate::Error;
use crate::net::Response;

#[derive(Clone)]
enum Store {
    Table(Arc<MemoryTable>),
    Cache(Arc<MemoryCache>),
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Storage that lives and dies with the process.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    stores: Arc<Mutex<HashMap<String, Store>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (simulates a full or wiped storage).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn open_table(&self, name: &str) -> Result<Arc<dyn Table>, Error> {
        let mut stores = lock(&self.stores);
        if let Some(Store::Table(t)) = stores.get(name) {
            return Ok(t.clone());
        }
        let table = Arc::new(MemoryTable {
            name: name.to_string(),
            entries: Mutex::new(BTreeMap::new()),
            fail_writes: self.fail_writes.clone(),
        });
        stores.insert(name.to_string(), Store::Table(table.clone()));
        Ok(table)
    }

    async fn open_cache(&self, name: &str) -> Result<Arc<dyn ResponseCache>, Error> {
        let mut stores = lock(&self.stores);
        if let Some(Store::Cache(c)) = stores.get(name) {
            return Ok(c.clone());
        }
        let cache = Arc::new(MemoryCache { entries: Mutex::new(BTreeMap::new()), fail_writes: self.fail_writes.clone() });
        stores.insert(name.to_string(), Store::Cache(cache.clone()));
        Ok(cache)
    }

    async fn delete(&self, name: &str) -> Result<bool, Error> {
        Ok(lock(&self.stores).remove(name).is_some())
    }

    async fn names(&self) -> Result<Vec<String>, Error> {
        let mut names: Vec<String> = lock(&self.stores).keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

struct MemoryTable {
    name: String,
    entries: Mutex<BTreeMap<String, Value>>,
    fail_writes: Arc<AtomicBool>,
}

#[async_trait]
impl Table for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, key: &str) -> Result<Option<Value>, Error> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    async fn write(&self, key: &str, value: &Value) -> Result<(), Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!("write to table {} rejected", self.name)));
        }
        lock(&self.entries).insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        Ok(lock(&self.entries).remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, Error> {
        Ok(lock(&self.entries).keys().cloned().collect())
    }
}

struct MemoryCache {
    entries: Mutex<BTreeMap<String, Response>>,
    fail_writes: Arc<AtomicBool>,
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Response>, Error> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    async fn put(&self, key: &str, res: &Response) -> Result<(), Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!("cache put for {key} rejected")));
        }
        lock(&self.entries).insert(key.to_string(), res.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        Ok(lock(&self.entries).remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, Error> {
        Ok(lock(&self.entries).keys().cloned().collect())
    }
}
