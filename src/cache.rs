//! Named in-memory cache namespaces with optional expiry.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

#[derive(Debug)]
pub struct CacheNamespace {
    name: String,
    default_expire: Option<u64>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl CacheNamespace {
    fn new(name: &str, default_expire: Option<u64>) -> Self {
        CacheNamespace {
            name: name.to_string(),
            default_expire,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// `expire` in seconds; `None` uses the namespace default.
    pub fn put(&self, key: &str, value: Value, expire: Option<u64>) {
        let expires_at = expire
            .or(self.default_expire)
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        self.entries
            .lock()
            .insert(key.to_string(), Entry { value, expires_at });
    }

    /// Cached value for `key`, computing and storing it on a miss.
    pub fn get_or_create<E>(
        &self,
        key: &str,
        expire: Option<u64>,
        create: impl FnOnce() -> Result<Value, E>,
    ) -> Result<Value, E> {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let value = create()?;
        self.put(key, value.clone(), expire);
        Ok(value)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared by every request of an application.
#[derive(Debug, Default)]
pub struct CacheManager {
    default_expire: Option<u64>,
    namespaces: RwLock<HashMap<String, Arc<CacheNamespace>>>,
}

impl CacheManager {
    pub fn new(default_expire: Option<u64>) -> Self {
        CacheManager {
            default_expire,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_cache(&self, namespace: &str) -> Arc<CacheNamespace> {
        if let Some(existing) = self.namespaces.read().get(namespace) {
            return existing.clone();
        }
        self.namespaces
            .write()
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(CacheNamespace::new(namespace, self.default_expire)))
            .clone()
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn clear(&self) {
        self.namespaces.write().clear();
    }
}
