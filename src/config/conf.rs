//! Option mapping shared by the blueprint and the built configuration.
//!
//! Options are JSON values keyed by dotted names (`sqlalchemy.url`, `paths.root`).
//! Objects that are not plain data (controllers, globals, engines, plugins) live in
//! a separate service map and are shared by reference when a `Conf` is cloned.

use crate::config::coerce::{self, Logger, Template};
use crate::error::ConfigError;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type Service = Arc<dyn Any + Send + Sync>;

#[derive(Clone, Default)]
pub struct Conf {
    options: Map<String, Value>,
    services: HashMap<String, Service>,
}

impl Conf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_options(options: Map<String, Value>) -> Self {
        Conf {
            options,
            services: HashMap::new(),
        }
    }

    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.options.get_mut(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.options.insert(key.into(), value.into());
    }

    /// Insert only when the key is absent. Returns whether the value was stored.
    pub fn set_default(&mut self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        let key = key.into();
        if self.options.contains_key(&key) {
            return false;
        }
        self.options.insert(key, value.into());
        true
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.options.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.options.contains_key(key) || self.services.contains_key(key)
    }

    /// True when the option is present and not null.
    pub fn is_set(&self, key: &str) -> bool {
        matches!(self.options.get(key), Some(v) if !v.is_null())
    }

    pub fn merge_options(&mut self, other: &Map<String, Value>) {
        for (k, v) in other {
            self.options.insert(k.clone(), v.clone());
        }
    }

    pub fn merge_defaults(&mut self, defaults: &Map<String, Value>) {
        for (k, v) in defaults {
            if !self.options.contains_key(k) {
                self.options.insert(k.clone(), v.clone());
            }
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    pub fn str_or(&self, key: &str, default: &str) -> String {
        self.get_str(key).unwrap_or(default).to_string()
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => coerce::asbool(v).map_err(|reason| coercion_error(key, v, reason)),
        }
    }

    pub fn int_or(&self, key: &str, default: i64) -> Result<i64, ConfigError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => coerce::asint(v).map_err(|reason| coercion_error(key, v, reason)),
        }
    }

    /// String items of a list option (a comma separated string is accepted too).
    pub fn list(&self, key: &str) -> Result<Vec<String>, ConfigError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(v) => {
                let items = coerce::aslist(v, None, true).map_err(|reason| coercion_error(key, v, reason))?;
                Ok(items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect())
            }
        }
    }

    pub fn template(&self, key: &str) -> Result<Option<Template>, ConfigError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => coerce::astemplate(v)
                .map(Some)
                .map_err(|reason| coercion_error(key, v, reason)),
        }
    }

    pub fn logger(&self, key: &str) -> Result<Option<Logger>, ConfigError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => coerce::aslogger(v)
                .map(Some)
                .map_err(|reason| coercion_error(key, v, reason)),
        }
    }

    pub fn require_str(&self, key: &str) -> Result<&str, ConfigError> {
        self.get_str(key)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    /// Every option starting with `prefix`, with the prefix stripped.
    pub fn prefixed(&self, prefix: &str) -> Map<String, Value> {
        self.options
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(prefix).map(|rest| (rest.to_string(), v.clone())))
            .collect()
    }

    pub fn set_service<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.services.insert(key.into(), Arc::new(value));
    }

    pub fn set_service_raw(&mut self, key: impl Into<String>, value: Service) {
        self.services.insert(key.into(), value);
    }

    /// Cloned handle of the service stored under `key` with type `T`.
    pub fn service<T: Any + Clone + Send + Sync>(&self, key: &str) -> Option<T> {
        self.services
            .get(key)
            .and_then(|s| s.downcast_ref::<T>())
            .cloned()
    }

    pub fn require_service<T: Any + Clone + Send + Sync>(&self, key: &str) -> Result<T, ConfigError> {
        self.service(key).ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    pub fn has_service(&self, key: &str) -> bool {
        self.services.contains_key(key)
    }

    pub fn take_service(&mut self, key: &str) -> Option<Service> {
        self.services.remove(key)
    }

    pub fn service_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.services.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

pub(crate) fn coercion_error(key: &str, value: &Value, reason: String) -> ConfigError {
    ConfigError::Coercion {
        key: key.to_string(),
        value: value.to_string(),
        reason,
    }
}

impl fmt::Debug for Conf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conf")
            .field("options", &self.options)
            .field("services", &self.service_keys())
            .finish()
    }
}
