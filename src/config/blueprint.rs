//! Live view over the blueprint options sharing a dotted prefix.

use crate::config::Conf;
use serde_json::{Map, Value};

/// Reads and writes go straight to the underlying blueprint.
pub struct BlueprintView<'a> {
    conf: &'a mut Conf,
    prefix: String,
}

impl<'a> BlueprintView<'a> {
    pub(crate) fn new(conf: &'a mut Conf, prefix: &str) -> Self {
        let prefix = if prefix.is_empty() || prefix.ends_with('.') {
            prefix.to_string()
        } else {
            format!("{prefix}.")
        };
        BlueprintView { conf, prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.conf.get(&self.full_key(key))
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let key = self.full_key(key);
        self.conf.set(key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let key = self.full_key(key);
        self.conf.remove(&key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.conf.contains_key(&self.full_key(key))
    }

    pub fn keys(&self) -> Vec<String> {
        self.to_map().keys().cloned().collect()
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.conf.prefixed(&self.prefix)
    }

    pub fn set_service<T: std::any::Any + Send + Sync>(&mut self, key: &str, value: T) {
        let key = self.full_key(key);
        self.conf.set_service(key, value);
    }
}
