//! Deployment configuration: the global/app option maps overlaid on the blueprint.

use crate::error::ConfigError;
use serde_json::{Map, Value};
use std::path::Path;

/// Global and application sections of a deployment.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeploymentConfig {
    pub global: Map<String, Value>,
    pub app: Map<String, Value>,
}

impl DeploymentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        DeploymentConfig {
            global: Map::new(),
            app: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Load `{"global": {...}, "app": {...}}`; a flat object is taken as the app section.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(text).map_err(|e| ConfigError::Load(e.to_string()))?;
        let Value::Object(mut obj) = value else {
            return Err(ConfigError::Load("deployment config must be a JSON object".into()));
        };
        let has_sections = obj.contains_key("global") || obj.contains_key("app");
        if !has_sections {
            return Ok(DeploymentConfig {
                global: Map::new(),
                app: flatten(obj),
            });
        }
        let global = section(&mut obj, "global")?;
        let app = section(&mut obj, "app")?;
        Ok(DeploymentConfig { global, app })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), "loading deployment config");
        Self::from_json_str(&text)
    }

    /// App options from environment variables named `{prefix}{KEY}` (a `.env` file is read first).
    /// `__` separates dotted segments: `TG_SQLALCHEMY__URL` becomes `sqlalchemy.url`.
    pub fn from_env(prefix: &str) -> Self {
        dotenvy::dotenv().ok();
        Self::from_vars(prefix, std::env::vars())
    }

    pub fn from_vars<I>(prefix: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let app = vars
            .into_iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(prefix)
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| (rest.to_lowercase().replace("__", "."), Value::String(v)))
            })
            .collect();
        DeploymentConfig {
            global: Map::new(),
            app,
        }
    }

    /// App values win over global ones.
    pub fn merged(&self) -> Map<String, Value> {
        let mut out = self.global.clone();
        for (k, v) in &self.app {
            out.insert(k.clone(), v.clone());
        }
        out
    }
}

fn section(obj: &mut Map<String, Value>, name: &str) -> Result<Map<String, Value>, ConfigError> {
    match obj.remove(name) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(flatten(map)),
        Some(_) => Err(ConfigError::Load(format!("section {name} must be an object"))),
    }
}

/// Nested objects become dotted keys: `{"sqlalchemy": {"url": ..}}` -> `sqlalchemy.url`.
fn flatten(map: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (k, v) in map {
        flatten_into(&mut out, k, v);
    }
    out
}

fn flatten_into(out: &mut Map<String, Value>, key: String, value: Value) {
    match value {
        Value::Object(inner) if !inner.is_empty() => {
            for (k, v) in inner {
                flatten_into(out, format!("{key}.{k}"), v);
            }
        }
        other => {
            out.insert(key, other);
        }
    }
}
