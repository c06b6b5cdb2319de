//! Validation of a coerced configuration before any step action runs.

use crate::config::Conf;
use crate::error::ConfigError;
use serde_json::Value;

pub fn validate(conf: &Conf) -> Result<(), ConfigError> {
    if let Some(renderers) = conf.get("renderers") {
        let Value::Array(items) = renderers else {
            return Err(ConfigError::Validation("renderers must be a list".into()));
        };
        if let Some(bad) = items.iter().find(|v| !v.is_string()) {
            return Err(ConfigError::Validation(format!("renderer names must be strings, got {bad}")));
        }
    }

    if let Some(default) = conf.get("default_renderer") {
        if !default.is_null() && !default.is_string() {
            return Err(ConfigError::Validation("default_renderer must be a string".into()));
        }
    }

    if let Some(path) = conf.get_str("errorpage.path") {
        if !path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "errorpage.path must be absolute, got {path:?}"
            )));
        }
    }

    if conf.int_or("tm.attempts", 1)? < 1 {
        return Err(ConfigError::Validation("tm.attempts must be at least 1".into()));
    }

    if conf.bool_or("session.enabled", false)? {
        conf.require_str("session.secret")?;
    }

    Ok(())
}
