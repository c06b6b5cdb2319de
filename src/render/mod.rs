//! Renderer registration contract and cached rendering.

pub mod json;
pub mod text;

pub use json::{to_json_string, JsonRenderer};
pub use text::TextRenderer;

use crate::cache::CacheManager;
use crate::config::Conf;
use crate::error::{AppError, ConfigError};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Cache parameters accepted by every renderer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheOptions {
    pub key: Option<String>,
    /// Cache namespace; defaults to `<engine>.<template>`.
    pub namespace: Option<String>,
    /// Seconds.
    pub expire: Option<u64>,
}

pub trait Renderer: Send + Sync {
    fn content_type(&self) -> &str;
    fn render(&self, template: &str, vars: &Map<String, Value>, cache: &CacheOptions) -> Result<String, AppError>;
}

/// Builds a renderer from the configuration; `Ok(None)` means the engine is unavailable.
pub type RendererFactory = Arc<dyn Fn(&Conf) -> Result<Option<Arc<dyn Renderer>>, ConfigError> + Send + Sync>;

/// Active renderers of one application, stored in conf as `render_functions`.
#[derive(Clone, Default)]
pub struct Renderers {
    active: Vec<(String, Arc<dyn Renderer>)>,
    default: Option<String>,
}

impl Renderers {
    pub fn new(active: Vec<(String, Arc<dyn Renderer>)>, default: Option<String>) -> Self {
        Renderers { active, default }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Renderer>> {
        self.active.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn names(&self) -> Vec<&str> {
        self.active.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// `engine` of `None` selects the default renderer.
    pub fn resolve(&self, engine: Option<&str>) -> Result<(&str, &Arc<dyn Renderer>), AppError> {
        let name = engine
            .or(self.default.as_deref())
            .ok_or_else(|| AppError::Render("no renderer available".into()))?;
        self.active
            .iter()
            .find(|(n, _)| n == name)
            .map(|(n, r)| (n.as_str(), r))
            .ok_or_else(|| AppError::Render(format!("renderer {name} is not active")))
    }
}

impl fmt::Debug for Renderers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderers")
            .field("active", &self.names())
            .field("default", &self.default)
            .finish()
    }
}

/// Render through `renderer`, reusing a cached result when a cache key is given.
pub fn cached_template(
    engine: &str,
    renderer: &dyn Renderer,
    template: &str,
    vars: &Map<String, Value>,
    options: &CacheOptions,
    cache: Option<&CacheManager>,
) -> Result<String, AppError> {
    let (Some(key), Some(cache)) = (options.key.as_deref(), cache) else {
        return renderer.render(template, vars, options);
    };
    let namespace = options
        .namespace
        .clone()
        .unwrap_or_else(|| format!("{engine}.{template}"));
    let value = cache
        .get_cache(&namespace)
        .get_or_create(key, options.expire, || {
            renderer.render(template, vars, options).map(Value::String)
        })?;
    match value {
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}
