//! Plain-text templates with `${name}` placeholders, loaded from the template roots.

use super::{CacheOptions, Renderer};
use crate::config::Template;
use crate::error::AppError;
use crate::globals::AppGlobals;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

pub struct TextRenderer {
    globals: Arc<AppGlobals>,
    extension: String,
    auto_reload: bool,
    compiled: RwLock<HashMap<PathBuf, Template>>,
}

impl TextRenderer {
    pub fn new(globals: Arc<AppGlobals>, auto_reload: bool) -> Self {
        TextRenderer {
            globals,
            extension: "txt".into(),
            auto_reload,
            compiled: RwLock::new(HashMap::new()),
        }
    }

    fn load(&self, name: &str) -> Result<Template, AppError> {
        let path = self
            .globals
            .dotted_filename_finder()
            .get_dotted_filename(name, &self.extension)?;
        if !self.auto_reload {
            if let Some(hit) = self.compiled.read().get(&path) {
                return Ok(hit.clone());
            }
        }
        let source = std::fs::read_to_string(&path)?;
        let template = Template::parse(&source).map_err(AppError::Render)?;
        if !self.auto_reload {
            self.compiled.write().insert(path, template.clone());
        }
        Ok(template)
    }
}

impl Renderer for TextRenderer {
    fn content_type(&self) -> &str {
        "text/plain"
    }

    fn render(&self, template: &str, vars: &Map<String, Value>, _cache: &CacheOptions) -> Result<String, AppError> {
        self.load(template)?
            .substitute(vars)
            .map_err(|e| AppError::Render(format!("{template}: {e}")))
    }
}
