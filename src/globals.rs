//! Application-wide globals, template lookup and helpers.

use crate::error::AppError;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Resolves `package.templates.about` style names to files under the template roots.
#[derive(Debug, Default)]
pub struct DottedFileNameFinder {
    package: Option<String>,
    roots: Vec<PathBuf>,
    use_dotted: bool,
    cache: RwLock<HashMap<(String, String), PathBuf>>,
}

impl DottedFileNameFinder {
    pub fn new(package: Option<String>, roots: Vec<PathBuf>, use_dotted: bool) -> Self {
        DottedFileNameFinder {
            package,
            roots,
            use_dotted,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Path of `name` with `extension`. Names containing `/` or already ending in the
    /// extension are relative paths; other names are dotted when dotted lookup is on.
    pub fn get_dotted_filename(&self, name: &str, extension: &str) -> Result<PathBuf, AppError> {
        let cache_key = (name.to_string(), extension.to_string());
        if let Some(hit) = self.cache.read().get(&cache_key) {
            return Ok(hit.clone());
        }

        let ext = extension.trim_start_matches('.');
        let relative = if name.contains('/') || name.ends_with(&format!(".{ext}")) || !self.use_dotted {
            PathBuf::from(name)
        } else {
            let mut segments: Vec<&str> = name.split('.').collect();
            if self.package.as_deref().is_some_and(|p| segments.first() == Some(&p)) {
                segments.remove(0);
                if segments.first() == Some(&"templates") {
                    segments.remove(0);
                }
            }
            let mut path: PathBuf = segments.iter().collect();
            path.set_extension(ext);
            path
        };

        let found = self
            .roots
            .iter()
            .map(|root| root.join(&relative))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| AppError::Render(format!("template not found: {name}")))?;
        self.cache.write().insert(cache_key, found.clone());
        Ok(found)
    }
}

pub type HelperFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// Named functions made available to templates.
#[derive(Clone, Default)]
pub struct Helpers {
    funcs: HashMap<String, HelperFn>,
}

impl Helpers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, f: impl Fn(&[Value]) -> Value + Send + Sync + 'static) {
        self.funcs.insert(name.to_string(), Arc::new(f));
    }

    pub fn call(&self, name: &str, args: &[Value]) -> Option<Value> {
        self.funcs.get(name).map(|f| f(args))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.funcs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Helpers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Helpers").field("names", &self.names()).finish()
    }
}

/// Values shared by every request of one application.
///
/// Holds a read-only snapshot of the configuration it was created from, never the live conf.
#[derive(Debug)]
pub struct AppGlobals {
    values: RwLock<Map<String, Value>>,
    config: Map<String, Value>,
    finder: DottedFileNameFinder,
}

impl AppGlobals {
    pub fn new(config: Map<String, Value>, finder: DottedFileNameFinder) -> Self {
        AppGlobals {
            values: RwLock::new(Map::new()),
            config,
            finder,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.values.write().insert(key.to_string(), value.into());
    }

    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    pub fn dotted_filename_finder(&self) -> &DottedFileNameFinder {
        &self.finder
    }
}

impl Default for AppGlobals {
    fn default() -> Self {
        AppGlobals::new(Map::new(), DottedFileNameFinder::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_names_resolve_under_template_roots() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pages")).unwrap();
        std::fs::write(dir.path().join("pages/about.txt"), "about").unwrap();
        let finder = DottedFileNameFinder::new(Some("shop".into()), vec![dir.path().to_path_buf()], true);

        let expected = dir.path().join("pages/about.txt");
        assert_eq!(finder.get_dotted_filename("shop.templates.pages.about", "txt").unwrap(), expected);
        assert_eq!(finder.get_dotted_filename("pages.about", ".txt").unwrap(), expected);
        assert_eq!(finder.get_dotted_filename("pages/about.txt", "txt").unwrap(), expected);
        assert!(finder.get_dotted_filename("pages.missing", "txt").is_err());
    }

    #[test]
    fn globals_keep_a_config_snapshot() {
        let mut config = Map::new();
        config.insert("site".into(), json!("demo"));
        let globals = AppGlobals::new(config, DottedFileNameFinder::default());
        globals.set("visits", 1);
        assert_eq!(globals.get("visits"), Some(json!(1)));
        assert_eq!(globals.config_value("site"), Some(&json!("demo")));
    }

    #[test]
    fn helpers_are_callable_by_name() {
        let mut helpers = Helpers::new();
        helpers.register("upper", |args| json!(args[0].as_str().unwrap_or("").to_uppercase()));
        assert_eq!(helpers.call("upper", &[json!("a")]), Some(json!("A")));
        assert!(helpers.call("lower", &[]).is_none());
    }
}
