use crate::config::{Coercion, Conf};
use crate::configurator::{BuildContext, ConfigurationStep};
use crate::error::ConfigError;
use crate::middleware::StaticsMiddleware;
use crate::mime::MimeDatabase;
use crate::wsgi::BoxedApp;
use serde_json::{Map, Value};
use std::any::Any;
use std::sync::Arc;

/// Serves `paths.static_files` ahead of the application while `serve_static` is on.
#[derive(Debug, Default)]
pub struct StaticFilesStep;

impl ConfigurationStep for StaticFilesStep {
    fn id(&self) -> &str {
        "static_files"
    }

    fn defaults(&self) -> Map<String, Value> {
        let mut defaults = Map::new();
        defaults.insert("serve_static".into(), Value::Bool(true));
        defaults
    }

    fn coercions(&self) -> Vec<(String, Coercion)> {
        vec![("serve_static".into(), Coercion::Bool)]
    }

    fn app_ready(&self, app: BoxedApp, conf: &Conf, _ctx: &BuildContext) -> Result<BoxedApp, ConfigError> {
        if !conf.bool_or("serve_static", true)? {
            return Ok(app);
        }
        let Some(root) = conf.get_str("paths.static_files").filter(|r| !r.is_empty()) else {
            return Ok(app);
        };
        let mimetypes = conf
            .service::<Arc<MimeDatabase>>("mimetypes")
            .unwrap_or_else(|| Arc::new(MimeDatabase::new()));
        tracing::debug!(root, "serving static files");
        Ok(Arc::new(StaticsMiddleware::new(app, root, mimetypes)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
