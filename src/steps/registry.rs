use crate::config::{Coercion, Conf};
use crate::configurator::{BuildContext, ConfigurationStep};
use crate::error::ConfigError;
use crate::registry::RegistryManager;
use crate::wsgi::BoxedApp;
use serde_json::{Map, Value};
use std::any::Any;
use std::sync::Arc;

/// Wraps the application in a [`RegistryManager`].
///
/// With `debug` on, the registry of a failed request is preserved for inspection.
#[derive(Debug, Default)]
pub struct RegistryStep;

impl ConfigurationStep for RegistryStep {
    fn id(&self) -> &str {
        "registry"
    }

    fn defaults(&self) -> Map<String, Value> {
        let mut defaults = Map::new();
        defaults.insert("registry_streaming".into(), Value::Bool(true));
        defaults
    }

    fn coercions(&self) -> Vec<(String, Coercion)> {
        vec![
            ("registry_streaming".into(), Coercion::Bool),
            ("debug".into(), Coercion::Bool),
        ]
    }

    fn app_ready(&self, app: BoxedApp, conf: &Conf, _ctx: &BuildContext) -> Result<BoxedApp, ConfigError> {
        let streaming = conf.bool_or("registry_streaming", true)?;
        let preserve = conf.bool_or("debug", false)?;
        tracing::debug!(streaming, preserve, "installing registry manager");
        Ok(Arc::new(RegistryManager::new(app, streaming, preserve)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
