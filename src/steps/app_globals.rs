use crate::config::{Coercion, Conf};
use crate::configurator::{BuildContext, ConfigurationStep};
use crate::error::ConfigError;
use crate::globals::{AppGlobals, DottedFileNameFinder, Helpers};
use serde_json::{Map, Value};
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

/// Publishes the application globals as `tg.app_globals`.
///
/// An `app_globals` service of type `Arc<AppGlobals>` is used as given; otherwise a
/// new container is made from a snapshot of the conf with a template finder over
/// `paths.templates`.
#[derive(Debug, Default)]
pub struct AppGlobalsStep;

impl ConfigurationStep for AppGlobalsStep {
    fn id(&self) -> &str {
        "app_globals"
    }

    fn defaults(&self) -> Map<String, Value> {
        let mut defaults = Map::new();
        defaults.insert("use_dotted_templatenames".into(), Value::Bool(true));
        defaults
    }

    fn coercions(&self) -> Vec<(String, Coercion)> {
        vec![
            ("use_dotted_templatenames".into(), Coercion::Bool),
            ("paths.templates".into(), Coercion::list()),
        ]
    }

    fn config_ready(&self, conf: &mut Conf, _ctx: &BuildContext) -> Result<(), ConfigError> {
        let globals = match conf.service::<Arc<AppGlobals>>("app_globals") {
            Some(given) => given,
            None => {
                let roots = conf.list("paths.templates")?.into_iter().map(PathBuf::from).collect();
                let finder = DottedFileNameFinder::new(
                    conf.get_str("package").map(str::to_string),
                    roots,
                    conf.bool_or("use_dotted_templatenames", true)?,
                );
                Arc::new(AppGlobals::new(conf.options().clone(), finder))
            }
        };
        conf.set_service("tg.app_globals", globals);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Publishes the `helpers` service; an empty set when the application gave none.
#[derive(Debug, Default)]
pub struct HelpersStep;

impl ConfigurationStep for HelpersStep {
    fn id(&self) -> &str {
        "helpers"
    }

    fn config_ready(&self, conf: &mut Conf, _ctx: &BuildContext) -> Result<(), ConfigError> {
        let helpers = conf.service::<Arc<Helpers>>("helpers").unwrap_or_default();
        tracing::debug!(helpers = ?helpers.names(), "template helpers");
        conf.set_service("helpers", helpers);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
