use crate::config::{Coercion, Conf};
use crate::configurator::{BuildContext, ConfigurationStep, Configurator};
use crate::db::odm::{DataStore, OdmSession};
use crate::deps::After;
use crate::error::{ConfigError, RegistrationError};
use crate::middleware::MingCloser;
use crate::wrappers::{wrapper_factory, MingApplicationWrapper};
use crate::wsgi::BoxedApp;
use serde_json::{Map, Value};
use std::any::Any;
use std::sync::Arc;

/// Document-store persistence, active with `use_ming`.
///
/// Publishes the connection settings as `ming.datastore`. The unit of work itself is
/// the `ming.session` service, flushed by the `ming` wrapper and closed after every request.
#[derive(Debug, Default)]
pub struct MingStep;

impl ConfigurationStep for MingStep {
    fn id(&self) -> &str {
        "ming"
    }

    fn defaults(&self) -> Map<String, Value> {
        let mut defaults = Map::new();
        defaults.insert("use_ming".into(), Value::Bool(false));
        defaults.insert("ming.autoflush".into(), Value::Bool(true));
        defaults
    }

    fn coercions(&self) -> Vec<(String, Coercion)> {
        vec![
            ("use_ming".into(), Coercion::Bool),
            ("ming.autoflush".into(), Coercion::Bool),
        ]
    }

    fn on_bind(&self, configurator: &mut Configurator) -> Result<(), RegistrationError> {
        if configurator.application_wrappers().contains(&"ming") {
            return Ok(());
        }
        configurator.register_application_wrapper("ming", wrapper_factory(MingApplicationWrapper::new), After::Late)
    }

    fn config_ready(&self, conf: &mut Conf, _ctx: &BuildContext) -> Result<(), ConfigError> {
        if !conf.bool_or("use_ming", false)? {
            return Ok(());
        }
        let store = DataStore::from_conf(conf)?;
        tracing::debug!(db = %store.db, "document store configured");
        if !conf.has_service("ming.session") {
            tracing::warn!("use_ming is on but no ming.session was given");
        }
        conf.set_service("ming.datastore", store);
        Ok(())
    }

    fn app_ready(&self, app: BoxedApp, conf: &Conf, _ctx: &BuildContext) -> Result<BoxedApp, ConfigError> {
        if !conf.bool_or("use_ming", false)? {
            return Ok(app);
        }
        match conf.service::<Arc<dyn OdmSession>>("ming.session") {
            Some(session) => Ok(Arc::new(MingCloser::new(app, session))),
            None => Ok(app),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::ctx;
    use super::*;

    #[test]
    fn datastore_is_published_when_enabled() {
        let mut conf = Conf::new();
        conf.set("ming.url", "mongodb://localhost:27017/catalog");
        MingStep.config_ready(&mut conf, &ctx()).unwrap();
        assert!(!conf.has_service("ming.datastore"));

        conf.set("use_ming", true);
        MingStep.config_ready(&mut conf, &ctx()).unwrap();
        assert_eq!(conf.service::<DataStore>("ming.datastore").unwrap().db, "catalog");
    }

    #[test]
    fn missing_url_fails_when_enabled() {
        let mut conf = Conf::new();
        conf.set("use_ming", true);
        assert!(matches!(
            MingStep.config_ready(&mut conf, &ctx()),
            Err(ConfigError::Missing(key)) if key == "ming.url"
        ));
    }

    #[test]
    fn binding_registers_the_wrapper_once() {
        let mut cfg = Configurator::new();
        cfg.register(MingStep, After::Middle).unwrap();
        cfg.replace("ming", MingStep).unwrap();
        assert_eq!(cfg.application_wrappers(), vec!["ming"]);
    }
}
