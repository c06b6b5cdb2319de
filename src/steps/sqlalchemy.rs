use crate::config::{Coercion, Conf};
use crate::configurator::{BuildContext, ConfigurationStep};
use crate::db::{BalancedEngines, Engine, Model, ModelBinding, ScopedSession};
use crate::error::ConfigError;
use crate::middleware::DbSessionRemover;
use crate::wsgi::BoxedApp;
use serde_json::{Map, Value};
use std::any::Any;
use std::sync::Arc;

/// Relational persistence, active with `use_sqlalchemy`.
///
/// `sqlalchemy.url` gives a single engine. `sqlalchemy.master.url` together with
/// `sqlalchemy.slaves.<name>.url` gives balanced engines, published as `balanced_engines`.
/// The scoped session is published as `DBSession` and removed after every request.
#[derive(Debug, Default)]
pub struct SqlAlchemyStep;

impl SqlAlchemyStep {
    fn engine(conf: &Conf, name: &str, url: &str) -> Result<Arc<Engine>, ConfigError> {
        let mut engine = Engine::new(name, url);
        if let Some(size) = conf.get("sqlalchemy.pool_size").filter(|v| !v.is_null()) {
            let size = crate::config::asint(size)
                .ok()
                .and_then(|s| u32::try_from(s).ok())
                .ok_or_else(|| ConfigError::Validation(format!("sqlalchemy.pool_size: invalid size {size}")))?;
            engine = engine.with_max_connections(size);
        }
        Ok(Arc::new(engine))
    }

    fn engines(conf: &Conf) -> Result<(Arc<BalancedEngines>, bool), ConfigError> {
        let Some(master_url) = conf.get_str("sqlalchemy.master.url").filter(|u| !u.is_empty()) else {
            let url = conf.require_str("sqlalchemy.url")?;
            let engine = Self::engine(conf, "master", url)?;
            return Ok((Arc::new(BalancedEngines::single(engine)), false));
        };
        let master = Self::engine(conf, "master", master_url)?;
        let mut slaves = Vec::new();
        for (key, value) in conf.prefixed("sqlalchemy.slaves.") {
            let Some(name) = key.strip_suffix(".url") else {
                continue;
            };
            let url = value
                .as_str()
                .ok_or_else(|| ConfigError::Validation(format!("sqlalchemy.slaves.{key} must be a string")))?;
            slaves.push(Self::engine(conf, name, url)?);
        }
        Ok((Arc::new(BalancedEngines::new(master, slaves)?), true))
    }
}

impl ConfigurationStep for SqlAlchemyStep {
    fn id(&self) -> &str {
        "sqlalchemy"
    }

    fn defaults(&self) -> Map<String, Value> {
        let mut defaults = Map::new();
        defaults.insert("use_sqlalchemy".into(), Value::Bool(false));
        defaults
    }

    fn coercions(&self) -> Vec<(String, Coercion)> {
        vec![
            ("use_sqlalchemy".into(), Coercion::Bool),
            ("sqlalchemy.pool_size".into(), Coercion::Int),
        ]
    }

    fn config_ready(&self, conf: &mut Conf, _ctx: &BuildContext) -> Result<(), ConfigError> {
        if !conf.bool_or("use_sqlalchemy", false)? {
            return Ok(());
        }
        let (engines, balanced) = Self::engines(conf)?;
        let session = ScopedSession::new(engines.clone());
        tracing::debug!(engines = ?engines.all.keys().collect::<Vec<_>>(), "database engines");

        if let Some(model) = conf.service::<Arc<dyn Model>>("model") {
            model.init_model(&ModelBinding {
                engine: engines.master.clone(),
                balanced: balanced.then(|| engines.clone()),
                session: session.clone(),
            })?;
        } else {
            tracing::warn!("use_sqlalchemy is on but no model was given");
        }

        conf.set_service("sa_engine", engines.master.clone());
        if balanced {
            conf.set_service("balanced_engines", engines);
        }
        conf.set_service("DBSession", session);
        Ok(())
    }

    fn app_ready(&self, app: BoxedApp, conf: &Conf, _ctx: &BuildContext) -> Result<BoxedApp, ConfigError> {
        match conf.service::<ScopedSession>("DBSession") {
            Some(session) if conf.bool_or("use_sqlalchemy", false)? => Ok(Arc::new(DbSessionRemover::new(app, session))),
            _ => Ok(app),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
