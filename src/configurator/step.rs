//! Configuration step contract and a step assembled from closures.

use super::hooks::HookRegistry;
use super::milestones::Milestones;
use super::Configurator;
use crate::config::{Coercion, Conf};
use crate::error::{ConfigError, RegistrationError};
use crate::wsgi::BoxedApp;
use serde_json::{Map, Value};
use std::any::Any;
use std::sync::Arc;

/// Handles passed to every step action.
#[derive(Clone, Debug)]
pub struct BuildContext {
    pub hooks: Arc<HookRegistry>,
    pub milestones: Arc<Milestones>,
}

/// A contributor to the build pipeline.
///
/// Actions run in step order, one phase at a time: `before_config` and `config_ready`
/// while the environment loads, `environment_loaded` and `app_ready` while the
/// application is made.
pub trait ConfigurationStep: Any + Send + Sync {
    fn id(&self) -> &str;

    /// Merged into the blueprint at registration, never overwriting.
    fn defaults(&self) -> Map<String, Value> {
        Map::new()
    }

    fn coercions(&self) -> Vec<(String, Coercion)> {
        Vec::new()
    }

    fn on_bind(&self, _configurator: &mut Configurator) -> Result<(), RegistrationError> {
        Ok(())
    }

    fn before_config(&self, _conf: &mut Conf, _ctx: &BuildContext) -> Result<(), ConfigError> {
        Ok(())
    }

    fn config_ready(&self, _conf: &mut Conf, _ctx: &BuildContext) -> Result<(), ConfigError> {
        Ok(())
    }

    fn environment_loaded(&self, _conf: &mut Conf, _ctx: &BuildContext) -> Result<(), ConfigError> {
        Ok(())
    }

    fn app_ready(&self, app: BoxedApp, _conf: &Conf, _ctx: &BuildContext) -> Result<BoxedApp, ConfigError> {
        Ok(app)
    }

    fn as_any(&self) -> &dyn Any;
}

pub type ConfAction = Box<dyn Fn(&mut Conf) -> Result<(), ConfigError> + Send + Sync>;
pub type AppAction = Box<dyn Fn(BoxedApp, &Conf) -> Result<BoxedApp, ConfigError> + Send + Sync>;

/// Tagged action of an [`ActionStep`].
pub enum Action {
    BeforeConfig(ConfAction),
    ConfigReady(ConfAction),
    EnvironmentLoaded(ConfAction),
    AppReady(AppAction),
}

/// Step built from plain closures, for applications adding their own phases.
pub struct ActionStep {
    id: String,
    defaults: Map<String, Value>,
    coercions: Vec<(String, Coercion)>,
    actions: Vec<Action>,
}

impl ActionStep {
    pub fn new(id: impl Into<String>) -> Self {
        ActionStep {
            id: id.into(),
            defaults: Map::new(),
            coercions: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn with_default(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.defaults.insert(key.to_string(), value.into());
        self
    }

    pub fn with_coercion(mut self, key: &str, coercion: Coercion) -> Self {
        self.coercions.push((key.to_string(), coercion));
        self
    }

    pub fn before_config(mut self, f: impl Fn(&mut Conf) -> Result<(), ConfigError> + Send + Sync + 'static) -> Self {
        self.actions.push(Action::BeforeConfig(Box::new(f)));
        self
    }

    pub fn config_ready(mut self, f: impl Fn(&mut Conf) -> Result<(), ConfigError> + Send + Sync + 'static) -> Self {
        self.actions.push(Action::ConfigReady(Box::new(f)));
        self
    }

    pub fn environment_loaded(
        mut self,
        f: impl Fn(&mut Conf) -> Result<(), ConfigError> + Send + Sync + 'static,
    ) -> Self {
        self.actions.push(Action::EnvironmentLoaded(Box::new(f)));
        self
    }

    pub fn app_ready(
        mut self,
        f: impl Fn(BoxedApp, &Conf) -> Result<BoxedApp, ConfigError> + Send + Sync + 'static,
    ) -> Self {
        self.actions.push(Action::AppReady(Box::new(f)));
        self
    }

    fn run_conf(&self, conf: &mut Conf, pick: fn(&Action) -> Option<&ConfAction>) -> Result<(), ConfigError> {
        for action in self.actions.iter().filter_map(pick) {
            action(conf)?;
        }
        Ok(())
    }
}

impl ConfigurationStep for ActionStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn defaults(&self) -> Map<String, Value> {
        self.defaults.clone()
    }

    fn coercions(&self) -> Vec<(String, Coercion)> {
        self.coercions.clone()
    }

    fn before_config(&self, conf: &mut Conf, _ctx: &BuildContext) -> Result<(), ConfigError> {
        self.run_conf(conf, |a| match a {
            Action::BeforeConfig(f) => Some(f),
            _ => None,
        })
    }

    fn config_ready(&self, conf: &mut Conf, _ctx: &BuildContext) -> Result<(), ConfigError> {
        self.run_conf(conf, |a| match a {
            Action::ConfigReady(f) => Some(f),
            _ => None,
        })
    }

    fn environment_loaded(&self, conf: &mut Conf, _ctx: &BuildContext) -> Result<(), ConfigError> {
        self.run_conf(conf, |a| match a {
            Action::EnvironmentLoaded(f) => Some(f),
            _ => None,
        })
    }

    fn app_ready(&self, app: BoxedApp, conf: &Conf, _ctx: &BuildContext) -> Result<BoxedApp, ConfigError> {
        let mut app = app;
        for action in &self.actions {
            if let Action::AppReady(f) = action {
                app = f(app, conf)?;
            }
        }
        Ok(app)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
