//! Builds applications from a blueprint, ordered configuration steps and wrappers.

pub mod hooks;
pub mod milestones;
pub mod step;

pub use hooks::{AppEvent, ConfigEvent, HookRegistry, RequestEvent};
pub use milestones::{Milestone, Milestones};
pub use step::{Action, ActionStep, BuildContext, ConfigurationStep};

use crate::config::{self, BlueprintView, Coercion, Conf};
use crate::deps::{After, DependencyList};
use crate::error::{ConfigError, RegistrationError};
use crate::steps;
use crate::wrappers::AppWrapperFactory;
use crate::wsgi::{BoxedApp, TgApp};
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct Configurator {
    blueprint: Conf,
    coercions: BTreeMap<String, Coercion>,
    steps: DependencyList<Arc<dyn ConfigurationStep>>,
    wrappers: DependencyList<AppWrapperFactory>,
    hooks: Arc<HookRegistry>,
    milestones: Arc<Milestones>,
    started: AtomicBool,
}

impl Default for Configurator {
    fn default() -> Self {
        Self::new()
    }
}

impl Configurator {
    /// No steps registered.
    pub fn new() -> Self {
        Configurator {
            blueprint: Conf::new(),
            coercions: BTreeMap::new(),
            steps: DependencyList::new(),
            wrappers: DependencyList::new(),
            hooks: Arc::new(HookRegistry::new()),
            milestones: Arc::new(Milestones::default()),
            started: AtomicBool::new(false),
        }
    }

    /// Paths, dispatch, MIME types, globals, helpers, rendering and the registry.
    pub fn minimal() -> Result<Self, RegistrationError> {
        let mut cfg = Self::new();
        cfg.register(steps::PathsStep, After::Middle)?;
        cfg.register(steps::DispatchStep::new(), After::Middle)?;
        cfg.register(steps::MimeTypesStep, After::Middle)?;
        cfg.register(steps::AppGlobalsStep, After::Middle)?;
        cfg.register(steps::HelpersStep, After::Middle)?;
        cfg.register(steps::RenderingStep::new(), After::Middle)?;
        cfg.register(steps::RegistryStep, After::Middle)?;
        Ok(cfg)
    }

    /// Every built-in step.
    pub fn full() -> Result<Self, RegistrationError> {
        let mut cfg = Self::minimal()?;
        cfg.register(steps::ErrorPageStep, After::Middle)?;
        cfg.register(steps::SessionStep, After::Middle)?;
        cfg.register(steps::CacheStep, After::Middle)?;
        cfg.register(steps::I18nStep, After::Middle)?;
        cfg.register(steps::AuthStep, After::Middle)?;
        cfg.register(steps::IdentityStep, After::Middle)?;
        cfg.register(steps::TransactionStep, After::Middle)?;
        cfg.register(steps::SqlAlchemyStep, After::Middle)?;
        cfg.register(steps::MingStep, After::Middle)?;
        cfg.register(steps::StaticFilesStep, After::Middle)?;
        cfg.register(steps::SlowRequestsStep, After::Middle)?;
        cfg.register(steps::ErrorReportingStep, After::Middle)?;
        cfg.register(steps::DebuggerStep, After::Middle)?;
        Ok(cfg)
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn milestones(&self) -> &Arc<Milestones> {
        &self.milestones
    }

    fn build_context(&self) -> BuildContext {
        BuildContext {
            hooks: self.hooks.clone(),
            milestones: self.milestones.clone(),
        }
    }

    /// Merge options into the blueprint, overwriting existing values.
    pub fn update_blueprint<K, V, I>(&mut self, options: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (k, v) in options {
            self.blueprint.set(k, v);
        }
    }

    /// Store a non-data value (controller, globals, plugin) in the blueprint.
    pub fn update_blueprint_service<T: Any + Send + Sync>(&mut self, key: &str, value: T) {
        self.blueprint.set_service(key, value);
    }

    pub fn get_blueprint_value(&self, key: &str) -> Option<&Value> {
        self.blueprint.get(key)
    }

    pub fn get_blueprint_view(&mut self, prefix: &str) -> BlueprintView<'_> {
        BlueprintView::new(&mut self.blueprint, prefix)
    }

    pub fn blueprint(&self) -> &Conf {
        &self.blueprint
    }

    pub fn register<S: ConfigurationStep>(&mut self, step: S, after: impl Into<After>) -> Result<(), RegistrationError> {
        self.register_arc(Arc::new(step), after.into())
    }

    fn register_arc(&mut self, step: Arc<dyn ConfigurationStep>, after: After) -> Result<(), RegistrationError> {
        let id = step.id().to_string();
        if self.steps.contains(&id) {
            return Err(RegistrationError::DuplicateKey(id));
        }
        step.on_bind(self)?;
        self.blueprint.merge_defaults(&step.defaults());
        for (key, coercion) in step.coercions() {
            self.coercions.insert(key, coercion);
        }
        tracing::debug!(step = %id, "registered configuration step");
        self.steps.add(id, step, after)
    }

    /// Substitute the step registered under `id`, keeping its position.
    pub fn replace<S: ConfigurationStep>(&mut self, id: &str, step: S) -> Result<Arc<dyn ConfigurationStep>, RegistrationError> {
        if !self.steps.contains(id) {
            return Err(RegistrationError::UnknownKey(id.to_string()));
        }
        let step: Arc<dyn ConfigurationStep> = Arc::new(step);
        step.on_bind(self)?;
        self.blueprint.merge_defaults(&step.defaults());
        for (key, coercion) in step.coercions() {
            self.coercions.insert(key, coercion);
        }
        self.steps.replace(id, step)
    }

    pub fn get_step<S: ConfigurationStep>(&self, id: &str) -> Option<&S> {
        self.steps.get(id).and_then(|step| step.as_any().downcast_ref::<S>())
    }

    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.keys()
    }

    /// Later registrations only affect applications made afterwards.
    pub fn register_application_wrapper(
        &mut self,
        key: &str,
        factory: AppWrapperFactory,
        after: impl Into<After>,
    ) -> Result<(), RegistrationError> {
        if self.milestones.environment_loaded.is_reached() {
            tracing::warn!(wrapper = key, "application wrapper registered after environment_loaded");
        }
        self.wrappers.add(key, factory, after)
    }

    pub fn application_wrappers(&self) -> Vec<&str> {
        self.wrappers.keys()
    }

    pub fn add_coercion(&mut self, key: &str, coercion: Coercion) {
        self.coercions.insert(key.to_string(), coercion);
    }

    fn coerce(&self, conf: &mut Conf) -> Result<(), ConfigError> {
        for (key, coercion) in &self.coercions {
            let Some(value) = conf.get(key) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let coerced = coercion
                .apply(value)
                .map_err(|reason| config::conf::coercion_error(key, value, reason))?;
            conf.set(key.clone(), coerced);
        }
        Ok(())
    }

    /// Build the configuration of one application.
    pub fn load_environment(
        &self,
        global_conf: &Map<String, Value>,
        app_conf: &Map<String, Value>,
    ) -> Result<Conf, ConfigError> {
        let ctx = self.build_context();
        let mut conf = self.blueprint.clone();
        conf.merge_options(global_conf);
        conf.merge_options(app_conf);
        self.coerce(&mut conf)?;
        config::validate(&conf)?;

        for (id, step) in self.steps.iter() {
            tracing::debug!(step = id, "before_config");
            step.before_config(&mut conf, &ctx)?;
        }
        self.hooks.notify_config(ConfigEvent::InitializedConfig, &mut conf);

        for (id, step) in self.steps.iter() {
            tracing::debug!(step = id, "config_ready");
            step.config_ready(&mut conf, &ctx)?;
        }
        self.milestones.config_ready.reach();
        self.hooks.notify_config(ConfigEvent::ConfigSetup, &mut conf);

        self.milestones.environment_loaded.reach();
        Ok(conf)
    }

    /// Run environment-loaded and app-ready actions around a new dispatch core.
    pub fn make_app(
        &self,
        mut conf: Conf,
        wrap_app: Option<&dyn Fn(BoxedApp) -> BoxedApp>,
    ) -> Result<BoxedApp, ConfigError> {
        let ctx = self.build_context();
        for (id, step) in self.steps.iter() {
            tracing::debug!(step = id, "environment_loaded");
            step.environment_loaded(&mut conf, &ctx)?;
        }

        if !self.started.swap(true, Ordering::SeqCst) {
            self.hooks.notify_config(ConfigEvent::Startup, &mut conf);
        }

        let core: BoxedApp = Arc::new(TgApp::new(conf.clone(), &self.wrappers, self.hooks.clone())?);
        self.hooks.notify_app(AppEvent::ConfigureNewApp, core.clone(), &conf);

        let mut app = match wrap_app {
            Some(wrap) => wrap(core),
            None => core,
        };
        app = self.hooks.notify_app(AppEvent::BeforeWsgiMiddlewares, app, &conf);
        for (id, step) in self.steps.iter() {
            tracing::debug!(step = id, "app_ready");
            app = step.app_ready(app, &conf, &ctx)?;
        }
        app = self.hooks.notify_app(AppEvent::AfterWsgiMiddlewares, app, &conf);
        Ok(app)
    }

    pub fn make_wsgi_app(&self, app_conf: &Map<String, Value>) -> Result<BoxedApp, ConfigError> {
        let conf = self.load_environment(&Map::new(), app_conf)?;
        self.make_app(conf, None)
    }

    pub fn make_wsgi_app_from(&self, deployment: &config::DeploymentConfig) -> Result<BoxedApp, ConfigError> {
        let conf = self.load_environment(&deployment.global, &deployment.app)?;
        self.make_app(conf, None)
    }

    /// Fire the shutdown hooks.
    pub fn shutdown(&self) {
        let mut conf = self.blueprint.clone();
        self.hooks.notify_config(ConfigEvent::Shutdown, &mut conf);
    }
}

impl std::fmt::Debug for Configurator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configurator")
            .field("steps", &self.steps.keys())
            .field("wrappers", &self.wrappers.keys())
            .finish()
    }
}
