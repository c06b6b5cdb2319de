use crate::config::Conf;
use crate::configurator::{BuildContext, ConfigurationStep, Configurator, Milestones};
use crate::error::{ConfigError, RegistrationError};
use crate::wsgi::controller::{ControllerCallers, ControllerWrapper};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Owns the root controller and the controller wrappers.
///
/// Wrappers registered with a controller name only decorate that controller;
/// the others decorate every controller.
#[derive(Default)]
pub struct DispatchStep {
    wrappers: Mutex<Vec<(ControllerWrapper, Option<String>)>>,
    milestones: OnceLock<Arc<Milestones>>,
}

impl DispatchStep {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applications built before this call keep their callers.
    pub fn register_controller_wrapper(&self, wrapper: ControllerWrapper, controller: Option<&str>) {
        if self.milestones.get().is_some_and(|m| m.environment_loaded.is_reached()) {
            tracing::warn!(
                controller = controller.unwrap_or("*"),
                "controller wrapper registered after environment_loaded, only new applications see it"
            );
        }
        self.wrappers.lock().push((wrapper, controller.map(str::to_string)));
    }

    pub fn wrapper_count(&self) -> usize {
        self.wrappers.lock().len()
    }

    fn callers(&self) -> ControllerCallers {
        let wrappers = self.wrappers.lock();
        let mut global = Vec::new();
        let mut specific: HashMap<String, Vec<ControllerWrapper>> = HashMap::new();
        for (wrapper, controller) in wrappers.iter() {
            match controller {
                Some(name) => specific.entry(name.clone()).or_default().push(wrapper.clone()),
                None => global.push(wrapper.clone()),
            }
        }
        ControllerCallers::build(&global, &specific)
    }
}

impl ConfigurationStep for DispatchStep {
    fn id(&self) -> &str {
        "dispatch"
    }

    fn on_bind(&self, configurator: &mut Configurator) -> Result<(), RegistrationError> {
        let _ = self.milestones.set(configurator.milestones().clone());
        Ok(())
    }

    fn before_config(&self, conf: &mut Conf, _ctx: &BuildContext) -> Result<(), ConfigError> {
        for (from, to) in [("root_controller", "tg.root_controller"), ("controllers", "tg.controllers")] {
            if let Some(service) = conf.take_service(from) {
                conf.set_service_raw(to, service);
            }
        }
        Ok(())
    }

    fn environment_loaded(&self, conf: &mut Conf, _ctx: &BuildContext) -> Result<(), ConfigError> {
        let callers = self.callers();
        tracing::debug!(wrappers = self.wrapper_count(), "controller caller built");
        conf.set_service("controller_caller", Arc::new(callers));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
