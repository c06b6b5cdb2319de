//! Named extension points fired while building an application and while serving requests.

use crate::config::Conf;
use crate::wsgi::{BoxedApp, RequestContext};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConfigEvent {
    InitializedConfig,
    ConfigSetup,
    Startup,
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AppEvent {
    /// Observes the new dispatch core; the returned app is ignored.
    ConfigureNewApp,
    BeforeWsgiMiddlewares,
    AfterWsgiMiddlewares,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestEvent {
    BeforeCall,
    BeforeRender,
    AfterRender,
    AfterCall,
}

pub type ConfigHook = Arc<dyn Fn(&mut Conf) + Send + Sync>;
pub type AppHook = Arc<dyn Fn(BoxedApp, &Conf) -> BoxedApp + Send + Sync>;
pub type RequestHook = Arc<dyn Fn(&mut RequestContext) + Send + Sync>;

#[derive(Default)]
pub struct HookRegistry {
    config: RwLock<HashMap<ConfigEvent, Vec<ConfigHook>>>,
    app: RwLock<HashMap<AppEvent, Vec<AppHook>>>,
    request: RwLock<HashMap<RequestEvent, Vec<RequestHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_config(&self, event: ConfigEvent, hook: impl Fn(&mut Conf) + Send + Sync + 'static) {
        self.config.write().entry(event).or_default().push(Arc::new(hook));
    }

    pub fn register_app(&self, event: AppEvent, hook: impl Fn(BoxedApp, &Conf) -> BoxedApp + Send + Sync + 'static) {
        self.app.write().entry(event).or_default().push(Arc::new(hook));
    }

    pub fn register_request(&self, event: RequestEvent, hook: impl Fn(&mut RequestContext) + Send + Sync + 'static) {
        self.request.write().entry(event).or_default().push(Arc::new(hook));
    }

    pub fn notify_config(&self, event: ConfigEvent, conf: &mut Conf) {
        let hooks = self.config.read().get(&event).cloned().unwrap_or_default();
        tracing::debug!(?event, count = hooks.len(), "config hooks");
        for hook in hooks {
            hook(conf);
        }
    }

    /// Threads `app` through every hook; each sees the previous hook's result.
    pub fn notify_app(&self, event: AppEvent, app: BoxedApp, conf: &Conf) -> BoxedApp {
        let hooks = self.app.read().get(&event).cloned().unwrap_or_default();
        tracing::debug!(?event, count = hooks.len(), "app hooks");
        hooks.into_iter().fold(app, |app, hook| hook(app, conf))
    }

    pub fn notify_request(&self, event: RequestEvent, context: &mut RequestContext) {
        let hooks = match self.request.read().get(&event) {
            Some(hooks) if !hooks.is_empty() => hooks.clone(),
            _ => return,
        };
        for hook in hooks {
            hook(context);
        }
    }

    pub fn count(&self) -> usize {
        self.config.read().values().map(Vec::len).sum::<usize>()
            + self.app.read().values().map(Vec::len).sum::<usize>()
            + self.request.read().values().map(Vec::len).sum::<usize>()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry").field("hooks", &self.count()).finish()
    }
}
