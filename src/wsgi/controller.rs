//! Controllers, their lookup by routing name, and the caller chain wrapped around them.

use super::context::RequestContext;
use crate::case::controller_class_name;
use crate::config::Conf;
use crate::error::AppError;
use crate::http::{Params, Response};
use crate::render::CacheOptions;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub trait Controller: Send + Sync {
    /// `remainder` holds the positional routing args, `params` the request and keyword args.
    fn call(&self, ctx: &mut RequestContext, remainder: &[String], params: &Params) -> Result<Output, AppError>;
}

impl<F> Controller for F
where
    F: Fn(&mut RequestContext, &[String], &Params) -> Result<Output, AppError> + Send + Sync,
{
    fn call(&self, ctx: &mut RequestContext, remainder: &[String], params: &Params) -> Result<Output, AppError> {
        self(ctx, remainder, params)
    }
}

/// What a controller produced.
#[derive(Debug)]
pub enum Output {
    /// Rendered by the default renderer.
    Data(Map<String, Value>),
    Render {
        engine: Option<String>,
        template: String,
        vars: Map<String, Value>,
        cache: CacheOptions,
    },
    /// Body text; the response keeps its content type.
    Text(String),
    Bytes(String, Vec<u8>),
    Response(Response),
}

impl Output {
    pub fn render(template: impl Into<String>, vars: Map<String, Value>) -> Self {
        Output::Render {
            engine: None,
            template: template.into(),
            vars,
            cache: CacheOptions::default(),
        }
    }

    /// `engine:template` selects a renderer other than the default.
    pub fn render_with(target: &str, vars: Map<String, Value>) -> Self {
        match target.split_once(':') {
            Some((engine, template)) => Output::Render {
                engine: Some(engine.to_string()),
                template: template.to_string(),
                vars,
                cache: CacheOptions::default(),
            },
            None => Self::render(target, vars),
        }
    }

    pub fn cached(self, cache: CacheOptions) -> Self {
        match self {
            Output::Render {
                engine, template, vars, ..
            } => Output::Render {
                engine,
                template,
                vars,
                cache,
            },
            other => other,
        }
    }

    /// Objects become `Data`; any other value is wrapped as `{"value": ...}`.
    pub fn data(value: Value) -> Self {
        match value {
            Value::Object(map) => Output::Data(map),
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                Output::Data(map)
            }
        }
    }
}

impl From<Map<String, Value>> for Output {
    fn from(map: Map<String, Value>) -> Self {
        Output::Data(map)
    }
}

impl From<String> for Output {
    fn from(text: String) -> Self {
        Output::Text(text)
    }
}

impl From<&str> for Output {
    fn from(text: &str) -> Self {
        Output::Text(text.to_string())
    }
}

impl From<Response> for Output {
    fn from(response: Response) -> Self {
        Output::Response(response)
    }
}

/// A shared controller, or a constructor run once per request.
#[derive(Clone)]
pub enum ControllerFactory {
    Instance(Arc<dyn Controller>),
    Class(Arc<dyn Fn() -> Arc<dyn Controller> + Send + Sync>),
}

impl ControllerFactory {
    pub fn instance(controller: impl Controller + 'static) -> Self {
        ControllerFactory::Instance(Arc::new(controller))
    }

    pub fn class<C, F>(build: F) -> Self
    where
        C: Controller + 'static,
        F: Fn() -> C + Send + Sync + 'static,
    {
        ControllerFactory::Class(Arc::new(move || Arc::new(build()) as Arc<dyn Controller>))
    }

    pub fn instantiate(&self) -> Arc<dyn Controller> {
        match self {
            ControllerFactory::Instance(c) => c.clone(),
            ControllerFactory::Class(build) => build(),
        }
    }

    pub fn is_class(&self) -> bool {
        matches!(self, ControllerFactory::Class(_))
    }
}

impl fmt::Debug for ControllerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerFactory::Instance(_) => f.write_str("ControllerFactory::Instance"),
            ControllerFactory::Class(_) => f.write_str("ControllerFactory::Class"),
        }
    }
}

/// The controller selected for one request.
#[derive(Clone)]
pub struct ControllerHandle {
    pub name: String,
    pub controller: Arc<dyn Controller>,
}

impl ControllerHandle {
    pub fn new(name: impl Into<String>, controller: Arc<dyn Controller>) -> Self {
        ControllerHandle {
            name: name.into(),
            controller,
        }
    }
}

impl fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerHandle").field("name", &self.name).finish()
    }
}

/// Controller modules by dotted path, each exporting classes by name.
#[derive(Clone, Default)]
pub struct ControllerNamespace {
    modules: HashMap<String, HashMap<String, ControllerFactory>>,
}

impl ControllerNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: &str, class: &str, factory: ControllerFactory) {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(class.to_string(), factory);
    }

    /// Register under the conventional module and class of routing name `name`.
    pub fn register_controller(&mut self, package: Option<&str>, name: &str, factory: ControllerFactory) {
        let module = Self::module_path(package, name);
        self.register(&module, &controller_class_name(name), factory);
    }

    /// `<package>.controllers.<name>`.
    pub fn module_path(package: Option<&str>, name: &str) -> String {
        match package {
            Some(package) => format!("{package}.controllers.{name}"),
            None => format!("controllers.{name}"),
        }
    }

    /// `Ok(None)` when the module does not exist; an error when the module lacks the class.
    pub fn lookup(&self, package: Option<&str>, name: &str) -> Result<Option<ControllerFactory>, AppError> {
        let module = Self::module_path(package, name);
        let Some(classes) = self.modules.get(&module) else {
            return Ok(None);
        };
        let class = controller_class_name(name);
        classes
            .get(&class)
            .cloned()
            .map(Some)
            .ok_or_else(|| AppError::ControllerLookup(format!("module {module} has no class {class}")))
    }

    pub fn modules(&self) -> Vec<&str> {
        let mut modules: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        modules.sort_unstable();
        modules
    }
}

impl fmt::Debug for ControllerNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerNamespace").field("modules", &self.modules()).finish()
    }
}

/// Routes the first remainder segment to a sub-controller.
pub struct ObjectController {
    index: Option<Arc<dyn Controller>>,
    routes: HashMap<String, Arc<dyn Controller>>,
    default: Option<Arc<dyn Controller>>,
}

impl ObjectController {
    pub fn new() -> Self {
        ObjectController {
            index: None,
            routes: HashMap::new(),
            default: None,
        }
    }

    pub fn index(mut self, controller: impl Controller + 'static) -> Self {
        self.index = Some(Arc::new(controller));
        self
    }

    pub fn route(mut self, segment: &str, controller: impl Controller + 'static) -> Self {
        self.routes.insert(segment.to_string(), Arc::new(controller));
        self
    }

    /// Catch-all receiving the whole remainder.
    pub fn fallback(mut self, controller: impl Controller + 'static) -> Self {
        self.default = Some(Arc::new(controller));
        self
    }
}

impl Controller for ObjectController {
    fn call(&self, ctx: &mut RequestContext, remainder: &[String], params: &Params) -> Result<Output, AppError> {
        match remainder.split_first() {
            None => match &self.index {
                Some(index) => index.call(ctx, remainder, params),
                None => Err(AppError::not_found("no index")),
            },
            Some((head, rest)) => {
                if let Some(route) = self.routes.get(head) {
                    return route.call(ctx, rest, params);
                }
                match &self.default {
                    Some(default) => default.call(ctx, remainder, params),
                    None => Err(AppError::not_found(format!("no route for {head}"))),
                }
            }
        }
    }
}

/// Invokes a controller; controller wrappers are callers around callers.
pub trait ControllerCaller: Send + Sync {
    fn call(
        &self,
        conf: &Conf,
        controller: &ControllerHandle,
        ctx: &mut RequestContext,
        remainder: &[String],
        params: &Params,
    ) -> Result<Output, AppError>;
}

impl<F> ControllerCaller for F
where
    F: Fn(&Conf, &ControllerHandle, &mut RequestContext, &[String], &Params) -> Result<Output, AppError> + Send + Sync,
{
    fn call(
        &self,
        conf: &Conf,
        controller: &ControllerHandle,
        ctx: &mut RequestContext,
        remainder: &[String],
        params: &Params,
    ) -> Result<Output, AppError> {
        self(conf, controller, ctx, remainder, params)
    }
}

pub type Caller = Arc<dyn ControllerCaller>;

/// Builds a caller around the next one.
pub type ControllerWrapper = Arc<dyn Fn(Caller) -> Caller + Send + Sync>;

struct BaseCaller;

impl ControllerCaller for BaseCaller {
    fn call(
        &self,
        _conf: &Conf,
        controller: &ControllerHandle,
        ctx: &mut RequestContext,
        remainder: &[String],
        params: &Params,
    ) -> Result<Output, AppError> {
        controller.controller.call(ctx, remainder, params)
    }
}

/// Effective callers: one shared by every controller, plus those of decorated controllers.
#[derive(Clone)]
pub struct ControllerCallers {
    default: Caller,
    by_controller: HashMap<String, Caller>,
}

impl Default for ControllerCallers {
    fn default() -> Self {
        ControllerCallers {
            default: Arc::new(BaseCaller),
            by_controller: HashMap::new(),
        }
    }
}

impl ControllerCallers {
    /// Each wrapper wraps the caller built so far, so the last registered runs first.
    /// Controller-specific wrappers sit inside the global ones.
    pub fn build(global: &[ControllerWrapper], specific: &HashMap<String, Vec<ControllerWrapper>>) -> Self {
        let wrap_all = |base: Caller, wrappers: &[ControllerWrapper]| {
            wrappers.iter().fold(base, |caller, wrapper| wrapper(caller))
        };
        let base: Caller = Arc::new(BaseCaller);
        let by_controller = specific
            .iter()
            .map(|(name, wrappers)| {
                let inner = wrap_all(base.clone(), wrappers);
                (name.clone(), wrap_all(inner, global))
            })
            .collect();
        ControllerCallers {
            default: wrap_all(base, global),
            by_controller,
        }
    }

    pub fn for_controller(&self, name: &str) -> &Caller {
        self.by_controller.get(name).unwrap_or(&self.default)
    }

    /// Names of the controllers with their own wrappers, sorted.
    pub fn decorated(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_controller.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ControllerCallers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerCallers").field("decorated", &self.decorated()).finish()
    }
}
