//! Per-request context: the objects a controller and the wrappers around it share.

use super::{keys, Environ};
use crate::cache::CacheManager;
use crate::config::Conf;
use crate::error::{AppError, ConfigError, RegistryError};
use crate::globals::AppGlobals;
use crate::http::{Params, Request, RequestOptions, Response, ResponseOptions};
use crate::i18n::{sanitize_language_code, Catalogs, Translator};
use crate::registry::{locals, Registry};
use crate::session::Session;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Routing match as left by routing middleware under `wsgiorg.routing_args`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoutingArgs {
    pub args: Vec<String>,
    pub kwargs: Map<String, Value>,
}

impl RoutingArgs {
    pub fn new(args: Vec<String>, kwargs: Map<String, Value>) -> Self {
        RoutingArgs { args, kwargs }
    }

    /// Routing args used when no router ran: the path segments and the root controller.
    pub fn from_path(environ: &Environ) -> Self {
        let mut kwargs = Map::new();
        kwargs.insert("controller".into(), Value::String("root".into()));
        RoutingArgs {
            args: environ.path_segments(),
            kwargs,
        }
    }

    pub fn controller(&self) -> &str {
        self.kwargs.get("controller").and_then(Value::as_str).unwrap_or("root")
    }

    /// Keyword arguments other than `controller`, as request parameters.
    pub fn params(&self) -> Params {
        self.kwargs
            .iter()
            .filter(|(k, _)| k.as_str() != "controller")
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect()
    }
}

/// Values handed to templates. Strict contexts fail on unknown names.
#[derive(Debug, Default)]
pub struct TemplateContext {
    strict: bool,
    values: RwLock<Map<String, Value>>,
}

impl TemplateContext {
    pub fn new(strict: bool) -> Self {
        TemplateContext {
            strict,
            values: RwLock::new(Map::new()),
        }
    }

    /// Unknown names give `""` unless the context is strict.
    pub fn get(&self, name: &str) -> Result<Value, AppError> {
        match self.values.read().get(name) {
            Some(v) => Ok(v.clone()),
            None if self.strict => Err(AppError::Render(format!("template context has no attribute {name:?}"))),
            None => Ok(Value::String(String::new())),
        }
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) {
        self.values.write().insert(name.to_string(), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.read().contains_key(name)
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.values.read().clone()
    }
}

/// Builds URLs relative to the application mount point.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UrlGenerator {
    script_name: String,
    host_url: String,
}

impl UrlGenerator {
    pub fn new(script_name: impl Into<String>, host_url: impl Into<String>) -> Self {
        UrlGenerator {
            script_name: script_name.into(),
            host_url: host_url.into(),
        }
    }

    /// Absolute paths get the `SCRIPT_NAME` prefix; `params` become the query string.
    pub fn url(&self, path: &str, params: &[(&str, &str)]) -> String {
        let mut out = if path.starts_with('/') {
            format!("{}{}", self.script_name.trim_end_matches('/'), path)
        } else {
            path.to_string()
        };
        if !params.is_empty() {
            let query: Params = params.iter().map(|(k, v)| (*k, *v)).collect();
            out.push(if out.contains('?') { '&' } else { '?' });
            out.push_str(&query.to_query());
        }
        out
    }

    pub fn qualified(&self, path: &str, params: &[(&str, &str)]) -> String {
        format!("{}{}", self.host_url, self.url(path, params))
    }
}

/// Lifecycle of a request context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    Init,
    Registered,
    Dispatching,
    Responded,
    Cleaning,
    Done,
}

/// Everything needed to create contexts for one application.
pub struct ContextFactory {
    conf: Arc<Conf>,
    app_globals: Arc<AppGlobals>,
    request_options: RequestOptions,
    response_options: ResponseOptions,
    default_lang: Option<String>,
    catalogs: Arc<Catalogs>,
    strict_tmpl_context: bool,
}

impl ContextFactory {
    /// Fails when request, response or template options cannot be coerced.
    pub fn new(conf: Arc<Conf>) -> Result<Self, ConfigError> {
        let app_globals = conf
            .service::<Arc<AppGlobals>>("tg.app_globals")
            .unwrap_or_default();
        let catalogs = conf.service::<Arc<Catalogs>>("i18n.catalogs").unwrap_or_default();
        Ok(ContextFactory {
            request_options: RequestOptions::from_conf(&conf)?,
            response_options: ResponseOptions::from_conf(&conf),
            default_lang: conf.get_str("i18n.lang").map(sanitize_language_code),
            strict_tmpl_context: conf.bool_or("tg.strict_tmpl_context", true)?,
            app_globals,
            catalogs,
            conf,
        })
    }

    pub fn conf(&self) -> &Arc<Conf> {
        &self.conf
    }

    pub fn catalogs(&self) -> &Arc<Catalogs> {
        &self.catalogs
    }

    pub fn default_lang(&self) -> Option<&str> {
        self.default_lang.as_deref()
    }

    pub fn build(self: &Arc<Self>, environ: &Environ, registry: Registry) -> Result<RequestContext, AppError> {
        let routes = environ
            .var::<RoutingArgs>(keys::ROUTING_ARGS)
            .unwrap_or_else(|| Arc::new(RoutingArgs::from_path(environ)));
        let languages = self.default_lang.iter().cloned().collect();
        Ok(RequestContext {
            request: Arc::new(Request::from_environ(environ, &self.request_options)?),
            response: Arc::new(Mutex::new(Response::new(&self.response_options))),
            tmpl_context: Arc::new(TemplateContext::new(self.strict_tmpl_context)),
            app_globals: self.app_globals.clone(),
            config: self.conf.clone(),
            translator: Arc::new(Translator::new(languages, &self.catalogs)),
            session: environ.var::<Session>(keys::SESSION),
            cache: environ.var::<CacheManager>(keys::CACHE),
            url: Arc::new(UrlGenerator::new(environ.script_name.clone(), environ.host_url())),
            routes,
            registry,
            factory: self.clone(),
            state: ContextState::Init,
        })
    }
}

impl fmt::Debug for ContextFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextFactory")
            .field("default_lang", &self.default_lang)
            .field("strict_tmpl_context", &self.strict_tmpl_context)
            .finish()
    }
}

/// The request-local objects of one request.
#[derive(Clone)]
pub struct RequestContext {
    pub request: Arc<Request>,
    pub response: Arc<Mutex<Response>>,
    pub tmpl_context: Arc<TemplateContext>,
    pub app_globals: Arc<AppGlobals>,
    pub config: Arc<Conf>,
    pub translator: Arc<Translator>,
    pub session: Option<Arc<Session>>,
    pub cache: Option<Arc<CacheManager>>,
    pub url: Arc<UrlGenerator>,
    pub routes: Arc<RoutingArgs>,
    registry: Registry,
    factory: Arc<ContextFactory>,
    state: ContextState,
}

impl RequestContext {
    pub fn state(&self) -> ContextState {
        self.state
    }

    pub(crate) fn advance(&mut self, state: ContextState) {
        tracing::trace!(from = ?self.state, to = ?state, "context state");
        self.state = state;
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn factory(&self) -> &Arc<ContextFactory> {
        &self.factory
    }

    /// Bind every object of this context to its proxy.
    pub fn publish(&self) -> Result<(), RegistryError> {
        let r = &self.registry;
        r.register(&locals::REQUEST, self.request.clone())?;
        r.register(&locals::RESPONSE, self.response.clone())?;
        r.register(&locals::TMPL_CONTEXT, self.tmpl_context.clone())?;
        r.register(&locals::APP_GLOBALS, self.app_globals.clone())?;
        r.register(&locals::CONFIG, self.config.clone())?;
        r.register(&locals::TRANSLATOR, self.translator.clone())?;
        r.register(&locals::URL, self.url.clone())?;
        if let Some(session) = &self.session {
            r.register(&locals::SESSION, session.clone())?;
        }
        if let Some(cache) = &self.cache {
            r.register(&locals::CACHE, cache.clone())?;
        }
        r.register(&locals::CONTEXT, Arc::new(self.clone()))
    }

    pub fn set_translator(&mut self, translator: Translator) -> Result<(), RegistryError> {
        self.translator = Arc::new(translator);
        self.registry.register(&locals::TRANSLATOR, self.translator.clone())?;
        self.republish_context()
    }

    pub fn set_session(&mut self, session: Arc<Session>) -> Result<(), RegistryError> {
        self.registry.register(&locals::SESSION, session.clone())?;
        self.session = Some(session);
        self.republish_context()
    }

    pub fn set_cache(&mut self, cache: Arc<CacheManager>) -> Result<(), RegistryError> {
        self.registry.register(&locals::CACHE, cache.clone())?;
        self.cache = Some(cache);
        self.republish_context()
    }

    /// Start over with a fresh response, for retried requests.
    pub fn reset_response(&mut self) -> Result<(), RegistryError> {
        self.response = Arc::new(Mutex::new(Response::new(&self.factory.response_options)));
        self.registry.register(&locals::RESPONSE, self.response.clone())?;
        self.republish_context()
    }

    /// Replace this context with one built from `environ`, keeping the session and cache.
    pub fn rebuild(&mut self, environ: &Environ) -> Result<(), AppError> {
        let mut fresh = self.factory.build(environ, self.registry.clone())?;
        fresh.session = fresh.session.or_else(|| self.session.clone());
        fresh.cache = fresh.cache.or_else(|| self.cache.clone());
        fresh.state = self.state;
        fresh.publish()?;
        *self = fresh;
        Ok(())
    }

    fn republish_context(&self) -> Result<(), RegistryError> {
        self.registry.register(&locals::CONTEXT, Arc::new(self.clone()))
    }

    pub fn gettext(&self, msgid: &str) -> String {
        self.translator.gettext(msgid)
    }

    pub fn url(&self, path: &str, params: &[(&str, &str)]) -> String {
        self.url.url(path, params)
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("path", &self.request.path_info)
            .field("controller", &self.routes.controller())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> Arc<ContextFactory> {
        let mut conf = Conf::new();
        conf.set("i18n.lang", "pt-br");
        Arc::new(ContextFactory::new(Arc::new(conf)).unwrap())
    }

    #[test]
    fn routing_defaults_to_root_controller() {
        let routes = RoutingArgs::from_path(&Environ::get("/a/b"));
        assert_eq!(routes.controller(), "root");
        assert_eq!(routes.args, vec!["a", "b"]);
    }

    #[test]
    fn template_context_strictness() {
        let strict = TemplateContext::new(true);
        assert!(strict.get("missing").is_err());
        let lenient = TemplateContext::new(false);
        assert_eq!(lenient.get("missing").unwrap(), Value::String(String::new()));
        lenient.set("title", "x");
        assert_eq!(lenient.get("title").unwrap(), Value::from("x"));
    }

    #[test]
    fn urls_honour_script_name() {
        let url = UrlGenerator::new("/app", "http://h");
        assert_eq!(url.url("/users", &[("page", "2")]), "/app/users?page=2");
        assert_eq!(url.url("relative", &[]), "relative");
        assert_eq!(url.qualified("/", &[]), "http://h/app/");
    }

    #[test]
    fn publish_binds_and_rebuild_replaces() {
        let registry = Registry::new();
        registry.prepare();
        let ctx_factory = factory();
        let mut ctx = ctx_factory.build(&Environ::get("/first"), registry.clone()).unwrap();
        assert_eq!(ctx.translator.languages(), ["pt_BR".to_string()]);
        ctx.publish().unwrap();
        assert_eq!(locals::REQUEST.current_obj().unwrap().path_info, "/first");

        ctx.rebuild(&Environ::get("/second")).unwrap();
        assert_eq!(locals::REQUEST.depth(), 1);
        assert_eq!(locals::REQUEST.current_obj().unwrap().path_info, "/second");
        assert_eq!(locals::CONTEXT.current_obj().unwrap().request.path_info, "/second");

        registry.cleanup().unwrap();
        assert!(!locals::in_request());
    }
}
