//! Dispatch core: builds the request context, resolves the controller and runs the wrapper chain.

use super::context::{ContextFactory, ContextState, RequestContext};
use super::controller::{ControllerCallers, ControllerFactory, ControllerHandle, ControllerNamespace, Output};
use super::{keys, Environ, WsgiApp, WsgiResponse};
use crate::config::Conf;
use crate::configurator::{HookRegistry, RequestEvent};
use crate::deps::DependencyList;
use crate::error::{AppError, ConfigError};
use crate::http::Response;
use crate::registry::{Registry, ScopeGuard};
use crate::render::{cached_template, Renderers};
use crate::wrappers::{build_chain, AppWrapperFactory, Handler, RequestHandler};
use axum::http::StatusCode;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Innermost handler of the wrapper chain: calls the controller and renders its output.
struct ControllerInvoker {
    conf: Arc<Conf>,
    callers: Arc<ControllerCallers>,
    renderers: Arc<Renderers>,
    hooks: Arc<HookRegistry>,
}

impl ControllerInvoker {
    fn render(&self, output: Output, ctx: &mut RequestContext) -> Result<(), AppError> {
        match output {
            Output::Data(vars) => self.render_template(None, "", vars, &Default::default(), ctx),
            Output::Render {
                engine,
                template,
                vars,
                cache,
            } => self.render_template(engine.as_deref(), &template, vars, &cache, ctx),
            Output::Text(text) => {
                ctx.response.lock().set_text(text);
                Ok(())
            }
            Output::Bytes(content_type, bytes) => {
                let mut response = ctx.response.lock();
                response.set_content_type(content_type);
                response.body = bytes;
                Ok(())
            }
            Output::Response(response) => {
                *ctx.response.lock() = response;
                Ok(())
            }
        }
    }

    fn render_template(
        &self,
        engine: Option<&str>,
        template: &str,
        vars: serde_json::Map<String, serde_json::Value>,
        cache: &crate::render::CacheOptions,
        ctx: &mut RequestContext,
    ) -> Result<(), AppError> {
        self.hooks.notify_request(RequestEvent::BeforeRender, ctx);
        let (name, renderer) = self.renderers.resolve(engine)?;
        let mut all = ctx.tmpl_context.to_map();
        all.extend(vars);
        let body = cached_template(name, renderer.as_ref(), template, &all, cache, ctx.cache.as_deref())?;
        {
            let mut response = ctx.response.lock();
            response.set_content_type(renderer.content_type());
            response.set_text(body);
        }
        self.hooks.notify_request(RequestEvent::AfterRender, ctx);
        Ok(())
    }
}

impl RequestHandler for ControllerInvoker {
    fn handle(
        &self,
        controller: &ControllerHandle,
        _environ: &mut Environ,
        ctx: &mut RequestContext,
    ) -> Result<Response, AppError> {
        ctx.advance(ContextState::Dispatching);
        self.hooks.notify_request(RequestEvent::BeforeCall, ctx);

        let mut params = ctx.request.params();
        params.extend(&ctx.routes.params());
        let remainder = ctx.routes.args.clone();
        let caller = self.callers.for_controller(&controller.name).clone();

        match caller.call(&self.conf, controller, ctx, &remainder, &params) {
            Ok(output) => self.render(output, ctx)?,
            Err(AppError::Http { status, message }) => {
                tracing::debug!(%status, controller = %controller.name, "http error from controller");
                let mut response = ctx.response.lock();
                response.status = status;
                response.set_content_type("text/html");
                response.set_text(error_html(status, &message));
            }
            Err(e) => return Err(e),
        }

        self.hooks.notify_request(RequestEvent::AfterCall, ctx);
        ctx.advance(ContextState::Responded);
        let response = ctx.response.lock().clone();
        Ok(response)
    }
}

pub(crate) fn error_html(status: StatusCode, message: &str) -> String {
    let title = format!("{} {}", status.as_u16(), status.canonical_reason().unwrap_or(""));
    format!(
        "<html><head><title>{title}</title></head><body><h1>{title}</h1><p>{}</p></body></html>",
        html_escape(message)
    )
}

pub(crate) fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

/// Controller lookup with a process-wide, insert-only cache.
struct ControllerResolver {
    package: Option<String>,
    root: Option<ControllerFactory>,
    namespace: Option<Arc<ControllerNamespace>>,
    resolved: RwLock<HashMap<String, ControllerFactory>>,
}

impl ControllerResolver {
    fn from_conf(conf: &Conf) -> Self {
        ControllerResolver {
            package: conf.get_str("package").map(str::to_string),
            root: conf.service::<ControllerFactory>("tg.root_controller"),
            namespace: conf.service::<Arc<ControllerNamespace>>("tg.controllers"),
            resolved: RwLock::new(HashMap::new()),
        }
    }

    fn resolve(&self, name: &str) -> Result<Option<ControllerFactory>, AppError> {
        if name == "root" {
            if let Some(root) = &self.root {
                return Ok(Some(root.clone()));
            }
        }
        if let Some(hit) = self.resolved.read().get(name) {
            return Ok(Some(hit.clone()));
        }
        let Some(namespace) = &self.namespace else {
            return Ok(None);
        };
        let found = namespace.lookup(self.package.as_deref(), name)?;
        if let Some(factory) = &found {
            self.resolved
                .write()
                .entry(name.to_string())
                .or_insert_with(|| factory.clone());
        }
        Ok(found)
    }
}

/// The framework application at the center of the middleware stack.
pub struct TgApp {
    conf: Arc<Conf>,
    factory: Arc<ContextFactory>,
    chain: Handler,
    resolver: ControllerResolver,
}

impl TgApp {
    pub fn new(
        conf: Conf,
        wrappers: &DependencyList<AppWrapperFactory>,
        hooks: Arc<HookRegistry>,
    ) -> Result<Self, ConfigError> {
        let conf = Arc::new(conf);
        let base: Handler = Arc::new(ControllerInvoker {
            conf: conf.clone(),
            callers: conf.service::<Arc<ControllerCallers>>("controller_caller").unwrap_or_default(),
            renderers: conf.service::<Arc<Renderers>>("render_functions").unwrap_or_default(),
            hooks,
        });
        let chain = build_chain(base, wrappers, &conf)?;
        Ok(TgApp {
            factory: Arc::new(ContextFactory::new(conf.clone())?),
            resolver: ControllerResolver::from_conf(&conf),
            chain,
            conf,
        })
    }

    pub fn conf(&self) -> &Arc<Conf> {
        &self.conf
    }

    fn dispatch(&self, environ: &mut Environ, registry: Registry) -> Result<WsgiResponse, AppError> {
        let mut ctx = match self.factory.build(environ, registry) {
            Ok(ctx) => ctx,
            Err(AppError::Http { status, message }) => {
                tracing::debug!(%status, %message, "request refused before dispatch");
                return Ok(WsgiResponse::text(status, "text/html; charset=utf-8", error_html(status, &message)));
            }
            Err(e) => return Err(e),
        };
        ctx.publish()?;
        ctx.advance(ContextState::Registered);
        environ.set_var(keys::ROUTES_DICT, (*ctx.routes).clone());
        environ.set_var(keys::LOCALS, ctx.clone());

        let name = ctx.routes.controller().to_string();
        let Some(factory) = self.resolver.resolve(&name)? else {
            tracing::debug!(controller = %name, "no controller");
            return Ok(WsgiResponse::not_found());
        };
        let handle = ControllerHandle::new(name, factory.instantiate());
        let response = self.chain.handle(&handle, environ, &mut ctx)?;
        ctx.advance(ContextState::Cleaning);
        Ok(response.into_wsgi())
    }
}

impl WsgiApp for TgApp {
    fn call(&self, environ: &mut Environ) -> Result<WsgiResponse, AppError> {
        if let Some(registry) = environ.var::<Registry>(keys::REGISTRY) {
            return self.dispatch(environ, (*registry).clone());
        }
        // Without a registry manager in front, the core owns the request scope.
        let scope = ScopeGuard::enter(Registry::new());
        environ.set_var(keys::REGISTRY, scope.registry().clone());
        let result = self.dispatch(environ, scope.registry().clone());
        environ.remove_var(keys::REGISTRY);
        scope.close()?;
        result
    }
}

impl fmt::Debug for TgApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TgApp").field("package", &self.resolver.package).finish()
    }
}
