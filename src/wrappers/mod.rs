//! In-framework middlewares that see typed requests, responses and the request context.
//!
//! A chain is folded right to left over the wrapper list, so the first entry runs
//! outermost and sees the request first and the response last.

pub mod cache;
pub mod errorpage;
pub mod i18n;
pub mod identity;
pub mod ming;
pub mod session;
pub mod transaction;

pub use cache::CacheApplicationWrapper;
pub use errorpage::ErrorPageApplicationWrapper;
pub use i18n::I18nApplicationWrapper;
pub use identity::IdentityApplicationWrapper;
pub use ming::MingApplicationWrapper;
pub use session::SessionApplicationWrapper;
pub use transaction::TransactionApplicationWrapper;

use crate::config::Conf;
use crate::deps::DependencyList;
use crate::error::{AppError, ConfigError};
use crate::http::Response;
use crate::wsgi::{ControllerHandle, Environ, RequestContext};
use std::sync::Arc;

pub trait RequestHandler: Send + Sync {
    fn handle(
        &self,
        controller: &ControllerHandle,
        environ: &mut Environ,
        context: &mut RequestContext,
    ) -> Result<Response, AppError>;
}

pub type Handler = Arc<dyn RequestHandler>;

impl<F> RequestHandler for F
where
    F: Fn(&ControllerHandle, &mut Environ, &mut RequestContext) -> Result<Response, AppError> + Send + Sync,
{
    fn handle(
        &self,
        controller: &ControllerHandle,
        environ: &mut Environ,
        context: &mut RequestContext,
    ) -> Result<Response, AppError> {
        self(controller, environ, context)
    }
}

pub trait ApplicationWrapper: RequestHandler {
    fn name(&self) -> &str;

    /// Wrappers returning false are left out of the chain.
    fn injected(&self) -> bool {
        true
    }
}

/// Builds a wrapper around the next handler of the chain.
pub type AppWrapperFactory =
    Arc<dyn Fn(Handler, &Conf) -> Result<Arc<dyn ApplicationWrapper>, ConfigError> + Send + Sync>;

pub fn wrapper_factory<W, F>(build: F) -> AppWrapperFactory
where
    W: ApplicationWrapper + 'static,
    F: Fn(Handler, &Conf) -> Result<W, ConfigError> + Send + Sync + 'static,
{
    Arc::new(
        move |next: Handler, conf: &Conf| -> Result<Arc<dyn ApplicationWrapper>, ConfigError> {
            Ok(Arc::new(build(next, conf)?))
        },
    )
}

struct Injected(Arc<dyn ApplicationWrapper>);

impl RequestHandler for Injected {
    fn handle(
        &self,
        controller: &ControllerHandle,
        environ: &mut Environ,
        context: &mut RequestContext,
    ) -> Result<Response, AppError> {
        self.0.handle(controller, environ, context)
    }
}

/// Fold `wrappers` around `base`; returns the outermost handler.
pub fn build_chain(
    base: Handler,
    wrappers: &DependencyList<AppWrapperFactory>,
    conf: &Conf,
) -> Result<Handler, ConfigError> {
    let mut handler = base;
    for (key, factory) in wrappers.iter().rev() {
        let wrapper = factory(handler.clone(), conf)?;
        if wrapper.injected() {
            tracing::debug!(wrapper = key, name = wrapper.name(), "wrapper injected");
            handler = Arc::new(Injected(wrapper));
        } else {
            tracing::debug!(wrapper = key, "wrapper skipped");
        }
    }
    Ok(handler)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::registry::Registry;
    use crate::wsgi::context::ContextFactory;
    use crate::wsgi::{Controller, Output};
    use crate::http::Params;

    /// A published context on a fresh registry scope.
    pub fn context(conf: Conf, environ: &Environ) -> RequestContext {
        let registry = Registry::new();
        registry.prepare();
        let factory = Arc::new(ContextFactory::new(Arc::new(conf)).unwrap());
        let ctx = factory.build(environ, registry).unwrap();
        ctx.publish().unwrap();
        ctx
    }

    pub fn controller() -> ControllerHandle {
        let noop = |_: &mut RequestContext, _: &[String], _: &Params| -> Result<Output, AppError> { Ok(Output::from("")) };
        let noop: Arc<dyn Controller> = Arc::new(noop);
        ControllerHandle::new("root", noop)
    }

    pub fn handler<F>(f: F) -> Handler
    where
        F: Fn(&ControllerHandle, &mut Environ, &mut RequestContext) -> Result<Response, AppError> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    pub fn text(body: &str) -> Response {
        let mut response = Response::default();
        response.set_text(body);
        response
    }
}
