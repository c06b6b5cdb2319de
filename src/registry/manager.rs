//! Outermost per-request wrapper: one registry scope per request.

use super::{Registry, ScopeGuard};
use crate::error::AppError;
use crate::wsgi::{keys, Environ, WsgiApp, WsgiResponse, BoxedApp, Body};
use std::cell::RefCell;

thread_local! {
    // Registry kept alive by a failed debug request; released by the next request on this thread.
    static PRESERVED: RefCell<Option<Registry>> = const { RefCell::new(None) };
}

pub struct RegistryManager {
    app: BoxedApp,
    streaming: bool,
    preserve_exceptions: bool,
}

impl RegistryManager {
    pub fn new(app: BoxedApp, streaming: bool, preserve_exceptions: bool) -> Self {
        RegistryManager {
            app,
            streaming,
            preserve_exceptions,
        }
    }

    fn fail(&self, scope: ScopeGuard, err: AppError) -> AppError {
        if self.preserve_exceptions {
            hold_preserved(&scope.into_inner());
        } else if let Err(cleanup_err) = scope.close() {
            tracing::error!(error = %cleanup_err, "registry cleanup failed");
        }
        err
    }
}

/// Keep `registry`'s top scope bound until the next request on this thread.
pub(crate) fn hold_preserved(registry: &Registry) {
    registry.preserve();
    tracing::debug!(bound = ?registry.bound_names(), "registry preserved after error");
    PRESERVED.with(|slot| *slot.borrow_mut() = Some(registry.clone()));
}

/// Pop the frames a previous debug request on this thread left behind.
pub fn release_preserved() {
    let preserved = PRESERVED.with(|slot| slot.borrow_mut().take());
    if let Some(registry) = preserved {
        if let Err(e) = registry.release() {
            tracing::error!(error = %e, "releasing preserved registry failed");
        }
    }
}

impl WsgiApp for RegistryManager {
    fn call(&self, environ: &mut Environ) -> Result<WsgiResponse, AppError> {
        release_preserved();

        let registry = match environ.var::<Registry>(keys::REGISTRY) {
            Some(existing) => (*existing).clone(),
            None => {
                let registry = Registry::new();
                environ.set_var(keys::REGISTRY, registry.clone());
                registry
            }
        };
        let scope = ScopeGuard::enter(registry).preserve_on_unwind(self.preserve_exceptions);

        let response = match self.app.call(environ) {
            Ok(response) => response,
            Err(e) => return Err(self.fail(scope, e)),
        };

        let WsgiResponse { status, headers, body } = response;
        if self.streaming {
            let closing = scope.into_inner();
            let body = body.on_close(move || {
                if let Err(e) = closing.cleanup() {
                    tracing::error!(error = %e, "registry cleanup on close failed");
                }
            });
            return Ok(WsgiResponse::new(status, headers, body));
        }

        match body.collect_bytes() {
            Ok(bytes) => {
                scope.close()?;
                Ok(WsgiResponse::new(status, headers, Body::from_bytes(bytes)))
            }
            Err(e) => Err(self.fail(scope, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StackedObjectProxy;
    use axum::http::StatusCode;
    use bytes::Bytes;
    use std::panic::AssertUnwindSafe;
    use std::sync::Arc;

    static ITEM: StackedObjectProxy<String> = StackedObjectProxy::new("item");

    fn binding_app(fail: bool) -> BoxedApp {
        Arc::new(move |environ: &mut Environ| {
            let registry = environ
                .var::<Registry>(keys::REGISTRY)
                .ok_or_else(|| AppError::Controller("no registry".into()))?;
            registry.register(&ITEM, Arc::new("bound".to_string()))?;
            if fail {
                return Err(AppError::Controller("boom".into()));
            }
            let chunks = vec![Ok(Bytes::from(ITEM.current_obj()?.as_bytes().to_vec()))];
            Ok(WsgiResponse::new(StatusCode::OK, vec![], Body::from_chunks(chunks)))
        })
    }

    #[test]
    fn buffered_requests_leave_no_frames() {
        let manager = RegistryManager::new(binding_app(false), false, false);
        let resp = manager.call(&mut Environ::get("/")).unwrap();
        assert_eq!(ITEM.depth(), 0);
        assert_eq!(resp.body.collect_bytes().unwrap(), b"bound");
    }

    #[test]
    fn streaming_cleans_up_when_the_body_closes() {
        let manager = RegistryManager::new(binding_app(false), true, false);
        let resp = manager.call(&mut Environ::get("/")).unwrap();
        assert_eq!(ITEM.depth(), 1);
        drop(resp);
        assert_eq!(ITEM.depth(), 0);
    }

    #[test]
    fn errors_clean_up_unless_preserving() {
        let manager = RegistryManager::new(binding_app(true), false, false);
        assert!(manager.call(&mut Environ::get("/")).is_err());
        assert_eq!(ITEM.depth(), 0);

        let manager = RegistryManager::new(binding_app(true), false, true);
        assert!(manager.call(&mut Environ::get("/")).is_err());
        assert_eq!(ITEM.depth(), 1);
        assert!(ITEM.is_preserved());

        let manager = RegistryManager::new(binding_app(false), false, true);
        manager.call(&mut Environ::get("/")).unwrap();
        assert_eq!(ITEM.depth(), 0);
    }

    fn panicking_app() -> BoxedApp {
        Arc::new(|environ: &mut Environ| -> Result<WsgiResponse, AppError> {
            let registry = environ
                .var::<Registry>(keys::REGISTRY)
                .ok_or_else(|| AppError::Controller("no registry".into()))?;
            registry.register(&ITEM, Arc::new("half-done".to_string()))?;
            panic!("controller panicked");
        })
    }

    #[test]
    fn panics_do_not_leave_frames_behind() {
        let manager = RegistryManager::new(panicking_app(), false, false);
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| manager.call(&mut Environ::get("/"))));
        assert!(outcome.is_err());
        assert_eq!(ITEM.depth(), 0);
    }

    #[test]
    fn panics_in_debug_are_preserved_until_the_next_request() {
        let manager = RegistryManager::new(panicking_app(), false, true);
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| manager.call(&mut Environ::get("/"))));
        assert!(outcome.is_err());
        assert_eq!(ITEM.depth(), 1);
        assert!(ITEM.is_preserved());

        let manager = RegistryManager::new(binding_app(false), false, true);
        manager.call(&mut Environ::get("/")).unwrap();
        assert_eq!(ITEM.depth(), 0);
    }
}
