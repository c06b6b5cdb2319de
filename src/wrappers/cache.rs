use super::{ApplicationWrapper, Handler, RequestHandler};
use crate::cache::CacheManager;
use crate::config::Conf;
use crate::error::{AppError, ConfigError};
use crate::http::Response;
use crate::wsgi::{keys, ControllerHandle, Environ, RequestContext, TestingVariables};
use std::sync::Arc;

/// Exposes the application cache on the context and the environ.
pub struct CacheApplicationWrapper {
    next: Handler,
    enabled: bool,
    manager: Arc<CacheManager>,
}

impl CacheApplicationWrapper {
    pub fn new(next: Handler, conf: &Conf) -> Result<Self, ConfigError> {
        let enabled = conf.bool_or("cache.enabled", true)?;
        let manager = match conf.service::<Arc<CacheManager>>("cache.manager") {
            Some(manager) => manager,
            None => {
                let expire = conf.int_or("cache.expire", 0)?;
                Arc::new(CacheManager::new(u64::try_from(expire).ok().filter(|e| *e > 0)))
            }
        };
        Ok(CacheApplicationWrapper { next, enabled, manager })
    }
}

impl RequestHandler for CacheApplicationWrapper {
    fn handle(
        &self,
        controller: &ControllerHandle,
        environ: &mut Environ,
        context: &mut RequestContext,
    ) -> Result<Response, AppError> {
        environ.set_var_arc(keys::CACHE, self.manager.clone());
        context.set_cache(self.manager.clone())?;
        if let Some(testing) = environ.var::<TestingVariables>(keys::TESTING_VARIABLES) {
            testing.insert("cache", self.manager.clone());
        }
        self.next.handle(controller, environ, context)
    }
}

impl ApplicationWrapper for CacheApplicationWrapper {
    fn name(&self) -> &str {
        "cache"
    }

    fn injected(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn cache_is_shared_between_requests_and_reported() {
        let wrapper = CacheApplicationWrapper::new(
            handler(|_, _, ctx| {
                let cache = ctx.cache.clone().ok_or_else(|| AppError::Controller("no cache".into()))?;
                let hits = cache.get_cache("hits");
                let n = hits.get("n").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
                hits.put("n", json!(n), None);
                Ok(text(&n.to_string()))
            }),
            &Conf::new(),
        )
        .unwrap();
        assert!(wrapper.injected());

        for expected in ["1", "2"] {
            let mut environ = Environ::get("/");
            environ.set_var(keys::TESTING_VARIABLES, TestingVariables::new());
            let mut ctx = context(Conf::new(), &environ);
            let response = wrapper.handle(&controller(), &mut environ, &mut ctx).unwrap();
            assert_eq!(response.text(), expected);
            let testing = environ.var::<TestingVariables>(keys::TESTING_VARIABLES).unwrap();
            assert!(testing.get::<CacheManager>("cache").is_some());
        }
    }

    #[test]
    fn can_be_disabled() {
        let mut conf = Conf::new();
        conf.set("cache.enabled", "false");
        let wrapper = CacheApplicationWrapper::new(handler(|_, _, _| Ok(text(""))), &conf).unwrap();
        assert!(!wrapper.injected());
    }
}
