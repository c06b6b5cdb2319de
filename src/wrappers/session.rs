use super::{ApplicationWrapper, Handler, RequestHandler};
use crate::config::Conf;
use crate::error::{AppError, ConfigError};
use crate::http::Response;
use crate::session::{MemorySessionStore, Session, SessionOptions, SessionStore};
use crate::wsgi::{keys, ControllerHandle, Environ, RequestContext};
use std::sync::Arc;

/// Installs a lazily loaded session and sends its cookie when it was accessed.
pub struct SessionApplicationWrapper {
    next: Handler,
    options: Option<Arc<SessionOptions>>,
    store: Arc<dyn SessionStore>,
}

impl SessionApplicationWrapper {
    pub fn new(next: Handler, conf: &Conf) -> Result<Self, ConfigError> {
        let options = if conf.bool_or("session.enabled", false)? {
            Some(Arc::new(SessionOptions::from_conf(conf)?))
        } else {
            None
        };
        let store: Arc<dyn SessionStore> = match conf.service::<Arc<dyn SessionStore>>("session.store") {
            Some(store) => store,
            None => Arc::new(MemorySessionStore::from_conf(conf)?),
        };
        Ok(SessionApplicationWrapper { next, options, store })
    }
}

impl RequestHandler for SessionApplicationWrapper {
    fn handle(
        &self,
        controller: &ControllerHandle,
        environ: &mut Environ,
        context: &mut RequestContext,
    ) -> Result<Response, AppError> {
        let Some(options) = &self.options else {
            return self.next.handle(controller, environ, context);
        };
        // A replayed request (error page) keeps the session of its first pass.
        let session = match environ.var::<Session>(keys::SESSION) {
            Some(session) => session,
            None => {
                let cookie = context.request.cookie(&options.key).map(str::to_string);
                let session = Arc::new(Session::from_cookie(cookie.as_deref(), self.store.clone(), options.clone()));
                environ.set_var_arc(keys::SESSION, session.clone());
                session
            }
        };
        context.set_session(session.clone())?;

        let mut response = self.next.handle(controller, environ, context)?;
        if let Some(cookie) = session.persist() {
            tracing::trace!(session = %session.id(), "session persisted");
            response.set_cookie(&cookie);
        }
        Ok(response)
    }
}

impl ApplicationWrapper for SessionApplicationWrapper {
    fn name(&self) -> &str {
        "session"
    }

    fn injected(&self) -> bool {
        self.options.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use serde_json::json;

    fn conf() -> Conf {
        let mut conf = Conf::new();
        conf.set("session.enabled", true);
        conf.set("session.secret", "s3cret");
        conf
    }

    fn counter() -> Handler {
        handler(|_, _, ctx| {
            let session = ctx.session.clone().ok_or_else(|| AppError::Controller("no session".into()))?;
            let n = session.get("n").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
            session.set("n", json!(n));
            session.save();
            Ok(text(&n.to_string()))
        })
    }

    #[test]
    fn disabled_sessions_are_not_injected() {
        let wrapper = SessionApplicationWrapper::new(counter(), &Conf::new()).unwrap();
        assert!(!wrapper.injected());
    }

    #[test]
    fn enabled_sessions_need_a_secret() {
        let mut conf = Conf::new();
        conf.set("session.enabled", true);
        assert!(SessionApplicationWrapper::new(counter(), &conf).is_err());
    }

    #[test]
    fn cookie_carries_the_session_across_requests() {
        let wrapper = SessionApplicationWrapper::new(counter(), &conf()).unwrap();
        let mut cookie: Option<String> = None;
        for expected in ["1", "2", "3"] {
            let mut environ = Environ::get("/");
            if let Some(c) = &cookie {
                environ.insert_header("cookie", c);
            }
            let mut ctx = context(conf(), &environ);
            let response = wrapper.handle(&controller(), &mut environ, &mut ctx).unwrap();
            assert_eq!(response.text(), expected);
            assert!(environ.has_var(keys::SESSION));
            let set_cookie = response.header("set-cookie").unwrap().to_string();
            cookie = set_cookie.split(';').next().map(str::to_string);
        }
    }

    #[test]
    fn untouched_sessions_send_no_cookie() {
        let wrapper = SessionApplicationWrapper::new(handler(|_, _, _| Ok(text("x"))), &conf()).unwrap();
        let mut environ = Environ::get("/");
        let mut ctx = context(conf(), &environ);
        let response = wrapper.handle(&controller(), &mut environ, &mut ctx).unwrap();
        assert!(response.header("set-cookie").is_none());
    }

    #[test]
    fn replays_of_a_request_share_its_session() {
        let wrapper = SessionApplicationWrapper::new(counter(), &conf()).unwrap();
        let mut environ = Environ::get("/");
        let mut ctx = context(conf(), &environ);
        let first = wrapper.handle(&controller(), &mut environ, &mut ctx).unwrap();
        let second = wrapper.handle(&controller(), &mut environ, &mut ctx).unwrap();
        assert_eq!(first.text(), "1");
        assert_eq!(second.text(), "2");
        assert_eq!(first.header("set-cookie"), second.header("set-cookie"));
    }
}
