use super::{ApplicationWrapper, Handler, RequestHandler};
use crate::config::Conf;
use crate::db::odm::OdmSession;
use crate::error::{AppError, ConfigError};
use crate::http::Response;
use crate::wsgi::{ControllerHandle, Environ, RequestContext};
use std::sync::Arc;

/// Flushes the document session after a successful request; closes it after a failed one.
pub struct MingApplicationWrapper {
    next: Handler,
    session: Option<Arc<dyn OdmSession>>,
    autoflush: bool,
}

impl MingApplicationWrapper {
    pub fn new(next: Handler, conf: &Conf) -> Result<Self, ConfigError> {
        Ok(MingApplicationWrapper {
            next,
            session: conf.service::<Arc<dyn OdmSession>>("ming.session"),
            autoflush: conf.bool_or("ming.autoflush", true)?,
        })
    }
}

impl RequestHandler for MingApplicationWrapper {
    fn handle(
        &self,
        controller: &ControllerHandle,
        environ: &mut Environ,
        context: &mut RequestContext,
    ) -> Result<Response, AppError> {
        let Some(session) = &self.session else {
            return self.next.handle(controller, environ, context);
        };
        match self.next.handle(controller, environ, context) {
            Ok(response) => {
                session.flush_all()?;
                Ok(response)
            }
            Err(e) => {
                session.close_all();
                Err(e)
            }
        }
    }
}

impl ApplicationWrapper for MingApplicationWrapper {
    fn name(&self) -> &str {
        "ming"
    }

    fn injected(&self) -> bool {
        self.autoflush && self.session.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Odm {
        flushes: AtomicUsize,
        closes: AtomicUsize,
    }

    impl OdmSession for Odm {
        fn flush_all(&self) -> Result<(), AppError> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close_all(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wrapper(odm: &Arc<Odm>, fail: bool) -> MingApplicationWrapper {
        let mut conf = Conf::new();
        let session: Arc<dyn OdmSession> = odm.clone();
        conf.set_service("ming.session", session);
        let next = handler(move |_, _, _| {
            if fail {
                Err(AppError::Controller("boom".into()))
            } else {
                Ok(text("ok"))
            }
        });
        MingApplicationWrapper::new(next, &conf).unwrap()
    }

    fn run(wrapper: &MingApplicationWrapper) -> Result<Response, AppError> {
        let mut environ = Environ::get("/");
        let mut ctx = context(Conf::new(), &environ);
        wrapper.handle(&controller(), &mut environ, &mut ctx)
    }

    #[test]
    fn flushes_on_success_and_closes_on_failure() {
        let odm = Arc::new(Odm::default());
        run(&wrapper(&odm, false)).unwrap();
        assert!(run(&wrapper(&odm, true)).is_err());
        assert_eq!(odm.flushes.load(Ordering::SeqCst), 1);
        assert_eq!(odm.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn not_injected_without_a_session() {
        let wrapper = MingApplicationWrapper::new(handler(|_, _, _| Ok(text(""))), &Conf::new()).unwrap();
        assert!(!wrapper.injected());
    }
}
