use crate::db::odm::OdmSession;
use crate::db::ScopedSession;
use crate::error::AppError;
use crate::wsgi::{BoxedApp, Environ, WsgiApp, WsgiResponse};
use std::sync::Arc;

/// Discards the calling thread's database session when the request exits, failed or not.
pub struct DbSessionRemover {
    app: BoxedApp,
    session: ScopedSession,
}

impl DbSessionRemover {
    pub fn new(app: BoxedApp, session: ScopedSession) -> Self {
        DbSessionRemover { app, session }
    }
}

impl WsgiApp for DbSessionRemover {
    fn call(&self, environ: &mut Environ) -> Result<WsgiResponse, AppError> {
        let result = self.app.call(environ);
        if self.session.has_session() {
            tracing::trace!("removing database session");
            self.session.remove();
        }
        result
    }
}

/// Closes every document session when the request exits.
pub struct MingCloser {
    app: BoxedApp,
    session: Arc<dyn OdmSession>,
}

impl MingCloser {
    pub fn new(app: BoxedApp, session: Arc<dyn OdmSession>) -> Self {
        MingCloser { app, session }
    }
}

impl WsgiApp for MingCloser {
    fn call(&self, environ: &mut Environ) -> Result<WsgiResponse, AppError> {
        let result = self.app.call(environ);
        self.session.close_all();
        result
    }
}
