use super::{ApplicationWrapper, Handler, RequestHandler};
use crate::config::Conf;
use crate::error::{AppError, ConfigError};
use crate::http::Response;
use crate::identity::{credentials, enrich, Identity, IdentityMetadataProvider};
use crate::wsgi::{keys, ControllerHandle, Environ, RequestContext};
use std::sync::Arc;

/// Enriches the identity left by authentication with user, groups and permissions.
pub struct IdentityApplicationWrapper {
    next: Handler,
    enabled: bool,
    provider: Option<Arc<dyn IdentityMetadataProvider>>,
    allow_missing_user: bool,
}

impl IdentityApplicationWrapper {
    pub fn new(next: Handler, conf: &Conf) -> Result<Self, ConfigError> {
        Ok(IdentityApplicationWrapper {
            next,
            enabled: conf.bool_or("identity.enabled", false)?,
            provider: conf.service::<Arc<dyn IdentityMetadataProvider>>("sa_auth.authmetadata"),
            allow_missing_user: conf.bool_or("identity.allow_missing_user", true)?,
        })
    }
}

impl RequestHandler for IdentityApplicationWrapper {
    fn handle(
        &self,
        controller: &ControllerHandle,
        environ: &mut Environ,
        context: &mut RequestContext,
    ) -> Result<Response, AppError> {
        if let Some(identity) = environ.var::<Identity>(keys::IDENTITY) {
            let identity = match &self.provider {
                Some(provider) => enrich((*identity).clone(), provider.as_ref(), self.allow_missing_user),
                None => (*identity).clone(),
            };
            environ.set_var(keys::CREDENTIALS, credentials(&identity));
            environ.set_var(keys::IDENTITY, identity.clone());
            context.request.set_identity(Some(identity));
        }
        self.next.handle(controller, environ, context)
    }
}

impl ApplicationWrapper for IdentityApplicationWrapper {
    fn name(&self) -> &str {
        "identity"
    }

    fn injected(&self) -> bool {
        self.enabled
    }
}
