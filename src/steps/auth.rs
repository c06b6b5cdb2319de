use crate::config::{Coercion, Conf};
use crate::configurator::{BuildContext, ConfigurationStep};
use crate::error::ConfigError;
use crate::identity::{Authenticator, CookieAuthenticator};
use crate::middleware::{AuthenticationMiddleware, RemoteUserAuthenticator};
use crate::wsgi::BoxedApp;
use serde_json::{Map, Value};
use std::any::Any;
use std::sync::Arc;

/// Installs authentication when `auth_backend` is set.
///
/// The authenticator is the `sa_auth.authenticator` service, else a signed-cookie
/// authenticator keyed by `sa_auth.cookie_secret`. With `skip_authentication` the
/// server-provided `REMOTE_USER` is trusted instead.
#[derive(Debug, Default)]
pub struct AuthStep;

impl AuthStep {
    fn enabled(conf: &Conf) -> bool {
        conf.get_str("auth_backend").is_some_and(|b| !b.is_empty())
    }

    fn authenticator(conf: &Conf) -> Result<Arc<dyn Authenticator>, ConfigError> {
        if conf.bool_or("skip_authentication", false)? {
            tracing::warn!("skip_authentication is on, trusting REMOTE_USER");
            return Ok(Arc::new(RemoteUserAuthenticator));
        }
        if let Some(given) = conf.service::<Arc<dyn Authenticator>>("sa_auth.authenticator") {
            return Ok(given);
        }
        Ok(Arc::new(CookieAuthenticator::new(
            conf.str_or("sa_auth.cookie_name", "authtkt"),
            conf.require_str("sa_auth.cookie_secret")?,
        )))
    }
}

impl ConfigurationStep for AuthStep {
    fn id(&self) -> &str {
        "auth"
    }

    fn defaults(&self) -> Map<String, Value> {
        let mut defaults = Map::new();
        defaults.insert("skip_authentication".into(), Value::Bool(false));
        defaults
    }

    fn coercions(&self) -> Vec<(String, Coercion)> {
        vec![("skip_authentication".into(), Coercion::Bool)]
    }

    fn before_config(&self, conf: &mut Conf, _ctx: &BuildContext) -> Result<(), ConfigError> {
        if !Self::enabled(conf) {
            return Ok(());
        }
        if !conf.bool_or("skip_authentication", false)? && !conf.has_service("sa_auth.authenticator") {
            conf.require_str("sa_auth.cookie_secret").map_err(|_| {
                ConfigError::step("auth", "sa_auth.cookie_secret is required when auth_backend is set")
            })?;
        }
        conf.set_default("identity.enabled", true);
        Ok(())
    }

    fn app_ready(&self, app: BoxedApp, conf: &Conf, _ctx: &BuildContext) -> Result<BoxedApp, ConfigError> {
        if !Self::enabled(conf) {
            return Ok(app);
        }
        let authenticator = Self::authenticator(conf)?;
        tracing::debug!(backend = ?conf.get_str("auth_backend"), "installing authentication middleware");
        Ok(Arc::new(AuthenticationMiddleware::new(app, authenticator)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
