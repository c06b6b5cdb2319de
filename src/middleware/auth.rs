use crate::error::AppError;
use crate::identity::{Authenticator, Identity, USERID};
use crate::wsgi::{keys, BoxedApp, Environ, WsgiApp, WsgiResponse};
use axum::http::StatusCode;
use serde_json::Value;
use std::sync::Arc;

/// Identifies the requester before the application runs and lets the
/// authenticator replace 401 responses with a challenge.
pub struct AuthenticationMiddleware {
    app: BoxedApp,
    authenticator: Arc<dyn Authenticator>,
}

impl AuthenticationMiddleware {
    pub fn new(app: BoxedApp, authenticator: Arc<dyn Authenticator>) -> Self {
        AuthenticationMiddleware { app, authenticator }
    }

    fn challenge(&self, environ: &Environ) -> Option<WsgiResponse> {
        let challenge = self.authenticator.challenge(environ, StatusCode::UNAUTHORIZED);
        if challenge.is_some() {
            tracing::debug!(path = %environ.path_info, "authentication challenge");
        }
        challenge
    }
}

impl WsgiApp for AuthenticationMiddleware {
    fn call(&self, environ: &mut Environ) -> Result<WsgiResponse, AppError> {
        if let Some(identity) = self.authenticator.identify(environ) {
            tracing::debug!(userid = ?identity.get(USERID), "request identified");
            environ.set_var(keys::IDENTITY, identity);
        }
        match self.app.call(environ) {
            Ok(response) if response.status == StatusCode::UNAUTHORIZED => {
                Ok(self.challenge(environ).unwrap_or(response))
            }
            Err(e) if e.status() == StatusCode::UNAUTHORIZED => self.challenge(environ).ok_or(e),
            other => other,
        }
    }
}

/// Trusts the user name placed under `REMOTE_USER` by the server; used with `skip_authentication`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RemoteUserAuthenticator;

impl Authenticator for RemoteUserAuthenticator {
    fn identify(&self, environ: &Environ) -> Option<Identity> {
        let user = environ.var::<String>(keys::REMOTE_USER)?;
        if user.is_empty() {
            return None;
        }
        let mut identity = Identity::new();
        identity.insert(USERID.into(), Value::String(user.as_ref().clone()));
        Some(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::CookieAuthenticator;

    struct LoginForm;

    impl Authenticator for LoginForm {
        fn identify(&self, environ: &Environ) -> Option<Identity> {
            RemoteUserAuthenticator.identify(environ)
        }

        fn challenge(&self, _environ: &Environ, _status: StatusCode) -> Option<WsgiResponse> {
            let mut response = WsgiResponse::text(StatusCode::FOUND, "text/plain", "");
            response.headers.push(("Location".into(), "/login".into()));
            Some(response)
        }
    }

    /// Answers 401 unless an identity is present, else echoes the user id.
    fn protected() -> BoxedApp {
        Arc::new(|environ: &mut Environ| -> Result<WsgiResponse, AppError> {
            match environ.var::<Identity>(keys::IDENTITY) {
                Some(identity) => Ok(WsgiResponse::text(
                    StatusCode::OK,
                    "text/plain",
                    identity[USERID].as_str().unwrap_or_default().to_string(),
                )),
                None => Ok(WsgiResponse::text(StatusCode::UNAUTHORIZED, "text/plain", "who?")),
            }
        })
    }

    #[test]
    fn remote_user_is_identified() {
        let auth = AuthenticationMiddleware::new(protected(), Arc::new(LoginForm));
        let mut environ = Environ::get("/secret");
        environ.set_var(keys::REMOTE_USER, "manager".to_string());
        let response = auth.call(&mut environ).unwrap();
        assert_eq!(response.collect().unwrap().text(), "manager");
    }

    #[test]
    fn unauthorized_responses_are_challenged() {
        let auth = AuthenticationMiddleware::new(protected(), Arc::new(LoginForm));
        let response = auth.call(&mut Environ::get("/secret")).unwrap();
        assert_eq!(response.status, StatusCode::FOUND);
        assert_eq!(response.header("location"), Some("/login"));
    }

    #[test]
    fn signed_cookies_identify_users() {
        let cookies = CookieAuthenticator::new("authtkt", "s3cret");
        let header = cookies.remember("alice");
        let value = header.split(';').next().unwrap_or_default().to_string();
        let auth = AuthenticationMiddleware::new(protected(), Arc::new(cookies));
        let mut environ = Environ::get("/").with_header("cookie", &value);
        assert_eq!(auth.call(&mut environ).unwrap().collect().unwrap().text(), "alice");

        let mut forged = Environ::get("/").with_header("cookie", "authtkt=alice.deadbeef");
        assert_eq!(auth.call(&mut forged).unwrap().status, StatusCode::UNAUTHORIZED);
    }
}
