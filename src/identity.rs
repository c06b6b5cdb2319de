//! Identities attached by authentication and the metadata used to enrich them.

use crate::signing;
use crate::wsgi::{Environ, WsgiResponse};
use axum::http::StatusCode;
use serde_json::{Map, Value};

/// Identity mapping as left in the environ by authentication.
pub type Identity = Map<String, Value>;

pub const USERID: &str = "repoze.who.userid";

/// Finds who is making the request.
pub trait Authenticator: Send + Sync {
    fn identify(&self, environ: &Environ) -> Option<Identity>;

    /// Replacement for a 401 produced downstream, if the plugin wants to challenge.
    fn challenge(&self, _environ: &Environ, _status: StatusCode) -> Option<WsgiResponse> {
        None
    }
}

/// Loads user, groups and permissions for an identified user id.
pub trait IdentityMetadataProvider: Send + Sync {
    fn get_user(&self, identity: &Identity, userid: &str) -> Option<Value>;

    fn get_groups(&self, _identity: &Identity, _userid: &str) -> Vec<String> {
        Vec::new()
    }

    fn get_permissions(&self, _identity: &Identity, _userid: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Adds `user`, `groups` and `permissions`. A missing user empties the identity
/// unless `allow_missing_user` is set.
pub fn enrich(mut identity: Identity, provider: &dyn IdentityMetadataProvider, allow_missing_user: bool) -> Identity {
    let Some(userid) = identity.get(USERID).and_then(userid_text) else {
        return identity;
    };
    let user = provider.get_user(&identity, &userid);
    if user.is_none() && !allow_missing_user {
        tracing::debug!(%userid, "user not found, discarding identity");
        return Identity::new();
    }
    let groups = provider.get_groups(&identity, &userid);
    let permissions = provider.get_permissions(&identity, &userid);
    identity.insert("user".into(), user.unwrap_or(Value::Null));
    identity.insert("groups".into(), groups.into());
    identity.insert("permissions".into(), permissions.into());
    identity
}

fn userid_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Credentials view kept for authorization predicates.
pub fn credentials(identity: &Identity) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert(
        "repoze.what.userid".into(),
        identity.get(USERID).cloned().unwrap_or(Value::Null),
    );
    out.insert(
        "groups".into(),
        identity.get("groups").cloned().unwrap_or_else(|| Value::Array(vec![])),
    );
    out.insert(
        "permissions".into(),
        identity.get("permissions").cloned().unwrap_or_else(|| Value::Array(vec![])),
    );
    out
}

/// Identifies users from a signed cookie holding their user id.
pub struct CookieAuthenticator {
    cookie_name: String,
    secret: String,
}

impl CookieAuthenticator {
    pub fn new(cookie_name: impl Into<String>, secret: impl Into<String>) -> Self {
        CookieAuthenticator {
            cookie_name: cookie_name.into(),
            secret: secret.into(),
        }
    }

    /// Cookie value that identifies `userid` on later requests.
    pub fn remember(&self, userid: &str) -> String {
        format!("{}={}; Path=/; HttpOnly", self.cookie_name, signing::sign(&self.secret, userid))
    }
}

impl Authenticator for CookieAuthenticator {
    fn identify(&self, environ: &Environ) -> Option<Identity> {
        let cookies = crate::http::parse_cookie_header(environ.header("cookie")?);
        let signed = cookies.get(&self.cookie_name)?;
        let userid = signing::unsign(&self.secret, signed)?;
        let mut identity = Identity::new();
        identity.insert(USERID.into(), Value::String(userid.to_string()));
        Some(identity)
    }
}
