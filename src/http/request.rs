//! Framework request built from the environ once per request.

use super::cookies::parse_cookie_header;
use super::params::{DecodeErrors, Params};
use crate::config::Conf;
use crate::error::{AppError, ConfigError};
use crate::i18n::parse_accept_language;
use crate::identity::Identity;
use crate::wsgi::{keys, Environ};
use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct RequestOptions {
    pub charset: String,
    /// Decode form bodies into [`Request::params`].
    pub decode_form: bool,
    /// Policy for parameters that are not valid in `charset`.
    pub decode_errors: DecodeErrors,
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions {
            charset: "utf-8".into(),
            decode_form: true,
            decode_errors: DecodeErrors::Strict,
        }
    }
}

impl RequestOptions {
    /// Only UTF-8 request charsets are accepted.
    pub fn from_conf(conf: &Conf) -> Result<Self, ConfigError> {
        let charset = conf.str_or("charset", "utf-8");
        if !matches!(charset.to_ascii_lowercase().as_str(), "utf-8" | "utf8") {
            return Err(ConfigError::Validation(format!(
                "charset {charset:?} is not supported, use utf-8"
            )));
        }
        let errors = conf.str_or("request.decode_errors", "strict");
        let decode_errors = DecodeErrors::from_name(&errors).ok_or_else(|| ConfigError::Coercion {
            key: "request.decode_errors".into(),
            value: errors.clone(),
            reason: "expected strict or replace".into(),
        })?;
        Ok(RequestOptions {
            charset,
            decode_form: conf.bool_or("request.decode_form", true)?,
            decode_errors,
        })
    }
}

#[derive(Debug)]
pub struct Request {
    pub id: Uuid,
    pub method: Method,
    pub script_name: String,
    pub path_info: String,
    pub query_string: String,
    pub host_url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub charset: String,
    get: Params,
    post: Params,
    cookies: HashMap<String, String>,
    identity: RwLock<Option<Identity>>,
}

impl Request {
    /// Fails with 400 when parameters break the strict decoding policy.
    pub fn from_environ(environ: &Environ, options: &RequestOptions) -> Result<Self, AppError> {
        let undecodable = |part: &str, e: std::str::Utf8Error| {
            AppError::bad_request(format!("{part} is not valid {}: {e}", options.charset))
        };
        let get = Params::parse_with(environ.query_string.as_bytes(), options.decode_errors)
            .map_err(|e| undecodable("query string", e))?;
        let is_form = environ
            .header("content-type")
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        let post = if options.decode_form && is_form {
            Params::parse_with(&environ.input, options.decode_errors).map_err(|e| undecodable("form body", e))?
        } else {
            Params::new()
        };
        let cookies = environ
            .header("cookie")
            .map(parse_cookie_header)
            .unwrap_or_default();
        let identity = environ.var::<Identity>(keys::IDENTITY).map(|id| (*id).clone());

        Ok(Request {
            id: Uuid::new_v4(),
            method: environ.method.clone(),
            script_name: environ.script_name.clone(),
            path_info: environ.path_info.clone(),
            query_string: environ.query_string.clone(),
            host_url: environ.host_url(),
            headers: environ.headers.clone(),
            body: environ.input.clone(),
            charset: options.charset.clone(),
            get,
            post,
            cookies,
            identity: RwLock::new(identity),
        })
    }

    /// Query and form parameters; form values come last and win on `get`.
    pub fn params(&self) -> Params {
        let mut all = self.get.clone();
        all.extend(&self.post);
        all
    }

    pub fn get_params(&self) -> &Params {
        &self.get
    }

    pub fn post_params(&self) -> &Params {
        &self.post
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    /// `SCRIPT_NAME` + `PATH_INFO`.
    pub fn path(&self) -> String {
        format!("{}{}", self.script_name, self.path_info)
    }

    pub fn url(&self) -> String {
        let mut url = format!("{}{}", self.host_url, self.path());
        if !self.query_string.is_empty() {
            url.push('?');
            url.push_str(&self.query_string);
        }
        url
    }

    /// Languages from `Accept-Language`, best first.
    pub fn accept_languages(&self) -> Vec<String> {
        self.header("accept-language")
            .map(parse_accept_language)
            .unwrap_or_default()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity.read().clone()
    }

    pub fn set_identity(&self, identity: Option<Identity>) {
        *self.identity.write() = identity;
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        serde_json::from_slice(&self.body).map_err(|e| AppError::bad_request(format!("invalid JSON body: {e}")))
    }
}
